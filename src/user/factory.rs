//! The only way to bring a [`User`] to life.
//!
//! Every record built here has a normalized email and a hashed (or
//! unusable) password.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use validator::{Validate, ValidationErrors};

use crate::crypto::PasswordManager;
use crate::error::{AccountError, Result};
use crate::user::{EmailAddress, Profile, User, UserRepository};

/// User factory.
#[derive(Clone)]
pub struct UserFactory {
    repo: Arc<dyn UserRepository>,
    pwd: Arc<PasswordManager>,
}

impl UserFactory {
    /// Create a new [`UserFactory`].
    pub fn new(repo: Arc<dyn UserRepository>, pwd: Arc<PasswordManager>) -> Self {
        Self { repo, pwd }
    }

    /// Store backing this factory.
    pub fn repository(&self) -> &Arc<dyn UserRepository> {
        &self.repo
    }

    /// Build an unsaved user.
    ///
    /// # Errors
    ///
    /// Returns a validation error on `email` when it is missing, blank or
    /// malformed, and on profile fields exceeding their length.
    pub fn prepare(
        &self,
        email: Option<&str>,
        password: Option<&str>,
        is_staff: bool,
        is_superuser: bool,
        extra: Profile,
    ) -> Result<User> {
        let email = match email.map(str::trim) {
            Some(email) if !email.is_empty() => email,
            _ => {
                return Err(AccountError::field(
                    "email",
                    "required",
                    "Email is required.",
                ));
            },
        };

        let mut errors = match extra.validate() {
            Ok(()) => ValidationErrors::new(),
            Err(errors) => errors,
        };
        let email = match EmailAddress::parse(email) {
            Ok(email) => Some(email),
            Err(err) => {
                errors.add("email", err);
                None
            },
        };
        let Some(email) = email.filter(|_| errors.is_empty()) else {
            return Err(errors.into());
        };

        let mut user = User {
            id: None,
            email,
            password: String::new(),
            profile: extra,
            is_staff,
            is_active: true,
            is_superuser,
            groups: BTreeSet::new(),
            user_permissions: BTreeSet::new(),
            date_joined: Utc::now(),
            last_login: None,
            created_by: None,
        };
        self.set_password(&mut user, password)?;

        Ok(user)
    }

    /// Build, hash and store a user.
    pub async fn create(
        &self,
        email: Option<&str>,
        password: Option<&str>,
        is_staff: bool,
        is_superuser: bool,
        extra: Profile,
    ) -> Result<User> {
        let user = self.prepare(email, password, is_staff, is_superuser, extra)?;
        self.save_new(&user).await
    }

    /// Store a user built by [`UserFactory::prepare`].
    pub async fn save_new(&self, user: &User) -> Result<User> {
        let user = self.repo.insert(user).await?;

        metrics::counter!(
            "accounts_created_total",
            "staff" => user.is_staff.to_string(),
            "superuser" => user.is_superuser.to_string()
        )
        .increment(1);
        tracing::info!(
            user_id = ?user.id,
            is_staff = user.is_staff,
            is_superuser = user.is_superuser,
            "account created"
        );

        Ok(user)
    }

    /// Create a regular user.
    pub async fn create_user(
        &self,
        email: Option<&str>,
        password: Option<&str>,
        extra: Profile,
    ) -> Result<User> {
        self.create(email, password, false, false, extra).await
    }

    /// Create a user with every permission.
    pub async fn create_superuser(
        &self,
        email: Option<&str>,
        password: Option<&str>,
        extra: Profile,
    ) -> Result<User> {
        self.create(email, password, true, true, extra).await
    }

    /// Replace the password of `user`, hashing it first.
    ///
    /// `None` makes the password unusable.
    pub fn set_password(&self, user: &mut User, raw: Option<&str>) -> Result<()> {
        user.password = match raw {
            Some(raw) => self.pwd.hash_password(raw)?,
            None => self.pwd.unusable_password(),
        };
        Ok(())
    }

    /// Check `raw` against the stored password of `user`.
    pub fn check_password(&self, user: &User, raw: &str) -> bool {
        self.pwd.verify_password(raw, &user.password)
    }
}
