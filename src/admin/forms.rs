//! Admin forms creating and editing users.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::error::Result;
use crate::user::{EmailAddress, Profile, User, UserFactory};

/// Minimum password length.
pub const PASSWORD_MIN_LENGTH: usize = 8;
/// Maximum password length.
pub const PASSWORD_MAX_LENGTH: usize = 255;

fn into_result(errors: ValidationErrors) -> std::result::Result<(), ValidationErrors> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn password_mismatch() -> ValidationError {
    ValidationError::new("password_mismatch")
        .with_message("The two password fields didn't match.".into())
}

/// Check a password against the password policy.
pub fn validate_password(
    password: &str,
    email: Option<&str>,
) -> std::result::Result<(), ValidationError> {
    let length = password.chars().count();

    if length < PASSWORD_MIN_LENGTH {
        return Err(ValidationError::new("password_too_short").with_message(
            "Password must contain at least 8 characters.".into(),
        ));
    }

    if length > PASSWORD_MAX_LENGTH {
        return Err(ValidationError::new("password_too_long").with_message(
            "Password must contain at most 255 characters.".into(),
        ));
    }

    if password.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::new("password_entirely_numeric")
            .with_message("This password is entirely numeric.".into()));
    }

    if email.is_some_and(|email| email.trim().eq_ignore_ascii_case(password)) {
        return Err(ValidationError::new("password_too_similar").with_message(
            "The password is too similar to the email address.".into(),
        ));
    }

    Ok(())
}

/// Permission fields shared by the add screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Permissions {
    pub is_active: bool,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub groups: BTreeSet<String>,
    pub user_permissions: BTreeSet<String>,
}

impl Default for Permissions {
    fn default() -> Self {
        Self {
            is_active: true,
            is_staff: false,
            is_superuser: false,
            groups: BTreeSet::new(),
            user_permissions: BTreeSet::new(),
        }
    }
}

/// Add form: an email, a confirmed password and the permission fields.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UserCreationForm {
    #[validate(custom(function = "crate::user::email::validate_email_field"))]
    pub email: String,
    pub password1: String,
    pub password2: String,
    #[serde(flatten)]
    pub permissions: Permissions,
}

impl UserCreationForm {
    /// Validate every field, reporting password issues on `password2`.
    pub fn clean(&self) -> std::result::Result<(), ValidationErrors> {
        let mut errors = match self.validate() {
            Ok(()) => ValidationErrors::new(),
            Err(errors) => errors,
        };

        if self.password1 != self.password2 {
            errors.add("password2", password_mismatch());
        } else if let Err(err) =
            validate_password(&self.password2, Some(&self.email))
        {
            errors.add("password2", err);
        }

        into_result(errors)
    }

    /// Build the unsaved user described by this form.
    pub fn prepare(&self, factory: &UserFactory) -> Result<User> {
        self.clean()?;

        let perms = &self.permissions;
        let mut user = factory.prepare(
            Some(&self.email),
            Some(&self.password1),
            perms.is_staff,
            perms.is_superuser,
            Profile::default(),
        )?;
        user.is_active = perms.is_active;
        user.groups = perms.groups.clone();
        user.user_permissions = perms.user_permissions.clone();

        Ok(user)
    }

    /// Create the user described by this form.
    pub async fn save(&self, factory: &UserFactory) -> Result<User> {
        let user = self.prepare(factory)?;
        factory.save_new(&user).await
    }
}

/// Change form: every editable field of a user.
///
/// The password is not part of it, see [`AdminPasswordChangeForm`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserChangeForm {
    pub email: String,
    #[serde(flatten)]
    pub profile: Profile,
    pub is_active: bool,
    pub is_staff: bool,
    pub is_superuser: bool,
    #[serde(default)]
    pub groups: BTreeSet<String>,
    #[serde(default)]
    pub user_permissions: BTreeSet<String>,
    pub last_login: Option<DateTime<Utc>>,
    pub date_joined: DateTime<Utc>,
}

impl From<&User> for UserChangeForm {
    fn from(user: &User) -> Self {
        Self {
            email: user.email.to_string(),
            profile: user.profile.clone(),
            is_active: user.is_active,
            is_staff: user.is_staff,
            is_superuser: user.is_superuser,
            groups: user.groups.clone(),
            user_permissions: user.user_permissions.clone(),
            last_login: user.last_login,
            date_joined: user.date_joined,
        }
    }
}

impl UserChangeForm {
    /// Validate every field, profile fields included.
    pub fn clean(&self) -> std::result::Result<(), ValidationErrors> {
        let mut errors = match self.profile.validate() {
            Ok(()) => ValidationErrors::new(),
            Err(errors) => errors,
        };

        if let Err(err) = crate::user::email::validate_email_field(&self.email) {
            errors.add("email", err);
        }

        into_result(errors)
    }

    /// Copy the form onto `user`.
    ///
    /// Email uniqueness is checked by the store when `user` is saved.
    pub fn apply(self, user: &mut User) -> Result<()> {
        self.clean()?;

        user.email = EmailAddress::parse(&self.email).map_err(|err| {
            let mut errors = ValidationErrors::new();
            errors.add("email", err);
            errors
        })?;
        user.profile = self.profile;
        user.is_active = self.is_active;
        user.is_staff = self.is_staff;
        user.is_superuser = self.is_superuser;
        user.groups = self.groups;
        user.user_permissions = self.user_permissions;
        user.last_login = self.last_login;
        user.date_joined = self.date_joined;

        Ok(())
    }
}

/// Admin form replacing the password of a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminPasswordChangeForm {
    pub password1: String,
    pub password2: String,
}

impl AdminPasswordChangeForm {
    /// Validate both entries for `user`.
    pub fn clean(&self, user: &User) -> std::result::Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.password1 != self.password2 {
            errors.add("password2", password_mismatch());
        } else if let Err(err) =
            validate_password(&self.password2, Some(user.email.as_str()))
        {
            errors.add("password2", err);
        }

        into_result(errors)
    }

    /// Hash and set the new password on `user`.
    pub fn apply(&self, factory: &UserFactory, user: &mut User) -> Result<()> {
        self.clean(user)?;
        factory.set_password(user, Some(&self.password1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AccountError;
    use crate::user::factory::tests::factory;

    fn creation(email: &str, password1: &str, password2: &str) -> UserCreationForm {
        UserCreationForm {
            email: email.into(),
            password1: password1.into(),
            password2: password2.into(),
            permissions: Permissions::default(),
        }
    }

    fn field_codes(errors: &ValidationErrors, field: &str) -> Vec<String> {
        errors
            .field_errors()
            .get(field)
            .map(|issues| issues.iter().map(|e| e.code.to_string()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_password_policy() {
        assert!(validate_password("P$soW%920$n&", None).is_ok());
        assert_eq!(validate_password("short", None).unwrap_err().code, "password_too_short");
        assert_eq!(
            validate_password("12345678901", None).unwrap_err().code,
            "password_entirely_numeric"
        );
        assert_eq!(
            validate_password(&"x".repeat(256), None).unwrap_err().code,
            "password_too_long"
        );
        assert_eq!(
            validate_password("John@Example.com", Some("john@example.com"))
                .unwrap_err()
                .code,
            "password_too_similar"
        );
    }

    #[test]
    fn test_creation_password_mismatch() {
        let errors = creation("john@example.com", "P$soW%920$n&", "P$soW%920$n")
            .clean()
            .unwrap_err();

        assert_eq!(field_codes(&errors, "password2"), vec!["password_mismatch"]);
        assert!(field_codes(&errors, "email").is_empty());
    }

    #[test]
    fn test_creation_reports_every_field() {
        let errors = creation("john doe@example.com", "1234", "1234")
            .clean()
            .unwrap_err();

        assert_eq!(field_codes(&errors, "email"), vec!["invalid"]);
        assert_eq!(field_codes(&errors, "password2"), vec!["password_too_short"]);
    }

    #[tokio::test]
    async fn test_creation_save() {
        let factory = factory();
        let user = creation(" John@Example.com", "P$soW%920$n&", "P$soW%920$n&")
            .save(&factory)
            .await
            .unwrap();

        assert_eq!(user.email.as_str(), "john@example.com");
        assert!(!user.is_staff);
        assert!(factory.check_password(&user, "P$soW%920$n&"));

        let err = creation("JOHN@example.com", "P$soW%920$n&", "P$soW%920$n&")
            .save(&factory)
            .await
            .unwrap_err();
        assert!(matches!(err, AccountError::UniquenessConflict));
    }

    #[test]
    fn test_creation_applies_permissions() {
        let form: UserCreationForm = serde_json::from_value(serde_json::json!({
            "email": "editor@example.com",
            "password1": "P$soW%920$n&",
            "password2": "P$soW%920$n&",
            "is_staff": true,
            "groups": ["editors"],
            "user_permissions": ["accounts.change_user"],
        }))
        .unwrap();
        let user = form.prepare(&factory()).unwrap();

        assert!(user.is_active);
        assert!(user.is_staff);
        assert!(!user.is_superuser);
        assert!(user.groups.contains("editors"));
        assert!(user.has_perm("accounts.change_user"));

        let form: UserCreationForm = serde_json::from_value(serde_json::json!({
            "email": "plain@example.com",
            "password1": "P$soW%920$n&",
            "password2": "P$soW%920$n&",
        }))
        .unwrap();
        assert_eq!(form.permissions, Permissions::default());
    }

    #[test]
    fn test_creation_fields_match_add_screen() {
        let form = creation("john@example.com", "P$soW%920$n&", "P$soW%920$n&");
        let value = serde_json::to_value(&form).unwrap();

        for fieldset in crate::admin::layout::ADD_FIELDSETS {
            for field in fieldset.fields {
                assert!(value.get(*field).is_some(), "missing field {field}");
            }
        }
    }

    #[tokio::test]
    async fn test_change_form_apply() {
        let factory = factory();
        let mut user = factory
            .create_user(Some("john@example.com"), None, Profile::default())
            .await
            .unwrap();
        let password = user.password().to_owned();

        let mut form = UserChangeForm::from(&user);
        form.email = "Johnny@Example.com".into();
        form.profile.first_name = Some("Johnny".into());
        form.is_staff = true;
        form.apply(&mut user).unwrap();

        assert_eq!(user.email.as_str(), "johnny@example.com");
        assert_eq!(user.short_name(), "Johnny");
        assert!(user.is_staff);
        assert_eq!(user.password(), password);
    }

    #[test]
    fn test_change_form_validation() {
        let mut user = crate::user::tests::user("john@example.com");
        let mut form = UserChangeForm::from(&user);
        form.email = "john/doe@example.com".into();
        form.profile.title = Some("t".repeat(65));

        let err = form.apply(&mut user).unwrap_err();
        let AccountError::Validation(errors) = err else {
            panic!("expected a validation error");
        };
        assert_eq!(field_codes(&errors, "email"), vec!["invalid"]);
        assert_eq!(field_codes(&errors, "title"), vec!["length"]);
        assert_eq!(user.email.as_str(), "john@example.com");
    }

    #[test]
    fn test_change_form_deserializes_flat() {
        let form: UserChangeForm = serde_json::from_value(serde_json::json!({
            "email": "john@example.com",
            "first_name": "John",
            "sex": "F",
            "lat": 1.5,
            "is_active": true,
            "is_staff": false,
            "is_superuser": false,
            "last_login": null,
            "date_joined": "2024-01-01T00:00:00Z",
        }))
        .unwrap();

        assert_eq!(form.profile.first_name.as_deref(), Some("John"));
        assert_eq!(form.profile.sex, crate::user::Sex::Female);
        assert_eq!(form.profile.lat, Some(1.5));
        assert!(form.groups.is_empty());
    }

    #[test]
    fn test_admin_password_change() {
        let factory = factory();
        let mut user = crate::user::tests::user("john@example.com");

        let form = AdminPasswordChangeForm {
            password1: "N3w-P4ssw0rd!".into(),
            password2: "N3w-P4ssw0rd?".into(),
        };
        assert!(form.apply(&factory, &mut user).is_err());

        let form = AdminPasswordChangeForm {
            password1: "N3w-P4ssw0rd!".into(),
            password2: "N3w-P4ssw0rd!".into(),
        };
        form.apply(&factory, &mut user).unwrap();
        assert!(factory.check_password(&user, "N3w-P4ssw0rd!"));
    }
}
