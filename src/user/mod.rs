//! Identity record and everything that creates or queries it.

pub mod email;
pub(crate) mod factory;
mod location;
mod memory;
mod postgres;
mod repository;

pub use email::EmailAddress;
pub use factory::*;
pub use location::*;
pub use memory::*;
pub use postgres::*;
pub use repository::*;

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::Result;
use crate::mail::Mailer;

const DEFAULT_AVATAR_SIZE: u32 = 16;

/// Primary key of a persisted [`User`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sex choices, stored as a single letter.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sex {
    #[default]
    #[serde(rename = "M")]
    Male,
    #[serde(rename = "F")]
    Female,
}

impl Sex {
    /// Letter stored in database.
    pub fn code(self) -> &'static str {
        match self {
            Sex::Male => "M",
            Sex::Female => "F",
        }
    }

    /// Parse the stored letter, falling back to the default choice.
    pub fn from_code(code: &str) -> Self {
        match code {
            "F" => Sex::Female,
            _ => Sex::Male,
        }
    }
}

/// Personal data attached to a [`User`].
///
/// Everything here is optional and may be passed to the factory as extra
/// fields.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Profile {
    #[validate(length(max = 64, message = "Username must be 64 characters or fewer."))]
    pub username: Option<String>,
    #[validate(length(max = 100, message = "Last name must be 100 characters or fewer."))]
    pub last_name: Option<String>,
    #[validate(length(max = 100, message = "First name must be 100 characters or fewer."))]
    pub first_name: Option<String>,
    #[validate(length(max = 100, message = "Middle name must be 100 characters or fewer."))]
    pub middle_name: Option<String>,
    #[validate(range(max = 2147483647, message = "Birth year is out of range."))]
    pub birth_year: Option<u32>,
    #[validate(range(max = 2147483647, message = "Birth month is out of range."))]
    pub birth_month: Option<u32>,
    #[validate(range(max = 2147483647, message = "Birth day is out of range."))]
    pub birth_day: Option<u32>,
    #[serde(default)]
    pub sex: Sex,
    #[validate(length(max = 16, message = "Phone number must be 16 characters or fewer."))]
    pub phone: Option<String>,
    #[validate(length(max = 256, message = "Address must be 256 characters or fewer."))]
    pub address: Option<String>,
    #[validate(length(max = 64, message = "Title must be 64 characters or fewer."))]
    pub title: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    #[serde(default)]
    pub want_notify_email: bool,
    #[serde(default)]
    pub want_notify_news: bool,
}

/// Application user, identified by its email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Option<UserId>,
    pub email: EmailAddress,
    #[serde(skip)]
    pub(crate) password: String,
    #[serde(flatten)]
    pub profile: Profile,
    pub is_staff: bool,
    pub is_active: bool,
    pub is_superuser: bool,
    pub groups: BTreeSet<String>,
    pub user_permissions: BTreeSet<String>,
    pub date_joined: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
    pub created_by: Option<UserId>,
}

/// Avatar and position of a user, as shown on maps.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AvatarDescriptor {
    pub avatar: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
}

impl User {
    /// Returns `true` until the record is stored.
    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }

    /// Stored password, hashed or unusable.
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Last, first and middle names joined, or the email if none is set.
    pub fn full_name(&self) -> String {
        let p = &self.profile;
        let name = format!(
            "{} {} {}",
            p.last_name.as_deref().unwrap_or_default(),
            p.first_name.as_deref().unwrap_or_default(),
            p.middle_name.as_deref().unwrap_or_default(),
        );
        let name = name.trim();

        if name.is_empty() {
            self.email.to_string()
        } else {
            name.to_owned()
        }
    }

    /// First name, or the email if none is set.
    pub fn short_name(&self) -> String {
        match self.profile.first_name.as_deref() {
            Some(first_name) if !first_name.is_empty() => first_name.to_owned(),
            _ => self.email.to_string(),
        }
    }

    /// Send an email to this user.
    ///
    /// `from` falls back to the mailer default sender.
    pub async fn notify(
        &self,
        mailer: &dyn Mailer,
        subject: &str,
        message: &str,
        from: Option<&str>,
    ) -> Result<()> {
        mailer
            .send_mail(subject, message, from, &[self.email.as_str()])
            .await
            .inspect_err(|err| {
                tracing::warn!(user_id = ?self.id, error = %err, "cannot notify user");
            })
    }

    /// Hash used by avatar services to look this user up.
    pub fn avatar_hash(&self) -> String {
        crate::crypto::digest(self.email.as_str().trim().to_lowercase())
    }

    /// Avatar URL of this user on `host`.
    pub fn avatar_url(&self, host: &str, secure: bool) -> String {
        let scheme = if secure { "https" } else { "http" };
        format!("{scheme}://{host}/avatar/{}.jpg", self.avatar_hash())
    }

    /// Avatar URL with a size hint, plus coordinates when both are known.
    pub fn avatar_descriptor(
        &self,
        host: &str,
        secure: bool,
        size: Option<u32>,
    ) -> AvatarDescriptor {
        let size = size.unwrap_or(DEFAULT_AVATAR_SIZE);
        let avatar = format!("{}?s={size}", self.avatar_url(host, secure));

        match (self.profile.lat, self.profile.lng) {
            (Some(lat), Some(lng)) => AvatarDescriptor {
                avatar,
                lat: Some(lat),
                lng: Some(lng),
            },
            _ => AvatarDescriptor {
                avatar,
                lat: None,
                lng: None,
            },
        }
    }

    /// Whether this user holds `codename`, e.g. `accounts.change_user`.
    pub fn has_perm(&self, codename: &str) -> bool {
        if !self.is_active {
            return false;
        }

        self.is_superuser || self.user_permissions.contains(codename)
    }

    /// Both coordinates are known.
    pub fn has_location(&self) -> bool {
        self.profile.lat.is_some() && self.profile.lng.is_some()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::mail::tests::{FailingMailer, RecordingMailer};

    pub(crate) fn user(email: &str) -> User {
        User {
            id: None,
            email: EmailAddress::parse(email).unwrap(),
            password: String::from("!unusable"),
            profile: Profile::default(),
            is_staff: false,
            is_active: true,
            is_superuser: false,
            groups: BTreeSet::new(),
            user_permissions: BTreeSet::new(),
            date_joined: Utc::now(),
            last_login: None,
            created_by: None,
        }
    }

    #[test]
    fn test_full_name() {
        let mut u = user("john@example.com");
        assert_eq!(u.full_name(), "john@example.com");

        u.profile.last_name = Some("Doe".into());
        u.profile.first_name = Some("John".into());
        assert_eq!(u.full_name(), "Doe John");

        u.profile.middle_name = Some("Q".into());
        assert_eq!(u.full_name(), "Doe John Q");

        u.profile.last_name = None;
        u.profile.middle_name = None;
        assert_eq!(u.full_name(), "John");
    }

    #[test]
    fn test_full_name_blank_parts() {
        let mut u = user("john@example.com");
        u.profile.last_name = Some(String::new());
        u.profile.first_name = Some("  ".into());
        assert_eq!(u.full_name(), "john@example.com");
    }

    #[test]
    fn test_short_name() {
        let mut u = user("john@example.com");
        assert_eq!(u.short_name(), "john@example.com");

        u.profile.first_name = Some(String::new());
        assert_eq!(u.short_name(), "john@example.com");

        u.profile.first_name = Some("John".into());
        assert_eq!(u.short_name(), "John");
    }

    #[test]
    fn test_avatar_descriptor() {
        let mut u = user("Test@Example.com");
        let hash =
            "973dfe463ec85785f5f95af5ba3906eedb2d931c24e69824a89ea65dba4e813b";

        let descriptor = u.avatar_descriptor("www.gravatar.com", true, None);
        assert_eq!(
            descriptor.avatar,
            format!("https://www.gravatar.com/avatar/{hash}.jpg?s=16")
        );
        assert_eq!(
            serde_json::to_value(&descriptor).unwrap(),
            serde_json::json!({ "avatar": descriptor.avatar })
        );

        u.profile.lat = Some(55.75);
        let descriptor = u.avatar_descriptor("www.gravatar.com", false, Some(64));
        assert!(descriptor.avatar.starts_with("http://"));
        assert!(descriptor.avatar.ends_with("?s=64"));
        assert_eq!(descriptor.lat, None);

        u.profile.lng = Some(37.61);
        let descriptor = u.avatar_descriptor("www.gravatar.com", false, Some(64));
        assert_eq!(descriptor.lat, Some(55.75));
        assert_eq!(descriptor.lng, Some(37.61));
    }

    #[test]
    fn test_has_perm() {
        let mut u = user("staff@example.com");
        assert!(!u.has_perm("accounts.change_user"));

        u.user_permissions.insert("accounts.change_user".into());
        assert!(u.has_perm("accounts.change_user"));
        assert!(!u.has_perm("accounts.delete_user"));

        u.is_superuser = true;
        assert!(u.has_perm("accounts.delete_user"));

        u.is_active = false;
        assert!(!u.has_perm("accounts.change_user"));
    }

    #[test]
    fn test_serialization_hides_password() {
        let mut u = user("john@example.com");
        u.profile.first_name = Some("John".into());
        let value = serde_json::to_value(&u).unwrap();

        assert!(value.get("password").is_none());
        assert_eq!(value["email"], "john@example.com");
        assert_eq!(value["first_name"], "John");
        assert_eq!(value["sex"], "M");
    }

    #[tokio::test]
    async fn test_deserialized_email_is_normalized() {
        let repo = MemoryUserRepository::new();
        repo.insert(&user("a@b.com")).await.unwrap();

        let mut value = serde_json::to_value(user("a@b.com")).unwrap();
        value["email"] = " A@B.COM ".into();
        let twin: User = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(twin.email.as_str(), "a@b.com");

        let err = repo.insert(&twin).await.unwrap_err();
        assert!(matches!(err, crate::error::AccountError::UniquenessConflict));

        value["email"] = "not an email at all".into();
        assert!(serde_json::from_value::<User>(value).is_err());
    }

    #[tokio::test]
    async fn test_notify() {
        let u = user("john@example.com");
        let mailer = RecordingMailer::default();

        u.notify(&mailer, "Hello", "Welcome aboard.", None)
            .await
            .unwrap();

        let sent = mailer.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, vec!["john@example.com".to_string()]);
        assert_eq!(sent[0].subject, "Hello");
        assert_eq!(sent[0].from, None);
    }

    #[tokio::test]
    async fn test_notify_propagates_failure() {
        let u = user("john@example.com");
        let err = u
            .notify(&FailingMailer, "Hello", "Welcome aboard.", Some("noreply@example.com"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            crate::error::AccountError::ExternalService { .. }
        ));
    }
}
