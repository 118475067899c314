//! Email logic management.

use std::fmt;
use std::sync::LazyLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use validator::{ValidateEmail, ValidationError};

/// Maximum length of an email address.
pub const MAX_LENGTH: usize = 255;

static EMAIL_CHARSET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\w.@+-]+$").expect("email charset pattern is valid")
});

/// Value object of a normalized email address.
///
/// Normalization trims surrounding whitespace and folds the whole address to
/// lower case, so `" A@B.com "` and `"a@b.com"` are the same identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EmailAddress(String);

impl EmailAddress {
    /// Converts a string into a normalized [`EmailAddress`].
    ///
    /// # Errors
    ///
    /// Returns `Err` if the address is blank, longer than [`MAX_LENGTH`],
    /// contains characters other than letters, digits and `@ . + - _`, or is
    /// not a well-formed address.
    pub fn parse(email: impl AsRef<str>) -> Result<Self, ValidationError> {
        let normalized = normalize(email.as_ref());
        validate(&normalized)?;
        Ok(Self(normalized))
    }

    /// Returns the same string as a string slice `&str`.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for EmailAddress {
    type Error = ValidationError;

    fn try_from(email: String) -> Result<Self, Self::Error> {
        Self::parse(email)
    }
}

impl From<EmailAddress> for String {
    fn from(email: EmailAddress) -> Self {
        email.0
    }
}

impl AsRef<str> for EmailAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Canonical form of an address.
pub fn normalize(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Check an address against record-level invariants.
pub fn validate(email: &str) -> Result<(), ValidationError> {
    if email.is_empty() {
        return Err(ValidationError::new("required")
            .with_message("Email is required.".into()));
    }

    if email.chars().count() > MAX_LENGTH {
        return Err(ValidationError::new("length").with_message(
            "Ensure this value has at most 255 characters.".into(),
        ));
    }

    if !EMAIL_CHARSET.is_match(email) {
        return Err(ValidationError::new("invalid").with_message(
            "Enter a valid email. This value may contain only letters, numbers and @/./+/-/_ characters.".into(),
        ));
    }

    if !email.validate_email() {
        return Err(ValidationError::new("email")
            .with_message("Enter a valid email address.".into()));
    }

    Ok(())
}

/// `validator` hook for string fields holding an email.
pub fn validate_email_field(email: &str) -> Result<(), ValidationError> {
    validate(&normalize(email))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        let email = EmailAddress::parse("  John.Doe@Example.COM ").unwrap();
        assert_eq!(email.as_str(), "john.doe@example.com");
        assert_eq!(email, EmailAddress::parse("john.doe@example.com").unwrap());
    }

    #[test]
    fn test_charset() {
        assert!(EmailAddress::parse("first+tag_x-y@mail.example.org").is_ok());

        let err = EmailAddress::parse("john doe@example.com").unwrap_err();
        assert_eq!(err.code, "invalid");
        let err = EmailAddress::parse("john/doe@example.com").unwrap_err();
        assert_eq!(err.code, "invalid");
    }

    #[test]
    fn test_format() {
        assert_eq!(EmailAddress::parse("no-at-sign").unwrap_err().code, "email");
        assert_eq!(EmailAddress::parse("a@@b.com").unwrap_err().code, "email");
    }

    #[test]
    fn test_deserialize_normalizes() {
        let email: EmailAddress = serde_json::from_str("\" A@B.COM \"").unwrap();
        assert_eq!(email.as_str(), "a@b.com");
        assert_eq!(serde_json::to_string(&email).unwrap(), "\"a@b.com\"");

        assert!(serde_json::from_str::<EmailAddress>("\"not an email at all\"").is_err());
        assert!(serde_json::from_str::<EmailAddress>("\"\"").is_err());
    }

    #[test]
    fn test_blank_and_length() {
        assert_eq!(EmailAddress::parse("   ").unwrap_err().code, "required");

        let long = format!("{}@example.com", "a".repeat(250));
        assert_eq!(EmailAddress::parse(long).unwrap_err().code, "length");
    }
}
