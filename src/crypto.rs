//! Cryptogragic logics.

use argon2::password_hash::{
    PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::{Argon2, Params, Version};
use rand::distributions::{Alphanumeric, DistString};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use crate::config::Argon2 as ArgonConfig;

/// Prefix marking a password that can never be verified.
pub const UNUSABLE_PASSWORD_PREFIX: char = '!';
const UNUSABLE_PASSWORD_SUFFIX_LENGTH: usize = 40;

type Result<T> = std::result::Result<T, CryptoError>;

#[derive(thiserror::Error, Debug)]
pub enum CryptoError {
    #[error("argon2 error: {0}")]
    Argon2(String),
}

/// Password manager that uses Argon2id and PHC string format for hashing and
/// verification.
pub struct PasswordManager {
    params: Params,
}

impl PasswordManager {
    /// Create a new [`PasswordManager`].
    pub fn new(config: Option<ArgonConfig>) -> Result<Self> {
        let config = config.unwrap_or_default();

        let params = Params::new(
            config.memory_cost,
            config.iterations,
            config.parallelism,
            Some(config.hash_length),
        )
        .map_err(|err| CryptoError::Argon2(err.to_string()))?;

        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(
            argon2::Algorithm::Argon2id,
            Version::V0x13,
            self.params.clone(),
        )
    }

    /// Hash password using Argon2id.
    pub fn hash_password(&self, password: impl AsRef<[u8]>) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(password.as_ref(), &salt)
            .map_err(|e| CryptoError::Argon2(e.to_string()))?;

        Ok(hash.to_string())
    }

    /// Produce a value that is stored in place of a hash when a user has no
    /// password. It never verifies.
    pub fn unusable_password(&self) -> String {
        let suffix =
            Alphanumeric.sample_string(&mut OsRng, UNUSABLE_PASSWORD_SUFFIX_LENGTH);
        format!("{UNUSABLE_PASSWORD_PREFIX}{suffix}")
    }

    /// Verify password against a PHC.
    pub fn verify_password(
        &self,
        password: impl AsRef<[u8]>,
        phc_hash: &str,
    ) -> bool {
        if phc_hash.starts_with(UNUSABLE_PASSWORD_PREFIX) {
            return false;
        }

        let Ok(parsed) = PasswordHash::new(phc_hash) else {
            return false;
        };

        self.argon2()
            .verify_password(password.as_ref(), &parsed)
            .is_ok()
    }
}

/// Digest data into hex-encoded SHA256.
pub fn digest(data: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
pub(crate) fn fast_config() -> ArgonConfig {
    ArgonConfig {
        memory_cost: 1024,
        iterations: 1,
        parallelism: 1,
        hash_length: 32,
    }
}
