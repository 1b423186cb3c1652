//! Argon2id password hashing.

use anyhow::{Result, anyhow};
use argon2::{
    Argon2, PasswordHash, PasswordHasher as _, PasswordVerifier, password_hash::SaltString,
};
use rand::rngs::OsRng;

pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_PASSWORD_LEN: usize = 128;

#[derive(Clone)]
pub struct PasswordHasher {
    argon2: Argon2<'static>,
    /// Verified against for unknown emails so the response time does not
    /// reveal whether an account exists.
    dummy_hash: String,
}

impl PasswordHasher {
    /// # Errors
    /// Returns an error if the dummy hash cannot be produced.
    pub fn new() -> Result<Self> {
        let argon2 = Argon2::default();
        let dummy_hash = hash_with(&argon2, "storegate-dummy-password")?;
        Ok(Self { argon2, dummy_hash })
    }

    /// Hash a password with a fresh random salt (PHC string format).
    ///
    /// # Errors
    /// Returns an error if hashing fails.
    pub fn hash(&self, password: &str) -> Result<String> {
        hash_with(&self.argon2, password)
    }

    /// Malformed stored hashes verify as `false`.
    #[must_use]
    pub fn verify(&self, password: &str, stored_hash: &str) -> bool {
        PasswordHash::new(stored_hash).is_ok_and(|parsed| {
            self.argon2
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
    }

    /// Burns the same work as a real verification and always fails.
    pub fn verify_dummy(&self, password: &str) -> bool {
        let _ = self.verify(password, &self.dummy_hash);
        false
    }
}

fn hash_with(argon2: &Argon2<'static>, password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| anyhow!("password hashing failed: {err}"))
}

/// Length bounds are counted in characters, not bytes.
#[must_use]
pub fn password_length_ok(password: &str) -> bool {
    let len = password.chars().count();
    (MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&len)
}
