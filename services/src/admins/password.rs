//! Admin password hashing.
//!
//! Passwords are stored as Argon2id PHC strings, which embed the salt and
//! parameters, so verification needs nothing but the stored hash.

use argon2::Argon2;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};

/// Errors from hashing or parsing a stored hash.
#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("Password hashing failed: {0}")]
    Hash(String),

    #[error("Stored password hash is malformed: {0}")]
    MalformedHash(String),
}

/// Hashes `password` with a fresh random salt.
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::encode_b64(&rand::random::<[u8; 16]>())
        .map_err(|e| PasswordError::Hash(e.to_string()))?;

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| PasswordError::Hash(e.to_string()))
}

/// Checks `password` against a PHC string produced by [`hash_password`].
///
/// A wrong password is `Ok(false)`; only an unreadable hash is an error.
pub fn verify_password(password: &str, stored_hash: &str) -> Result<bool, PasswordError> {
    let parsed =
        PasswordHash::new(stored_hash).map_err(|e| PasswordError::MalformedHash(e.to_string()))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("correct horse").expect("should hash");

        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("correct horse", &hash).expect("should verify"));
        assert!(!verify_password("battery staple", &hash).expect("should verify"));
    }

    #[test]
    fn test_salts_differ() {
        let first = hash_password("same").expect("should hash");
        let second = hash_password("same").expect("should hash");

        assert_ne!(first, second);
    }

    #[test]
    fn test_malformed_hash() {
        let result = verify_password("anything", "not-a-phc-string");

        assert!(matches!(result, Err(PasswordError::MalformedHash(_))));
    }
}
