//! One-way salted hashing for `Secret` attributes (Argon2id, PHC strings).

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use log::warn;

/// Hashes `plain` with a fresh random salt.
///
/// Two calls with the same input never return the same string.
pub fn hash_secret(plain: &str) -> Result<String, String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| format!("secret hashing failed: {err}"))
}

/// Returns whether `value` is a well-formed PHC hash string.
pub fn is_secret_hash(value: &str) -> bool {
    PasswordHash::new(value).is_ok()
}

/// Checks `candidate` against a stored PHC hash.
///
/// A malformed stored hash never verifies.
pub fn verify_secret(candidate: &str, stored_hash: &str) -> bool {
    let parsed = match PasswordHash::new(stored_hash) {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!("event=secret_verify module=model status=error error_code=malformed_hash error={err}");
            return false;
        }
    };

    Argon2::default()
        .verify_password(candidate.as_bytes(), &parsed)
        .is_ok()
}
