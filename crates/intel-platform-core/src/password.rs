//! Password hashing and verification.

use crate::PlatformError;

/// Bcrypt cost factor used for every registration.
pub const BCRYPT_COST: u32 = bcrypt::DEFAULT_COST;

/// Hash a plaintext password with bcrypt.
///
/// Every call draws a fresh random salt, so hashing the same password twice
/// yields two different strings.
///
/// # Errors
/// Returns [`PlatformError::Hashing`] if bcrypt rejects the cost or input.
pub fn hash_password(password: &str, cost: u32) -> Result<String, PlatformError> {
    bcrypt::hash(password, cost).map_err(|err| PlatformError::Hashing(err.to_string()))
}

/// Verify a plaintext password against a stored bcrypt hash.
///
/// # Errors
/// Returns [`PlatformError::Hashing`] when `hash` is not a parseable bcrypt hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, PlatformError> {
    bcrypt::verify(password, hash).map_err(|err| PlatformError::Hashing(err.to_string()))
}
