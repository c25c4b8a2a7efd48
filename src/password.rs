//! Password hashing (Argon2id).
//!
//! Hashes are PHC strings, so parameters and salt travel with the hash and
//! verification works for hashes produced with older parameters.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};

/// Minimum password length in characters.
pub const MIN_PASSWORD_LEN: usize = 8;
/// Maximum password length in characters.
pub const MAX_PASSWORD_LEN: usize = 128;

/// m=19456 KiB, t=2, p=1.
const MEMORY_COST_KIB: u32 = 19456;
const TIME_COST: u32 = 2;
const PARALLELISM: u32 = 1;

#[derive(Debug)]
pub enum PasswordError {
    /// The stored hash could not be parsed. Indicates corrupt data.
    MalformedHash,
    /// Hashing failed.
    Hash(password_hash::Error),
    /// The blocking task running the hash panicked or was cancelled.
    Task,
}

impl std::fmt::Display for PasswordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PasswordError::MalformedHash => write!(f, "Stored password hash is malformed"),
            PasswordError::Hash(e) => write!(f, "Failed to hash password: {}", e),
            PasswordError::Task => write!(f, "Password hashing task failed"),
        }
    }
}

impl std::error::Error for PasswordError {}

fn hasher() -> Result<Argon2<'static>, PasswordError> {
    let params = Params::new(MEMORY_COST_KIB, TIME_COST, PARALLELISM, None)
        .map_err(|e| PasswordError::Hash(e.into()))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// Hash a password with a fresh random salt.
pub fn hash(plaintext: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    hasher()?
        .hash_password(plaintext.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(PasswordError::Hash)
}

/// Check a password against a stored hash. A mismatch is `Ok(false)`.
pub fn verify(plaintext: &str, stored: &str) -> Result<bool, PasswordError> {
    let parsed = PasswordHash::new(stored).map_err(|_| PasswordError::MalformedHash)?;
    match Argon2::default().verify_password(plaintext.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(password_hash::Error::Password) => Ok(false),
        Err(_) => Err(PasswordError::MalformedHash),
    }
}

/// [`hash`] on the blocking thread pool.
pub async fn hash_async(plaintext: String) -> Result<String, PasswordError> {
    tokio::task::spawn_blocking(move || hash(&plaintext))
        .await
        .map_err(|_| PasswordError::Task)?
}

/// [`verify`] on the blocking thread pool.
pub async fn verify_async(plaintext: String, stored: String) -> Result<bool, PasswordError> {
    tokio::task::spawn_blocking(move || verify(&plaintext, &stored))
        .await
        .map_err(|_| PasswordError::Task)?
}
