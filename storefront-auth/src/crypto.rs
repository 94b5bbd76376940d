//! Cryptographic utilities for the gateway

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use subtle::ConstantTimeEq;

/// Default bcrypt cost factor
pub const BCRYPT_COST: u32 = 12;

/// Random bytes behind every one-time token, OIDC state and nonce
const TOKEN_BYTES: usize = 32;

/// Prefixes bcrypt emits; anything else stored as a credential is legacy plaintext.
/// A prefixed value that is not a well-formed hash fails verification.
const BCRYPT_PREFIXES: [&str; 4] = ["$2a$", "$2b$", "$2x$", "$2y$"];

/// bcrypt ignores input past this many bytes
pub const MAX_PASSWORD_BYTES: usize = 72;

/// Hash a password with bcrypt
pub fn hash_password(password: &str, cost: u32) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(password, cost)
}

/// Verify a password against a bcrypt hash
pub fn verify_password(password: &str, hash: &str) -> Result<bool, bcrypt::BcryptError> {
    bcrypt::verify(password, hash)
}

/// Whether a stored credential is a bcrypt hash rather than legacy plaintext
pub fn is_password_hash(stored: &str) -> bool {
    BCRYPT_PREFIXES.iter().any(|p| stored.starts_with(p))
}

/// Constant-time comparison against a legacy plaintext credential
pub fn legacy_password_matches(stored: &str, candidate: &str) -> bool {
    stored.as_bytes().ct_eq(candidate.as_bytes()).into()
}

/// Generate an unguessable URL-safe token
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generate a fresh user id for password registrations
pub fn generate_uid() -> String {
    uuid::Uuid::new_v4().to_string()
}
