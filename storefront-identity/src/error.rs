//! Error types for identity token verification

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    #[error("Unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("No signing key with id {0}")]
    UnknownKey(String),

    #[error("Issuer mismatch: expected one of {expected:?}, got {actual}")]
    IssuerMismatch { expected: Vec<String>, actual: String },

    #[error("Audience mismatch: expected {expected}")]
    AudienceMismatch { expected: String },

    #[error("Token use mismatch: expected {expected}, got {actual}")]
    TokenUseMismatch { expected: String, actual: String },

    #[error("Missing claim: {0}")]
    MissingClaim(&'static str),

    #[error("Key set fetch failed for {url}: {reason}")]
    KeyFetch { url: String, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

impl Error {
    /// Whether the failure came from the provider being unreachable rather
    /// than from the token itself
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::KeyFetch { .. })
    }
}
