//! Storefront identity verification
//!
//! Verifies identity-provider tokens for the storefront auth gateway:
//! - Providers publish signing keys as a JWKS document
//! - ID and access tokens are RS256 JWTs signed by one of those keys
//! - Verification binds a token to an issuer, an audience and a token use

pub mod claims;
pub mod error;
pub mod keys;
pub mod verifier;

pub use claims::{IdentityClaims, TokenUse};
pub use error::Error;
pub use keys::{KeySetFetcher, StaticKeySet};
pub use verifier::{JwksVerifier, TokenVerifier, VerifierConfig};

/// Result type for storefront-identity operations
pub type Result<T> = std::result::Result<T, Error>;
