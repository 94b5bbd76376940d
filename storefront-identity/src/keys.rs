//! Provider signing keys
//!
//! Identity providers publish their RS256 verification keys as a JWKS
//! document. Fetching is abstracted so the gateway can use HTTP while tests
//! use a fixed key set.

use std::collections::HashMap;

use async_trait::async_trait;
use jsonwebtoken::jwk::{AlgorithmParameters, JwkSet};
use jsonwebtoken::DecodingKey;

use crate::Result;

/// Trait for fetching a provider's published key set
///
/// This allows different implementations:
/// - HTTP fetcher (production, lives in the gateway)
/// - Static key set (testing, offline deployments)
#[async_trait]
pub trait KeySetFetcher: Send + Sync {
    /// Fetch the JWKS document at `url`
    async fn fetch(&self, url: &str) -> Result<JwkSet>;
}

/// A fixed key set, returned regardless of the requested URL
#[derive(Debug, Clone)]
pub struct StaticKeySet {
    keys: JwkSet,
}

impl StaticKeySet {
    pub fn new(keys: JwkSet) -> Self {
        Self { keys }
    }

    /// Parse a JWKS JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(Self::new(serde_json::from_str(json)?))
    }
}

#[async_trait]
impl KeySetFetcher for StaticKeySet {
    async fn fetch(&self, _url: &str) -> Result<JwkSet> {
        Ok(self.keys.clone())
    }
}

/// Build a `kid -> key` index of the RSA keys in a set
///
/// Keys without a `kid` or of another family are skipped: every token the
/// gateway accepts names its key and is RS256-signed.
pub(crate) fn index_key_set(set: &JwkSet) -> HashMap<String, DecodingKey> {
    let mut index = HashMap::new();
    for jwk in &set.keys {
        let Some(kid) = jwk.common.key_id.clone() else {
            continue;
        };
        if !matches!(jwk.algorithm, AlgorithmParameters::RSA(_)) {
            continue;
        }
        match DecodingKey::from_jwk(jwk) {
            Ok(key) => {
                index.insert(kid, key);
            }
            Err(e) => tracing::warn!(kid = %kid, error = %e, "Skipping unusable JWK"),
        }
    }
    index
}
