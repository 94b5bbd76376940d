//! HTTP key set fetcher

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use storefront_identity::{Error, KeySetFetcher};

/// Fetches a provider's JWKS document over HTTPS
#[derive(Clone)]
pub struct HttpKeySetFetcher {
    client: reqwest::Client,
}

impl HttpKeySetFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KeySetFetcher for HttpKeySetFetcher {
    async fn fetch(&self, url: &str) -> storefront_identity::Result<JwkSet> {
        let key_fetch = |reason: String| Error::KeyFetch {
            url: url.to_string(),
            reason,
        };

        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| key_fetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(key_fetch(format!("HTTP {}", response.status())));
        }

        response
            .json::<JwkSet>()
            .await
            .map_err(|e| key_fetch(format!("invalid key set: {}", e)))
    }
}
