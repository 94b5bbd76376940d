//! Token verification against a provider's published keys

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};

use crate::claims::RawClaims;
use crate::keys::{index_key_set, KeySetFetcher};
use crate::{Error, IdentityClaims, Result, TokenUse};

/// Minimum interval between key set refetches triggered by an unknown `kid`
const REFRESH_COOLDOWN_SECS: i64 = 30;

/// Capability: verify an opaque bearer token and return its claims
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<IdentityClaims>;
}

/// What a token must be bound to in order to verify
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Accepted `iss` values
    pub issuers: Vec<String>,
    /// The app client the token must be issued to (`aud`, or `client_id`
    /// for Cognito access tokens)
    pub audience: String,
    /// Accepted `token_use` values; empty means the claim is not checked
    pub token_uses: Vec<TokenUse>,
    /// Where the provider publishes its JWKS
    pub jwks_url: String,
}

impl VerifierConfig {
    /// Tokens issued by a Cognito user pool to one app client
    pub fn cognito(region: &str, user_pool_id: &str, client_id: &str, token_uses: &[TokenUse]) -> Self {
        let issuer = format!("https://cognito-idp.{}.amazonaws.com/{}", region, user_pool_id);
        Self {
            jwks_url: format!("{}/.well-known/jwks.json", issuer),
            issuers: vec![issuer],
            audience: client_id.to_string(),
            token_uses: token_uses.to_vec(),
        }
    }

    /// Google Sign-In ID tokens for one OAuth client
    pub fn google(client_id: &str) -> Self {
        Self {
            issuers: vec![
                "https://accounts.google.com".to_string(),
                "accounts.google.com".to_string(),
            ],
            audience: client_id.to_string(),
            token_uses: Vec::new(),
            jwks_url: "https://www.googleapis.com/oauth2/v3/certs".to_string(),
        }
    }
}

struct CachedKeys {
    keys: HashMap<String, DecodingKey>,
    fetched_at: DateTime<Utc>,
}

/// RS256 verifier backed by a cached JWKS
pub struct JwksVerifier<F: KeySetFetcher> {
    config: VerifierConfig,
    fetcher: F,
    cache: RwLock<Option<CachedKeys>>,
}

impl<F: KeySetFetcher> JwksVerifier<F> {
    pub fn new(config: VerifierConfig, fetcher: F) -> Self {
        Self {
            config,
            fetcher,
            cache: RwLock::new(None),
        }
    }

    fn cached_key(&self, kid: &str) -> Option<DecodingKey> {
        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
        cache.as_ref().and_then(|c| c.keys.get(kid).cloned())
    }

    fn may_refresh(&self, now: DateTime<Utc>) -> bool {
        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
        match cache.as_ref() {
            Some(c) => now - c.fetched_at >= Duration::seconds(REFRESH_COOLDOWN_SECS),
            None => true,
        }
    }

    /// Look up the key for `kid`, refetching the set once if it is unknown
    async fn key_for(&self, kid: &str) -> Result<DecodingKey> {
        if let Some(key) = self.cached_key(kid) {
            return Ok(key);
        }

        let now = Utc::now();
        if !self.may_refresh(now) {
            return Err(Error::UnknownKey(kid.to_string()));
        }

        tracing::debug!(url = %self.config.jwks_url, kid = %kid, "Fetching provider key set");
        let set = self.fetcher.fetch(&self.config.jwks_url).await?;
        let keys = index_key_set(&set);
        let found = keys.get(kid).cloned();

        *self.cache.write().unwrap_or_else(|e| e.into_inner()) = Some(CachedKeys {
            keys,
            fetched_at: now,
        });

        found.ok_or_else(|| Error::UnknownKey(kid.to_string()))
    }

    fn check_binding(&self, raw: &RawClaims) -> Result<()> {
        let audience = &self.config.audience;
        let aud_matches = raw.aud.as_ref().is_some_and(|aud| aud.contains(audience));
        let client_matches = raw.client_id.as_deref() == Some(audience.as_str());
        if !aud_matches && !client_matches {
            return Err(Error::AudienceMismatch {
                expected: audience.clone(),
            });
        }

        if !self.config.token_uses.is_empty() {
            let actual = raw.token_use.ok_or(Error::MissingClaim("token_use"))?;
            if !self.config.token_uses.contains(&actual) {
                return Err(Error::TokenUseMismatch {
                    expected: self
                        .config
                        .token_uses
                        .iter()
                        .map(TokenUse::as_str)
                        .collect::<Vec<_>>()
                        .join("|"),
                    actual: actual.to_string(),
                });
            }
        }

        Ok(())
    }
}

#[async_trait]
impl<F: KeySetFetcher> TokenVerifier for JwksVerifier<F> {
    async fn verify(&self, token: &str) -> Result<IdentityClaims> {
        let header = decode_header(token)?;
        if header.alg != Algorithm::RS256 {
            return Err(Error::UnsupportedAlgorithm(format!("{:?}", header.alg)));
        }
        let kid = header
            .kid
            .ok_or_else(|| Error::MalformedToken("missing kid header".to_string()))?;

        let key = self.key_for(&kid).await?;

        // Audience is checked by hand: Cognito access tokens have no `aud`
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&self.config.issuers);
        validation.validate_aud = false;

        let data = decode::<RawClaims>(token, &key, &validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::InvalidIssuer => Error::IssuerMismatch {
                    expected: self.config.issuers.clone(),
                    actual: unverified_issuer(token).unwrap_or_default(),
                },
                _ => Error::Jwt(e),
            }
        })?;

        self.check_binding(&data.claims)?;
        data.claims.into_identity()
    }
}

/// Read `iss` without verifying, for diagnostics only
fn unverified_issuer(token: &str) -> Option<String> {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let value: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    value.get("iss")?.as_str().map(str::to_string)
}
