//! OIDC authorization-code client for the Cognito hosted UI
//!
//! The gateway only needs three things from the provider: an authorization
//! URL to redirect the browser to, a code-for-tokens exchange, and the
//! end-session URL used on logout. Token verification is separate and goes
//! through `storefront_identity::TokenVerifier`.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Deserialize;
use url::Url;

use crate::config::CognitoConfig;

/// Scopes requested on every redirect login
const DEFAULT_SCOPES: &[&str] = &["openid", "email", "profile"];

/// Errors from the provider's token and userinfo endpoints
#[derive(Debug, thiserror::Error)]
pub enum OidcError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("provider error: {0}")]
    Provider(String),
}

/// Tokens returned by a successful code exchange
#[derive(Debug, Clone, Deserialize)]
pub struct OidcTokens {
    pub id_token: String,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Profile returned by the userinfo endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OidcUserInfo {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "storefront_identity::claims::bool_or_string")]
    pub email_verified: Option<bool>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorResponse {
    error: String,
    error_description: Option<String>,
}

/// Capability: drive an authorization-code login against a provider
#[async_trait]
pub trait OidcProvider: Send + Sync {
    /// URL the browser is sent to; `state` and `nonce` are echoed back
    fn authorization_url(&self, redirect_uri: &str, state: &str, nonce: &str) -> String;

    /// Exchange an authorization code for tokens
    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<OidcTokens, OidcError>;

    /// Fetch the profile behind an access token
    async fn user_info(&self, access_token: &str) -> Result<OidcUserInfo, OidcError>;

    /// Provider logout URL that returns the browser to `return_to`
    fn end_session_url(&self, return_to: &str) -> Option<String>;
}

/// Cognito hosted-UI client
pub struct CognitoOidcClient {
    base_url: String,
    client_id: String,
    client_secret: Option<String>,
    scopes: Vec<String>,
    http_client: reqwest::Client,
}

impl CognitoOidcClient {
    /// Build a client from the Cognito settings; `None` without a hosted UI domain
    pub fn from_config(config: &CognitoConfig, http_client: reqwest::Client) -> Option<Self> {
        let domain = config.domain.as_deref()?;
        let base_url = if domain.starts_with("http://") || domain.starts_with("https://") {
            domain.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", domain.trim_end_matches('/'))
        };

        Some(Self {
            base_url,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
            http_client,
        })
    }

    fn authorization_endpoint(&self) -> String {
        format!("{}/oauth2/authorize", self.base_url)
    }

    fn token_endpoint(&self) -> String {
        format!("{}/oauth2/token", self.base_url)
    }

    fn userinfo_endpoint(&self) -> String {
        format!("{}/oauth2/userInfo", self.base_url)
    }

    fn logout_endpoint(&self) -> String {
        format!("{}/logout", self.base_url)
    }

    fn basic_auth_header(&self, secret: &str) -> String {
        let credentials = format!("{}:{}", self.client_id, secret);
        format!("Basic {}", STANDARD.encode(credentials.as_bytes()))
    }

    fn with_query(endpoint: String, pairs: &[(&str, &str)]) -> String {
        match Url::parse(&endpoint) {
            Ok(mut url) => {
                url.query_pairs_mut().extend_pairs(pairs);
                url.to_string()
            }
            Err(e) => {
                tracing::error!(endpoint = %endpoint, error = %e, "Invalid provider endpoint");
                endpoint
            }
        }
    }
}

#[async_trait]
impl OidcProvider for CognitoOidcClient {
    fn authorization_url(&self, redirect_uri: &str, state: &str, nonce: &str) -> String {
        let scope = self.scopes.join(" ");
        Self::with_query(
            self.authorization_endpoint(),
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("response_type", "code"),
                ("scope", scope.as_str()),
                ("state", state),
                ("nonce", nonce),
            ],
        )
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<OidcTokens, OidcError> {
        tracing::debug!("Exchanging authorization code for tokens");

        let mut request = self
            .http_client
            .post(self.token_endpoint())
            .header("Accept", "application/json");
        if let Some(secret) = &self.client_secret {
            request = request.header("Authorization", self.basic_auth_header(secret));
        }

        let response = request
            .form(&[
                ("grant_type", "authorization_code"),
                ("client_id", self.client_id.as_str()),
                ("code", code),
                ("redirect_uri", redirect_uri),
            ])
            .send()
            .await?;

        let body = response.text().await?;

        if let Ok(error_response) = serde_json::from_str::<ProviderErrorResponse>(&body) {
            if !error_response.error.is_empty() {
                let message = error_response
                    .error_description
                    .unwrap_or(error_response.error);
                return Err(OidcError::Provider(message));
            }
        }

        serde_json::from_str(&body)
            .map_err(|e| OidcError::Parse(format!("failed to parse token response: {}", e)))
    }

    async fn user_info(&self, access_token: &str) -> Result<OidcUserInfo, OidcError> {
        tracing::debug!("Fetching provider user info");

        let response = self
            .http_client
            .get(self.userinfo_endpoint())
            .header("Accept", "application/json")
            .bearer_auth(access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(OidcError::Provider(format!(
                "userinfo returned {}: {}",
                status, body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| OidcError::Parse(format!("failed to parse user info response: {}", e)))
    }

    fn end_session_url(&self, return_to: &str) -> Option<String> {
        Some(Self::with_query(
            self.logout_endpoint(),
            &[("client_id", self.client_id.as_str()), ("logout_uri", return_to)],
        ))
    }
}
