//! Application state

use std::sync::Arc;

use storefront_identity::{JwksVerifier, TokenUse, TokenVerifier, VerifierConfig};
use tower_cookies::Key;

use crate::config::{Config, GatewaySettings};
use crate::error::GatewayError;
use crate::jwks_fetcher::HttpKeySetFetcher;
use crate::oidc::{CognitoOidcClient, OidcProvider};
use crate::store::{InMemoryTokenLedger, SessionStore, TokenLedger, UserStore};

/// Shared application state
pub struct AppState<U: UserStore, S: SessionStore> {
    pub user_store: Arc<U>,
    pub session_store: Arc<S>,
    pub ledger: Arc<dyn TokenLedger>,
    pub settings: GatewaySettings,
    /// Signs the session cookie
    pub cookie_key: Key,
    /// Cognito ID tokens (token login, redirect callback)
    identity_verifier: Option<Arc<dyn TokenVerifier>>,
    /// Cognito ID or access tokens presented as bearer credentials
    bearer_verifier: Option<Arc<dyn TokenVerifier>>,
    google_verifier: Option<Arc<dyn TokenVerifier>>,
    oidc: Option<Arc<dyn OidcProvider>>,
}

impl<U: UserStore, S: SessionStore> AppState<U, S> {
    pub fn new(user_store: U, session_store: S, settings: GatewaySettings, cookie_key: Key) -> Self {
        Self {
            user_store: Arc::new(user_store),
            session_store: Arc::new(session_store),
            ledger: Arc::new(InMemoryTokenLedger::new()),
            settings,
            cookie_key,
            identity_verifier: None,
            bearer_verifier: None,
            google_verifier: None,
            oidc: None,
        }
    }

    /// Wire up stores, verifiers and the OIDC client from configuration
    pub fn from_config(config: &Config, user_store: U, session_store: S) -> Result<Self, GatewayError> {
        let mut state = Self::new(user_store, session_store, config.settings(), config.cookie_key());

        let http_client = reqwest::Client::builder()
            .user_agent(concat!("storefront-auth/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| GatewayError::Internal(format!("failed to build HTTP client: {}", e)))?;
        let fetcher = HttpKeySetFetcher::new(http_client.clone());

        if let Some(cognito) = &config.cognito {
            let cognito_config = |uses: &[TokenUse]| {
                VerifierConfig::cognito(&cognito.region, &cognito.user_pool_id, &cognito.client_id, uses)
            };
            state = state.with_cognito_verifiers(
                Arc::new(JwksVerifier::new(cognito_config(&[TokenUse::Id]), fetcher.clone())),
                Arc::new(JwksVerifier::new(
                    cognito_config(&[TokenUse::Id, TokenUse::Access]),
                    fetcher.clone(),
                )),
            );

            if let Some(client) = CognitoOidcClient::from_config(cognito, http_client) {
                state = state.with_oidc_provider(Arc::new(client));
            }
        }

        if let Some(client_id) = &config.google_client_id {
            state = state.with_google_verifier(Arc::new(JwksVerifier::new(
                VerifierConfig::google(client_id),
                fetcher,
            )));
        }

        Ok(state)
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn TokenLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn with_cognito_verifiers(
        mut self,
        identity: Arc<dyn TokenVerifier>,
        bearer: Arc<dyn TokenVerifier>,
    ) -> Self {
        self.identity_verifier = Some(identity);
        self.bearer_verifier = Some(bearer);
        self
    }

    pub fn with_google_verifier(mut self, verifier: Arc<dyn TokenVerifier>) -> Self {
        self.google_verifier = Some(verifier);
        self
    }

    pub fn with_oidc_provider(mut self, provider: Arc<dyn OidcProvider>) -> Self {
        self.oidc = Some(provider);
        self
    }

    pub fn identity_verifier(&self) -> Result<&dyn TokenVerifier, GatewayError> {
        self.identity_verifier
            .as_deref()
            .ok_or_else(|| GatewayError::Configuration("Cognito is not configured".to_string()))
    }

    /// `None` when bearer authentication is unavailable
    pub fn bearer_verifier(&self) -> Option<&dyn TokenVerifier> {
        self.bearer_verifier.as_deref()
    }

    pub fn google_verifier(&self) -> Result<&dyn TokenVerifier, GatewayError> {
        self.google_verifier
            .as_deref()
            .ok_or_else(|| GatewayError::Configuration("Google Sign-In is not configured".to_string()))
    }

    pub fn oidc(&self) -> Result<&dyn OidcProvider, GatewayError> {
        self.oidc.as_deref().ok_or_else(|| {
            GatewayError::Configuration("Hosted UI login is not configured".to_string())
        })
    }

    /// Provider logout URL, if the hosted UI is configured
    pub fn end_session_url(&self) -> Option<String> {
        self.oidc
            .as_ref()
            .and_then(|p| p.end_session_url(&self.settings.frontend_origin))
    }
}
