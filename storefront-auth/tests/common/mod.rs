//! Common test utilities for gateway integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use axum::http::{header, HeaderValue};
use axum_test::{TestResponse, TestServer};
use chrono::{Duration, Utc};
use cookie::Cookie;
use serde_json::json;
use storefront_auth::config::GatewaySettings;
use storefront_auth::oidc::{OidcError, OidcProvider, OidcTokens, OidcUserInfo};
use storefront_auth::{routes, AppState, InMemorySessionStore, InMemoryTokenLedger, InMemoryUserStore};
use storefront_identity::{IdentityClaims, TokenUse, TokenVerifier};
use tower_cookies::Key;
use url::Url;

pub const COOKIE_NAME: &str = "storefront_session";
pub const CALLBACK: &str = "http://localhost:3000/callback";
pub const FRONTEND: &str = "http://localhost:5173";
pub const IDP_AUTHORIZE: &str = "https://idp.test/oauth2/authorize";
/// Authorization code the mock provider refuses to exchange
pub const BAD_CODE: &str = "bad-code";

/// Mock identity provider: token verifier and OIDC client in one
///
/// Tokens verify only if registered. Codes exchange into an ID token equal
/// to the code itself, and verified ID tokens echo the nonce of the most
/// recent authorization URL unless `echo_nonce` is switched off.
pub struct MockIdp {
    tokens: RwLock<HashMap<String, IdentityClaims>>,
    last_nonce: RwLock<Option<String>>,
    echo_nonce: AtomicBool,
    exchanges: AtomicUsize,
}

impl MockIdp {
    pub fn new() -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
            last_nonce: RwLock::new(None),
            echo_nonce: AtomicBool::new(true),
            exchanges: AtomicUsize::new(0),
        }
    }

    /// Make `token` verify to `claims`
    pub fn register(&self, token: &str, claims: IdentityClaims) {
        self.tokens
            .write()
            .unwrap()
            .insert(token.to_string(), claims);
    }

    pub fn set_echo_nonce(&self, echo: bool) {
        self.echo_nonce.store(echo, Ordering::SeqCst);
    }

    /// How many code exchanges were attempted
    pub fn exchanges(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenVerifier for MockIdp {
    async fn verify(&self, token: &str) -> storefront_identity::Result<IdentityClaims> {
        let mut claims = self
            .tokens
            .read()
            .unwrap()
            .get(token)
            .cloned()
            .ok_or_else(|| storefront_identity::Error::MalformedToken("unknown test token".to_string()))?;

        if claims.nonce.is_none() && self.echo_nonce.load(Ordering::SeqCst) {
            claims.nonce = self.last_nonce.read().unwrap().clone();
        }
        Ok(claims)
    }
}

#[async_trait]
impl OidcProvider for MockIdp {
    fn authorization_url(&self, redirect_uri: &str, state: &str, nonce: &str) -> String {
        *self.last_nonce.write().unwrap() = Some(nonce.to_string());
        let mut url = Url::parse(IDP_AUTHORIZE).unwrap();
        url.query_pairs_mut()
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("state", state)
            .append_pair("nonce", nonce);
        url.to_string()
    }

    async fn exchange_code(&self, code: &str, _redirect_uri: &str) -> Result<OidcTokens, OidcError> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        if code == BAD_CODE {
            return Err(OidcError::Provider("invalid_grant".to_string()));
        }
        Ok(OidcTokens {
            id_token: code.to_string(),
            access_token: format!("access-{}", code),
            refresh_token: None,
            expires_in: Some(3600),
            token_type: Some("Bearer".to_string()),
        })
    }

    async fn user_info(&self, access_token: &str) -> Result<OidcUserInfo, OidcError> {
        Ok(OidcUserInfo {
            sub: access_token.to_string(),
            email: Some("userinfo@example.com".to_string()),
            email_verified: Some(true),
            name: Some("From Userinfo".to_string()),
            picture: None,
        })
    }

    fn end_session_url(&self, return_to: &str) -> Option<String> {
        let mut url = Url::parse("https://idp.test/logout").unwrap();
        url.query_pairs_mut()
            .append_pair("client_id", "test-client")
            .append_pair("logout_uri", return_to);
        Some(url.to_string())
    }
}

/// Which collaborators the test gateway is wired with
pub struct TestOptions {
    pub settings: GatewaySettings,
    pub cognito: bool,
    pub google: bool,
    pub oidc: bool,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            settings: test_settings(),
            cognito: true,
            google: true,
            oidc: true,
        }
    }
}

pub struct TestContext {
    pub server: TestServer,
    /// Cognito: ID token verifier, bearer verifier and hosted UI
    pub idp: Arc<MockIdp>,
    pub google: Arc<MockIdp>,
    pub ledger: Arc<InMemoryTokenLedger>,
    pub users: Arc<InMemoryUserStore>,
    pub sessions: Arc<InMemorySessionStore>,
}

pub fn test_settings() -> GatewaySettings {
    GatewaySettings {
        allowed_redirect_uris: vec![CALLBACK.to_string()],
        bcrypt_cost: 4,
        ..GatewaySettings::default()
    }
}

/// Create a test server with every provider mocked
pub fn create_test_context() -> TestContext {
    create_test_context_with(TestOptions::default())
}

pub fn create_test_context_with(options: TestOptions) -> TestContext {
    let users = Arc::new(InMemoryUserStore::new());
    let sessions = Arc::new(InMemorySessionStore::new());
    let ledger = Arc::new(InMemoryTokenLedger::new());
    let idp = Arc::new(MockIdp::new());
    let google = Arc::new(MockIdp::new());

    let mut state = AppState::new(
        users.clone(),
        sessions.clone(),
        options.settings,
        Key::from(&[7u8; 64][..]),
    )
    .with_ledger(ledger.clone());
    if options.cognito {
        state = state.with_cognito_verifiers(idp.clone(), idp.clone());
    }
    if options.google {
        state = state.with_google_verifier(google.clone());
    }
    if options.oidc {
        state = state.with_oidc_provider(idp.clone());
    }

    let app = routes::create_router(Arc::new(state));
    let server = TestServer::new(app).expect("Failed to create test server");

    TestContext {
        server,
        idp,
        google,
        ledger,
        users,
        sessions,
    }
}

/// Claims as a verifier would return them
pub fn claims(sub: &str, email: &str) -> IdentityClaims {
    IdentityClaims {
        sub: sub.to_string(),
        email: Some(email.to_string()),
        email_verified: Some(true),
        name: Some(format!("User {}", sub)),
        picture: None,
        nonce: None,
        token_use: Some(TokenUse::Id),
        issuer: "https://cognito-idp.ap-south-1.amazonaws.com/ap-south-1_Test".to_string(),
        expires_at: Utc::now() + Duration::hours(1),
    }
}

/// The session cookie a response set, if any
pub fn session_cookie(response: &TestResponse) -> Option<Cookie<'static>> {
    response.maybe_cookie(COOKIE_NAME)
}

pub fn location(response: &TestResponse) -> String {
    response
        .header(header::LOCATION)
        .to_str()
        .unwrap()
        .to_string()
}

pub fn query_param(url: &str, name: &str) -> Option<String> {
    Url::parse(url)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

pub fn bearer(token: &str) -> HeaderValue {
    HeaderValue::from_str(&format!("Bearer {}", token)).unwrap()
}

/// Register a password user
pub async fn register(server: &TestServer, email: &str, password: &str) -> TestResponse {
    server
        .post("/register")
        .json(&json!({ "email": email, "password": password }))
        .await
}

/// Log in with a password and return the session cookie
pub async fn login(server: &TestServer, email: &str, password: &str) -> Cookie<'static> {
    let response = server
        .post("/login")
        .json(&json!({ "email": email, "password": password }))
        .await;
    response.assert_status_ok();
    session_cookie(&response).expect("login should set a session cookie")
}

/// Start a redirect login, returning the flow cookie and the `state` sent to the provider
pub async fn start_redirect_login(server: &TestServer) -> (Cookie<'static>, String) {
    let response = server
        .get("/login")
        .add_query_param("redirect_uri", CALLBACK)
        .await;
    response.assert_status(axum::http::StatusCode::FOUND);

    let target = location(&response);
    assert!(target.starts_with(IDP_AUTHORIZE), "unexpected redirect {}", target);
    let state = query_param(&target, "state").expect("authorization URL carries state");
    let cookie = session_cookie(&response).expect("initiate should set a session cookie");
    (cookie, state)
}

/// Run a redirect login through the callback and return the one-time token
pub async fn redirect_login_token(ctx: &TestContext, code: &str, claims: IdentityClaims) -> String {
    ctx.idp.register(code, claims);
    let (cookie, state) = start_redirect_login(&ctx.server).await;

    let response = ctx
        .server
        .get("/callback")
        .add_query_param("code", code)
        .add_query_param("state", &state)
        .add_cookie(cookie)
        .await;
    response.assert_status(axum::http::StatusCode::FOUND);

    let target = location(&response);
    assert!(
        target.starts_with(&format!("{}/auth/success?", FRONTEND)),
        "unexpected redirect {}",
        target
    );
    query_param(&target, "token").expect("success redirect carries a token")
}
