//! Hosted-UI redirect login: initiate, callback and one-time token claim
//!
//! The callback never hands identity to the browser directly. It parks the
//! verified claims in the token ledger and redirects the SPA with an opaque
//! one-time token, which the SPA then claims over XHR to get its session.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use tower_cookies::Cookies;

use super::auth::UserResponse;
use super::session::{self, found};
use crate::crypto::generate_token;
use crate::error::GatewayError;
use crate::gateway::{self, ClaimOutcome};
use crate::state::AppState;
use crate::store::{OidcFlowState, SessionStore, UserInfo, UserStore};

fn error_redirect<U: UserStore, S: SessionStore>(state: &AppState<U, S>, err: &GatewayError) -> Response {
    let code = err.redirect_code();
    tracing::warn!(error = %err, code = code, "Redirect login failed");
    found(&state.settings.frontend_url("/auth/error", &[("error", code)]))
}

#[derive(Deserialize)]
pub struct InitiateQuery {
    pub redirect_uri: Option<String>,
}

/// GET /login
pub async fn initiate<U, S>(
    State(state): State<Arc<AppState<U, S>>>,
    cookies: Cookies,
    headers: HeaderMap,
    Query(query): Query<InitiateQuery>,
) -> Response
where
    U: UserStore + 'static,
    S: SessionStore + 'static,
{
    match begin_login(&state, &cookies, &headers, query.redirect_uri.as_deref()) {
        Ok(url) => found(&url),
        Err(e) => error_redirect(&state, &e),
    }
}

fn begin_login<U: UserStore, S: SessionStore>(
    state: &AppState<U, S>,
    cookies: &Cookies,
    headers: &HeaderMap,
    requested: Option<&str>,
) -> Result<String, GatewayError> {
    let provider = state.oidc()?;
    let redirect_uri =
        gateway::select_redirect_uri(&state.settings.allowed_redirect_uris, requested, headers)?;

    let mut flow_session = match session::current_session(state, cookies)? {
        Some(existing) => existing,
        None => state.session_store.create(state.settings.cookie.max_age)?,
    };

    let flow = OidcFlowState {
        state: generate_token(),
        nonce: generate_token(),
        redirect_uri,
    };
    let url = provider.authorization_url(&flow.redirect_uri, &flow.state, &flow.nonce);

    flow_session.oidc = Some(flow);
    state.session_store.save(&flow_session)?;
    session::set_session_cookie(state, cookies, &flow_session.id);

    tracing::debug!("Redirecting to identity provider");
    Ok(url)
}

#[derive(Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// GET /callback
pub async fn callback<U, S>(
    State(state): State<Arc<AppState<U, S>>>,
    cookies: Cookies,
    Query(query): Query<CallbackQuery>,
) -> Response
where
    U: UserStore + 'static,
    S: SessionStore + 'static,
{
    match complete_login(&state, &cookies, query).await {
        Ok(token) => found(&state.settings.frontend_url("/auth/success", &[("token", token.as_str())])),
        Err(e) => error_redirect(&state, &e),
    }
}

/// Validate the callback and park the verified claims under a one-time token
///
/// State is checked before the code is exchanged and the nonce before the
/// session is touched; nothing is written on any failure.
async fn complete_login<U: UserStore, S: SessionStore>(
    state: &AppState<U, S>,
    cookies: &Cookies,
    query: CallbackQuery,
) -> Result<String, GatewayError> {
    if let Some(error) = query.error {
        return Err(GatewayError::ProviderRejected(match query.error_description {
            Some(description) => format!("{}: {}", error, description),
            None => error,
        }));
    }

    let provider = state.oidc()?;

    let mut flow_session = session::current_session(state, cookies)?.ok_or_else(|| {
        tracing::debug!("Callback without a session");
        GatewayError::StateOrNonceMismatch
    })?;
    let flow = flow_session.oidc.clone().ok_or_else(|| {
        tracing::debug!("Callback without a pending login");
        GatewayError::StateOrNonceMismatch
    })?;

    if query.state.as_deref() != Some(flow.state.as_str()) {
        return Err(GatewayError::StateOrNonceMismatch);
    }

    let code = query
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| GatewayError::ValidationError("missing authorization code".to_string()))?;

    let tokens = provider
        .exchange_code(&code, &flow.redirect_uri)
        .await
        .map_err(|e| GatewayError::Upstream(e.to_string()))?;

    let mut claims = state.identity_verifier()?.verify(&tokens.id_token).await?;

    if claims.nonce.as_deref() != Some(flow.nonce.as_str()) {
        return Err(GatewayError::StateOrNonceMismatch);
    }

    if claims.email.is_none() {
        let profile = provider
            .user_info(&tokens.access_token)
            .await
            .map_err(|e| GatewayError::Upstream(e.to_string()))?;
        claims.email = profile.email.map(|e| e.to_lowercase());
        claims.email_verified = profile.email_verified;
        claims.name = claims.name.or(profile.name);
        claims.picture = claims.picture.or(profile.picture);
    }

    flow_session.oidc = None;
    state.session_store.save(&flow_session)?;

    let token = generate_token();
    state
        .ledger
        .insert(&token, claims, state.settings.temp_token_ttl)?;

    tracing::info!("Redirect login verified, one-time token issued");
    Ok(token)
}

#[derive(Deserialize)]
pub struct ClaimRequest {
    #[serde(default)]
    pub token: String,
}

/// POST /auth/claim
pub async fn claim<U, S>(
    State(state): State<Arc<AppState<U, S>>>,
    cookies: Cookies,
    payload: Result<Json<ClaimRequest>, JsonRejection>,
) -> Result<Json<UserResponse>, GatewayError>
where
    U: UserStore + 'static,
    S: SessionStore + 'static,
{
    let Json(req) = payload?;
    let outcome = gateway::claim_temp_token(
        state.ledger.as_ref(),
        &req.token,
        Utc::now(),
        state.settings.claim_grace,
    )?;
    let current = session::current_session(&state, &cookies)?;

    let user = match &outcome {
        ClaimOutcome::Fresh(claims) => {
            let user = gateway::upsert_from_claims(state.user_store.as_ref(), claims)?;
            session::establish_session(&state, &cookies, UserInfo::from(&user), current.as_ref())?;
            tracing::info!(uid = %user.uid, "One-time token claimed");
            user
        }
        ClaimOutcome::Replay(claims) => {
            let user = match gateway::find_user_for_claims(state.user_store.as_ref(), claims)? {
                Some(user) => user,
                None => gateway::upsert_from_claims(state.user_store.as_ref(), claims)?,
            };

            let already_signed_in = current
                .as_ref()
                .and_then(|s| s.user_info.as_ref())
                .is_some_and(|info| info.uid == user.uid);
            if !already_signed_in {
                session::establish_session(&state, &cookies, UserInfo::from(&user), current.as_ref())?;
            }
            tracing::debug!(uid = %user.uid, "One-time token replayed within grace");
            user
        }
    };

    Ok(Json(UserResponse { user: user.view() }))
}
