//! Dual-mode request authentication
//!
//! A request is authenticated by its session cookie when it has a live,
//! authenticated session, and otherwise by an `Authorization: Bearer` token
//! verified against the Cognito user pool.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, HeaderMap};
use serde::Serialize;
use tower_cookies::Cookies;

use crate::error::GatewayError;
use crate::gateway::{self, Principal};
use crate::routes::session;
use crate::state::AppState;
use crate::store::{SessionStore, UserStore};

/// Which credential authenticated the request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthSource {
    Session,
    Bearer,
}

/// An authenticated request
#[derive(Debug, Clone)]
pub struct AuthResult {
    pub principal: Principal,
    pub source: AuthSource,
}

/// Authenticate a request from its cookies and headers
///
/// Session authentication slides the session's expiry. Failures write
/// nothing.
pub async fn authenticate<U, S>(
    state: &AppState<U, S>,
    cookies: &Cookies,
    headers: &HeaderMap,
) -> Result<AuthResult, GatewayError>
where
    U: UserStore,
    S: SessionStore,
{
    if let Some(current) = session::current_session(state, cookies)? {
        if let Some(info) = &current.user_info {
            let principal = gateway::principal_from_session(state.user_store.as_ref(), info)?;
            session::slide_session(state, cookies, &current);
            return Ok(AuthResult {
                principal,
                source: AuthSource::Session,
            });
        }
    }

    let Some(token) = bearer_token(headers) else {
        return Err(GatewayError::NotAuthenticated);
    };

    let Some(verifier) = state.bearer_verifier() else {
        tracing::warn!("Bearer token presented but Cognito is not configured");
        return Err(GatewayError::Unauthorized);
    };

    let claims = verifier.verify(token).await.map_err(|e| {
        tracing::debug!(error = %e, "Bearer token rejected");
        GatewayError::Unauthorized
    })?;

    Ok(AuthResult {
        principal: gateway::principal_from_claims(state.user_store.as_ref(), &claims)?,
        source: AuthSource::Bearer,
    })
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

#[async_trait]
impl<U, S> FromRequestParts<Arc<AppState<U, S>>> for AuthResult
where
    U: UserStore + 'static,
    S: SessionStore + 'static,
{
    type Rejection = GatewayError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState<U, S>>,
    ) -> Result<Self, Self::Rejection> {
        let cookies = Cookies::from_request_parts(parts, state)
            .await
            .map_err(|(_, msg)| GatewayError::Internal(msg.to_string()))?;
        authenticate(state, &cookies, &parts.headers).await
    }
}
