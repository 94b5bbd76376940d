//! Direct login endpoints: password, ID token, Google, registration and logout

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use serde::{Deserialize, Serialize};
use tower_cookies::Cookies;

use crate::crypto::{self, MAX_PASSWORD_BYTES};
use crate::error::GatewayError;
use crate::gateway;
use crate::state::AppState;
use crate::store::{NewUser, SessionStore, UserInfo, UserStore, UserView};

/// `POST /login` accepts either credential shape
#[derive(Deserialize)]
#[serde(untagged)]
pub enum LoginRequest {
    Password {
        email: String,
        password: String,
    },
    IdToken {
        #[serde(rename = "idToken")]
        id_token: String,
    },
}

#[derive(Deserialize)]
pub struct IdTokenRequest {
    #[serde(rename = "idToken")]
    pub id_token: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    /// Echo of the verified provider token, for token logins
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub user: UserView,
}

/// POST /login
pub async fn login<U, S>(
    State(state): State<Arc<AppState<U, S>>>,
    cookies: Cookies,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, GatewayError>
where
    U: UserStore + 'static,
    S: SessionStore + 'static,
{
    let Json(req) = payload?;
    match req {
        LoginRequest::Password { email, password } => {
            let user = gateway::authenticate_password(
                &state.user_store,
                email.trim(),
                &password,
                state.settings.bcrypt_cost,
            )
            .await?;

            let previous = super::session::current_session(&state, &cookies)?;
            super::session::establish_session(&state, &cookies, UserInfo::from(&user), previous.as_ref())?;
            tracing::info!(uid = %user.uid, "Password login");

            Ok(Json(LoginResponse {
                token: None,
                user: user.view(),
            }))
        }
        LoginRequest::IdToken { id_token } => {
            let claims = state.identity_verifier()?.verify(&id_token).await?;
            let user = gateway::upsert_from_claims(state.user_store.as_ref(), &claims)?;
            tracing::info!(uid = %user.uid, "ID token login");

            Ok(Json(LoginResponse {
                token: Some(id_token),
                user: user.view(),
            }))
        }
    }
}

/// POST /google-login
pub async fn google_login<U, S>(
    State(state): State<Arc<AppState<U, S>>>,
    cookies: Cookies,
    payload: Result<Json<IdTokenRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, GatewayError>
where
    U: UserStore + 'static,
    S: SessionStore + 'static,
{
    let Json(req) = payload?;
    let claims = state.google_verifier()?.verify(&req.id_token).await?;
    let user = gateway::upsert_from_claims(state.user_store.as_ref(), &claims)?;

    let previous = super::session::current_session(&state, &cookies)?;
    super::session::establish_session(&state, &cookies, UserInfo::from(&user), previous.as_ref())?;
    tracing::info!(uid = %user.uid, "Google login");

    Ok(Json(LoginResponse {
        token: Some(req.id_token),
        user: user.view(),
    }))
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Serialize)]
pub struct UserResponse {
    pub user: UserView,
}

/// POST /register
pub async fn register<U, S>(
    State(state): State<Arc<AppState<U, S>>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<UserResponse>), GatewayError>
where
    U: UserStore + 'static,
    S: SessionStore + 'static,
{
    let Json(req) = payload?;
    let email = req.email.trim().to_lowercase();
    if email.is_empty() || req.password.is_empty() {
        return Err(GatewayError::ValidationError(
            "Email and password are required".to_string(),
        ));
    }
    if !email.contains('@') {
        return Err(GatewayError::ValidationError("Invalid email address".to_string()));
    }
    if req.password.len() > MAX_PASSWORD_BYTES {
        return Err(GatewayError::ValidationError(format!(
            "Password must be at most {} bytes",
            MAX_PASSWORD_BYTES
        )));
    }

    if state.user_store.get_user_by_email(&email)?.is_some() {
        return Err(GatewayError::EmailAlreadyExists);
    }

    let password = req.password;
    let cost = state.settings.bcrypt_cost;
    let password_hash = tokio::task::spawn_blocking(move || crypto::hash_password(&password, cost))
        .await
        .map_err(|e| GatewayError::Internal(e.to_string()))?
        .map_err(|e| GatewayError::Internal(e.to_string()))?;

    let user = state.user_store.create_user(NewUser {
        uid: crypto::generate_uid(),
        email,
        name: req.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
        password_hash: Some(password_hash),
    })?;
    tracing::info!(uid = %user.uid, "User registered");

    Ok((StatusCode::CREATED, Json(UserResponse { user: user.view() })))
}

/// GET /logout
pub async fn logout<U, S>(
    State(state): State<Arc<AppState<U, S>>>,
    cookies: Cookies,
) -> Response
where
    U: UserStore + 'static,
    S: SessionStore + 'static,
{
    match super::session::current_session(&state, &cookies) {
        Ok(Some(session)) => {
            if let Err(e) = state.session_store.delete(&session.id) {
                tracing::warn!(error = %e, "Failed to delete session on logout");
            }
        }
        Ok(None) => {}
        Err(e) => tracing::warn!(error = %e, "Failed to load session on logout"),
    }

    super::session::clear_session_cookie(&state, &cookies);

    let target = state
        .end_session_url()
        .unwrap_or_else(|| state.settings.frontend_origin.clone());
    super::session::found(&target)
}
