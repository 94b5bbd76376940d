//! HTTP routes for the gateway

mod auth;
mod oidc;
pub(crate) mod session;
mod user;

use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_cookies::CookieManagerLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::store::{SessionStore, UserStore};

/// Create the router with all routes
pub fn create_router<U, S>(state: Arc<AppState<U, S>>) -> Router
where
    U: UserStore + 'static,
    S: SessionStore + 'static,
{
    let router = Router::new()
        .route("/login", get(oidc::initiate).post(auth::login))
        .route("/google-login", post(auth::google_login))
        .route("/register", post(auth::register))
        .route("/callback", get(oidc::callback))
        .route("/auth/claim", post(oidc::claim))
        .route("/logout", get(auth::logout))
        .route("/user/me", get(user::me))
        .route("/health", get(user::health))
        .layer(CookieManagerLayer::new())
        .layer(TraceLayer::new_for_http());

    let router = match cors_layer(&state.settings.frontend_origin) {
        Some(cors) => router.layer(cors),
        None => router,
    };

    router.with_state(state)
}

/// Credentialed CORS for the storefront SPA only
fn cors_layer(frontend_origin: &str) -> Option<CorsLayer> {
    let origin = match HeaderValue::from_str(frontend_origin) {
        Ok(origin) => origin,
        Err(e) => {
            tracing::warn!(origin = %frontend_origin, error = %e, "Frontend origin unusable for CORS");
            return None;
        }
    };

    Some(
        CorsLayer::new()
            .allow_origin(origin)
            .allow_credentials(true)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]),
    )
}
