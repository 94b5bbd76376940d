//! Gateway error types

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Invalid or expired token")]
    InvalidOrExpiredToken,

    #[error("Token expired")]
    TokenExpired,

    #[error("Redirect URI not allowed")]
    RedirectMismatch,

    #[error("Login state or nonce mismatch")]
    StateOrNonceMismatch,

    #[error("Identity provider rejected the login: {0}")]
    ProviderRejected(String),

    #[error("No token provided")]
    NotAuthenticated,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("User already exists")]
    EmailAlreadyExists,

    #[error("User not found")]
    UserNotFound,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Opaque code carried to the frontend error page by redirect flows
    pub fn redirect_code(&self) -> &'static str {
        match self {
            GatewayError::RedirectMismatch => "redirect_mismatch",
            GatewayError::StateOrNonceMismatch => "state_mismatch",
            GatewayError::ProviderRejected(_) => "provider_error",
            GatewayError::InvalidToken => "invalid_token",
            GatewayError::ValidationError(_) => "invalid_request",
            GatewayError::Configuration(_) => "configuration_error",
            GatewayError::Upstream(_) => "exchange_failed",
            _ => "server_error",
        }
    }
}

impl From<storefront_identity::Error> for GatewayError {
    fn from(e: storefront_identity::Error) -> Self {
        if e.is_transient() {
            tracing::warn!(error = %e, "Token verification could not reach the provider");
        } else {
            tracing::debug!(error = %e, "Token verification failed");
        }
        GatewayError::InvalidToken
    }
}

impl From<JsonRejection> for GatewayError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::debug!(error = %rejection, "Malformed request body");
        GatewayError::ValidationError(rejection.body_text())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            GatewayError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "Invalid credentials"),
            GatewayError::InvalidToken => (StatusCode::UNAUTHORIZED, "Invalid token"),
            GatewayError::InvalidOrExpiredToken => {
                (StatusCode::BAD_REQUEST, "Invalid or expired token")
            }
            GatewayError::TokenExpired => (StatusCode::BAD_REQUEST, "Token expired"),
            GatewayError::RedirectMismatch => (StatusCode::BAD_REQUEST, "Redirect URI not allowed"),
            GatewayError::StateOrNonceMismatch => (StatusCode::BAD_REQUEST, "Invalid login state"),
            GatewayError::ProviderRejected(msg) => {
                tracing::warn!("Identity provider rejected login: {}", msg);
                (StatusCode::BAD_REQUEST, "Login was rejected")
            }
            GatewayError::NotAuthenticated => (StatusCode::UNAUTHORIZED, "No token provided"),
            GatewayError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized"),
            GatewayError::EmailAlreadyExists => (StatusCode::CONFLICT, "User already exists"),
            GatewayError::UserNotFound => (StatusCode::NOT_FOUND, "User not found"),
            GatewayError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg.as_str()),
            GatewayError::Configuration(msg) => {
                tracing::error!("Configuration error: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, "Authentication is not configured")
            }
            GatewayError::Upstream(msg) => {
                tracing::error!("Upstream error: {}", msg);
                (StatusCode::BAD_GATEWAY, "Identity provider unavailable")
            }
            GatewayError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        let body = json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}
