//! Current user and health endpoints

use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

use crate::authenticator::{AuthResult, AuthSource};
use crate::gateway::Principal;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub auth_type: AuthSource,
    pub user: Principal,
}

/// GET /user/me
pub async fn me(auth: AuthResult) -> Json<MeResponse> {
    Json(MeResponse {
        auth_type: auth.source,
        user: auth.principal,
    })
}

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
