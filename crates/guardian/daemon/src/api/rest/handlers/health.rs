//! Health handler

use crate::api::rest::state::AppState;
use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    pub status: String,
    pub version: String,
    pub uptime: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

/// Health check endpoint. A stopped engine answers 503.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthCheckResponse>) {
    let stop_reason = state.engine.stop_reason();
    let (code, status) = match stop_reason {
        None => (StatusCode::OK, "healthy"),
        Some(_) => (StatusCode::SERVICE_UNAVAILABLE, "stopped"),
    };

    (
        code,
        Json(HealthCheckResponse {
            status: status.to_string(),
            version: state.version.clone(),
            uptime: state.uptime(),
            session_id: state.engine.session_id().to_string(),
            stop_reason,
        }),
    )
}
