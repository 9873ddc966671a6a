//! Override submission handler

use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use axum::{extract::State, http::StatusCode, Json};
use guardian_types::{OverrideRecord, OverrideRequest};

/// Submit a signed override.
///
/// Accepted overrides are applied before the response is sent: a status
/// query issued after a 201 already sees the assertions as OVERRIDDEN.
pub async fn submit_override(
    State(state): State<AppState>,
    Json(request): Json<OverrideRequest>,
) -> ApiResult<(StatusCode, Json<OverrideRecord>)> {
    let record = state.engine.submit_override(request).await?;
    Ok((StatusCode::CREATED, Json(record)))
}
