//! Governance status handlers

use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures_util::stream::{self, Stream};
use guardian_types::{AssertionId, AssertionView, SnapshotView};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio::sync::broadcast::error::RecvError;

/// Current governance status
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    pub session_id: String,
    pub engine_running: bool,
    #[serde(flatten)]
    pub snapshot: SnapshotView,
}

/// Get the current snapshot
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let manifest = state.engine.manifest();
    Json(StatusResponse {
        project_id: manifest.project_id.clone(),
        project_name: manifest.project_name.clone(),
        session_id: state.engine.session_id().to_string(),
        engine_running: state.engine.is_running(),
        snapshot: state.engine.view(),
    })
}

/// Get one assertion from the current snapshot
pub async fn get_assertion(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<AssertionView>> {
    state
        .engine
        .view()
        .assertions
        .into_iter()
        .find(|a| a.id.as_str() == id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("assertion {}", id)))
}

/// Review request body
#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub reviewer: String,
}

/// Record a human review of an assertion's value
pub async fn review_assertion(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ReviewRequest>,
) -> ApiResult<StatusCode> {
    state
        .engine
        .record_review(&AssertionId::new(id), &request.reviewer)
        .await?;
    Ok(StatusCode::ACCEPTED)
}

/// Ask for an evaluation cycle now
pub async fn trigger_cycle(State(state): State<AppState>) -> ApiResult<StatusCode> {
    if let Some(reason) = state.engine.stop_reason() {
        return Err(ApiError::Unavailable(reason));
    }
    state.engine.trigger_cycle();
    Ok(StatusCode::ACCEPTED)
}

/// Stream governance events via SSE
///
/// Each event is named after its type (`snapshot_committed`,
/// `override_applied`, ...) and carries the JSON event as data.
pub async fn stream_status(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.engine.subscribe();

    let stream = stream::unfold(rx, |mut rx| async move {
        match rx.recv().await {
            Ok(event) => {
                let json = serde_json::to_string(&event).unwrap_or_default();
                let sse_event = Event::default().event(event.event_type()).data(json);
                Some((Ok(sse_event), rx))
            }
            Err(RecvError::Lagged(skipped)) => {
                // Client lagged behind; the next snapshot event resyncs it.
                tracing::debug!(skipped, "Status stream subscriber lagged");
                Some((Ok(Event::default().comment("lagged")), rx))
            }
            Err(RecvError::Closed) => None,
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(state.keep_alive).text("ping"))
}
