//! Error types for guardian-daemon

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use guardian_engine::{EngineError, ManifestError, OverrideRejection};
use serde::Serialize;
use thiserror::Error;

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Manifest could not be loaded
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// Engine failed to start or stopped
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Server startup error
    #[error("Server error: {0}")]
    Server(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// API-specific errors
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Override refused by the protocol
    #[error("Override rejected: {0}")]
    Rejected(OverrideRejection),

    /// Engine stopped or cannot write its ledger
    #[error("Engine unavailable: {0}")]
    Unavailable(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Rejected(rejection) => ApiError::Rejected(rejection),
            EngineError::UnknownAssertion(id) => ApiError::NotFound(format!("assertion {id}")),
            EngineError::Configuration(message) => ApiError::BadRequest(message),
            e @ (EngineError::Stopped(_) | EngineError::LedgerWriteFailure(_)) => {
                ApiError::Unavailable(e.to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

fn rejection_status(rejection: &OverrideRejection) -> StatusCode {
    match rejection {
        OverrideRejection::UnknownAssertion(_) => StatusCode::NOT_FOUND,
        OverrideRejection::NotInHalt { .. }
        | OverrideRejection::StateConflict(_)
        | OverrideRejection::NotEvaluated => StatusCode::CONFLICT,
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, details) = match &self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", None),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", None),
            ApiError::Rejected(rejection) => (
                rejection_status(rejection),
                "OVERRIDE_REJECTED",
                Some(serde_json::json!({ "reason": rejection.code() })),
            ),
            ApiError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "ENGINE_UNAVAILABLE", None),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", None),
        };

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type alias for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;
