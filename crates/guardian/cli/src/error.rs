//! CLI error types

use thiserror::Error;

/// CLI error types
#[derive(Debug, Error)]
pub enum CliError {
    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API error response
    #[error("API error: {status} {code} - {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Machine-readable error code
        code: String,
        /// Error message
        message: String,
        /// Specific reason, e.g. an override rejection code
        reason: Option<String>,
    },

    /// Manifest could not be loaded
    #[error(transparent)]
    Manifest(#[from] guardian_engine::ManifestError),

    /// Ledger could not be read
    #[error("Ledger error: {0}")]
    Ledger(#[from] guardian_ledger::LedgerError),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML encoding error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;
