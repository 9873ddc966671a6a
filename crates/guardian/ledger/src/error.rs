//! Ledger error types

use thiserror::Error;

/// Errors raised by the ledger
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("ledger event missing required field: {0}")]
    MissingField(&'static str),

    #[error("corrupt ledger record at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },

    #[error("ledger chain broken at event {index}: {reason}")]
    BrokenChain { index: usize, reason: String },

    #[error("invalid ledger filter: {0}")]
    InvalidFilter(String),
}

pub type Result<T> = std::result::Result<T, LedgerError>;
