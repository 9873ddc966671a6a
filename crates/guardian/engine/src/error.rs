//! Error types for guardian-engine

use chrono::{DateTime, Utc};
use guardian_gates::GateError;
use guardian_ledger::LedgerError;
use guardian_types::{AssertionId, AssertionStatus};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Manifest could not be turned into a validated assertion set.
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("failed to read manifest {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("manifest is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("manifest failed validation: {}", .violations.join("; "))]
    Invalid { violations: Vec<String> },
}

/// Failure reading the external data source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The source does not exist.
    #[error("source unavailable: {0}")]
    Unavailable(String),

    /// Transient; another process holds the source or it is mid-write.
    #[error("source locked: {0}")]
    Locked(String),

    /// The named sheet or cell does not exist in the source.
    #[error("binding invalid: {0}")]
    BindingInvalid(String),

    #[error("source still locked after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("source read timed out after {0:?}")]
    TimedOut(Duration),
}

impl SourceError {
    /// Only a locked source is worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Locked(_))
    }
}

/// Why an override submission was refused. No state changed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OverrideRejection {
    #[error("override names no assertions")]
    NoAssertions,

    #[error("unknown assertion: {0}")]
    UnknownAssertion(AssertionId),

    #[error("assertion {id} is {status}, only HALT assertions can be overridden")]
    NotInHalt {
        id: AssertionId,
        status: AssertionStatus,
    },

    #[error("malformed signer: {0}")]
    MalformedSigner(String),

    #[error("justification is empty")]
    EmptyJustification,

    #[error("content hash does not match sha256(justification|signer|timestamp)")]
    ContentHashMismatch,

    #[error("malformed timestamp: {0}")]
    MalformedTimestamp(String),

    #[error("override would have expired at {0}")]
    Expired(DateTime<Utc>),

    #[error("timestamp {0} is in the future")]
    FutureTimestamp(DateTime<Utc>),

    /// State moved under the submission and re-validation failed.
    #[error("state changed during submission: {0}")]
    StateConflict(String),

    #[error("no evaluation cycle has completed yet")]
    NotEvaluated,
}

impl OverrideRejection {
    /// Stable machine-readable reason code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoAssertions => "no_assertions",
            Self::UnknownAssertion(_) => "unknown_assertion",
            Self::NotInHalt { .. } => "not_in_halt",
            Self::MalformedSigner(_) => "malformed_signer",
            Self::EmptyJustification => "empty_justification",
            Self::ContentHashMismatch => "content_hash_mismatch",
            Self::MalformedTimestamp(_) => "malformed_timestamp",
            Self::Expired(_) => "expired",
            Self::FutureTimestamp(_) => "future_timestamp",
            Self::StateConflict(_) => "state_conflict",
            Self::NotEvaluated => "not_evaluated",
        }
    }
}

/// Errors raised by the engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Gate(#[from] GateError),

    /// The ledger could not record a decision. Fatal for the engine.
    #[error("ledger write failure: {0}")]
    LedgerWriteFailure(#[source] LedgerError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("override rejected: {0}")]
    Rejected(#[from] OverrideRejection),

    #[error("unknown assertion: {0}")]
    UnknownAssertion(AssertionId),

    #[error("snapshot sequence {got} does not follow {current}")]
    SequenceViolation { current: u64, got: u64 },

    #[error("engine stopped: {0}")]
    Stopped(String),
}

impl EngineError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::LedgerWriteFailure(_))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
