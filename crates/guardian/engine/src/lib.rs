//! Guardian Engine - Continuous assertion governance
//!
//! The engine watches one external data source and keeps a single
//! authoritative [`EvaluationSnapshot`](guardian_types::EvaluationSnapshot)
//! of its governed assertions.
//!
//! ## Architecture
//!
//! ```text
//! ChangeNotifier ─► Scheduler (debounce FSM) ─► CycleRunner ─┐
//!                                                             ▼
//! OverrideProtocol ──────────────────────────────► StateAuthority ─► GovernanceEvent
//! Expiry sweep ───────────────────────────────────┘       │
//!                                                          ▼
//!                                                  LedgerRecorder ─► LedgerSink
//! ```
//!
//! Every state change goes through the State Authority's mutation boundary.
//! Ledger events are appended before the commit they describe; a ledger that
//! cannot be written stops the engine instead of letting it run unaudited.

#![deny(unsafe_code)]

pub mod authority;
pub mod config;
pub mod cycle;
pub mod engine;
pub mod error;
pub mod expiry;
pub mod manifest;
pub mod notifier;
pub mod overrides;
pub mod recorder;
pub mod scheduler;
pub mod source;

pub use authority::{MutationGuard, StateAuthority};
pub use config::{EngineConfig, RetryPolicy};
pub use cycle::{CycleReport, CycleRunner};
pub use engine::{EngineComponents, GovernanceEngine};
pub use error::{EngineError, ManifestError, OverrideRejection, Result, SourceError};
pub use expiry::{run_expiry_loop, sweep_expired};
pub use manifest::{Manifest, ManifestDocument, ValidationReport, DEFAULT_LEDGER_FILE};
pub use notifier::{ChangeFilter, ChangeNotification, ChangeNotifier, ChannelNotifier, PollingNotifier};
pub use overrides::{validate_request, validate_state, OverrideProtocol, MAX_SIGNER_LEN};
pub use recorder::LedgerRecorder;
pub use scheduler::{Scheduler, SchedulerAction, SchedulerFsm, SchedulerInput, SchedulerState};
pub use source::{
    formula_fingerprint, read_with_retry, BindingReadings, CellValue, DataSourceReader,
    JsonWorkbookSource, MemorySource, SourceReading, STATIC_VALUE_FINGERPRINT,
};
