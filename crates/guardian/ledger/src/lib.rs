//! Guardian Ledger - Tamper-evident governance audit trail
//!
//! The ledger is the only durable state the engine keeps. Every event is
//! linked to its predecessor by a SHA-256 chain, and accepted overrides embed
//! their plaintext fields so their content hash can be recomputed offline.
//!
//! Event kinds: `CYCLE`, `HALT`, `OVERRIDE`, `RESOLVE`.

pub mod error;
pub mod event;
pub mod integrity;
pub mod query;
pub mod sink;
pub mod verify;

pub use error::{LedgerError, Result};
pub use event::{
    new_session_id, Actor, ActorType, EventKind, LedgerEvent, LedgerEventBuilder, Outcome,
    PartialLedgerEvent, Severity,
};
pub use integrity::{ChainVerification, ChainVerifier, LedgerChain};
pub use query::{LedgerPage, LedgerQuery, LedgerQueryBuilder, LedgerSummary, SeverityFilter};
pub use sink::{read_events, FileLedger, LedgerSink, MemoryLedger};
pub use verify::{
    check_override_event, verify_events, verify_ledger, LedgerVerification, OverrideCheck,
    OverrideIntegrity, OVERRIDE_DETAIL_KEY,
};
