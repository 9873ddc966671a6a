//! Guardian Types - Core types for assertion governance
//!
//! Guardian continuously evaluates user-declared *assertions* (a bound data
//! source cell plus an expected statistical, temporal and structural contract)
//! and maintains one authoritative pass/fail status per assertion and for the
//! system as a whole.
//!
//! ## Key Concepts
//!
//! - **Assertion**: governed cell-value contract with an owner, a PERT
//!   distribution and optional baseline value / structural fingerprint
//! - **Gate**: one independent PASS / HALT / SKIP check
//! - **EvaluationSnapshot**: the atomic unit held by the state authority
//! - **OverrideRecord**: signed, justified, time-boxed HALT suppression
//! - **GovernanceEvent**: change stream for observers

#![deny(unsafe_code)]

pub mod assertion;
pub mod distribution;
pub mod events;
pub mod ids;
pub mod overrides;
pub mod snapshot;
pub mod status;
pub mod time;

pub use assertion::{Assertion, DataBinding, StructuralFingerprint};
pub use distribution::{DistributionError, PertDistribution};
pub use events::GovernanceEvent;
pub use ids::{AssertionId, OverrideId};
pub use overrides::{compute_content_hash, ActiveOverride, OverrideRecord, OverrideRequest};
pub use snapshot::{
    AssertionEvaluation, AssertionView, ConflictCheck, EvaluationSnapshot, SnapshotView,
};
pub use status::{AssertionStatus, GateKind, GateMeasurement, GateStatus, GateVerdict, SystemStatus};
pub use time::parse_utc_timestamp;
