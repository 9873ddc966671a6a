//! Guardian Gates - Drift/overlap calculator and gate evaluators
//!
//! Gates are pure functions of (assertion, current observation, baseline):
//!
//! | Gate | HALT when | SKIP when |
//! |------|-----------|-----------|
//! | Freshness | `now - last_updated > sla_window` | never |
//! | Stability | drift against baseline exceeds the threshold | no baseline or no usable value |
//! | Structure | current fingerprint differs from the baseline one | no baseline fingerprint |
//! | Overlap | a declared pair's overlap integral is below the cutoff | a member cannot be evaluated |
//!
//! The overlap integral is computed by quadrature over the PERT-Beta
//! densities, never approximated by a distance between modes.

#![deny(unsafe_code)]

pub mod engine;
pub mod error;
pub mod evaluators;
pub mod overlap;
pub mod pert;

pub use engine::{CycleVerdicts, GateConfig, GateEngine, Observation};
pub use error::{GateError, Result};
pub use overlap::{overlap, overlap_with_intervals, DEFAULT_INTERVALS, MAX_DISTINCT_OVERLAP};
pub use pert::{drift, pert_density, relative_drift, BetaShape};
