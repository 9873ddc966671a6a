use guardian_types::{AssertionId, DistributionError};
use thiserror::Error;

/// Errors raised while evaluating a gate.
///
/// The cycle runner never propagates these: they degrade the affected gate to
/// SKIP and are recorded against the assertion.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GateError {
    #[error("invalid distribution: {0}")]
    InvalidDistribution(#[from] DistributionError),

    #[error("non-finite value for assertion {0}")]
    NonFiniteValue(AssertionId),

    #[error("quadrature needs a positive even interval count, got {0}")]
    InvalidQuadrature(usize),

    #[error("invalid threshold {name}: {value}")]
    InvalidThreshold { name: &'static str, value: f64 },

    #[error("conflict pair references unknown assertion: {0}")]
    UnknownAssertion(AssertionId),
}

pub type Result<T> = std::result::Result<T, GateError>;
