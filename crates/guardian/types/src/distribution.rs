//! Three-point (PERT) uncertainty model for an assertion.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pessimistic / most-likely / optimistic estimate of a governed value.
///
/// A valid distribution has finite bounds with `min <= mode <= max`. The
/// manifest loader rejects anything else before the engine starts, so every
/// distribution reachable from an [`crate::Assertion`] satisfies this.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PertDistribution {
    pub min: f64,
    pub mode: f64,
    pub max: f64,
}

/// Why a distribution was rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DistributionError {
    #[error("distribution field '{field}' is not finite")]
    NonFinite { field: &'static str },

    #[error("distribution violation: must satisfy min <= mode <= max (got {min}, {mode}, {max})")]
    Unordered { min: f64, mode: f64, max: f64 },
}

impl PertDistribution {
    /// Build a validated distribution.
    pub fn new(min: f64, mode: f64, max: f64) -> Result<Self, DistributionError> {
        let dist = Self { min, mode, max };
        dist.validate()?;
        Ok(dist)
    }

    /// Check finiteness and ordering.
    pub fn validate(&self) -> Result<(), DistributionError> {
        for (field, value) in [("min", self.min), ("mode", self.mode), ("max", self.max)] {
            if !value.is_finite() {
                return Err(DistributionError::NonFinite { field });
            }
        }

        if !(self.min <= self.mode && self.mode <= self.max) {
            return Err(DistributionError::Unordered {
                min: self.min,
                mode: self.mode,
                max: self.max,
            });
        }

        Ok(())
    }

    /// Width of the support.
    pub fn range(&self) -> f64 {
        self.max - self.min
    }

    /// A zero-width distribution is a point mass at `mode`.
    pub fn is_degenerate(&self) -> bool {
        self.range() <= 0.0
    }

    /// PERT mean, `(min + 4 mode + max) / 6`.
    pub fn mean(&self) -> f64 {
        (self.min + 4.0 * self.mode + self.max) / 6.0
    }

    /// Whether `value` lies inside the closed support.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}
