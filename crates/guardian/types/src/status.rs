//! Gate verdicts and the statuses derived from them.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::AssertionId;

/// Outcome of one gate.
///
/// `Skip` means "not checked" (insufficient data or a degraded evaluation) and
/// must never be presented as `Pass`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateStatus {
    Pass,
    Halt,
    Skip,
}

impl GateStatus {
    pub fn is_halt(&self) -> bool {
        matches!(self, Self::Halt)
    }
}

impl fmt::Display for GateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => write!(f, "PASS"),
            Self::Halt => write!(f, "HALT"),
            Self::Skip => write!(f, "SKIP"),
        }
    }
}

/// Which gate produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateKind {
    Freshness,
    Stability,
    Structure,
    Overlap,
}

impl fmt::Display for GateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Freshness => write!(f, "freshness"),
            Self::Stability => write!(f, "stability"),
            Self::Structure => write!(f, "structure"),
            Self::Overlap => write!(f, "overlap"),
        }
    }
}

/// Numbers a gate used to reach its verdict.
///
/// Only normalised figures are kept here; raw cell values never appear.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GateMeasurement {
    Freshness {
        age_seconds: i64,
        sla_seconds: i64,
    },
    Drift {
        drift: f64,
        threshold: f64,
    },
    Structure {
        matches: bool,
    },
    Overlap {
        partner: AssertionId,
        overlap: f64,
        cutoff: f64,
    },
}

/// Verdict of a single gate for a single assertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateVerdict {
    pub gate: GateKind,
    pub status: GateStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurement: Option<GateMeasurement>,
}

impl GateVerdict {
    pub fn pass(gate: GateKind) -> Self {
        Self {
            gate,
            status: GateStatus::Pass,
            reason: None,
            measurement: None,
        }
    }

    pub fn halt(gate: GateKind, reason: impl Into<String>) -> Self {
        Self {
            gate,
            status: GateStatus::Halt,
            reason: Some(reason.into()),
            measurement: None,
        }
    }

    pub fn skip(gate: GateKind, reason: impl Into<String>) -> Self {
        Self {
            gate,
            status: GateStatus::Skip,
            reason: Some(reason.into()),
            measurement: None,
        }
    }

    pub fn with_measurement(mut self, measurement: GateMeasurement) -> Self {
        self.measurement = Some(measurement);
        self
    }
}

/// Effective status of one assertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssertionStatus {
    Pass,
    Halt,
    /// Gates HALT but an active override suppresses escalation.
    Overridden,
}

impl AssertionStatus {
    /// Derive the underlying status from gate verdicts.
    pub fn from_verdicts(verdicts: &[GateVerdict]) -> Self {
        if verdicts.iter().any(|v| v.status.is_halt()) {
            Self::Halt
        } else {
            Self::Pass
        }
    }
}

impl fmt::Display for AssertionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => write!(f, "PASS"),
            Self::Halt => write!(f, "HALT"),
            Self::Overridden => write!(f, "OVERRIDDEN"),
        }
    }
}

/// System-level status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemStatus {
    /// Sentinel before the first cycle commits.
    NotEvaluated,
    Pass,
    Halt,
    /// The last cycle could not read the source and nothing is HALT.
    Unknown,
}

impl fmt::Display for SystemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotEvaluated => write!(f, "NOT_EVALUATED"),
            Self::Pass => write!(f, "PASS"),
            Self::Halt => write!(f, "HALT"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_verdicts() {
        let passing = vec![
            GateVerdict::pass(GateKind::Freshness),
            GateVerdict::skip(GateKind::Stability, "no baseline"),
        ];
        assert_eq!(AssertionStatus::from_verdicts(&passing), AssertionStatus::Pass);

        let halting = vec![
            GateVerdict::pass(GateKind::Freshness),
            GateVerdict::halt(GateKind::Structure, "fingerprint changed"),
        ];
        assert_eq!(AssertionStatus::from_verdicts(&halting), AssertionStatus::Halt);
    }

    #[test]
    fn test_skip_is_distinguishable_from_pass() {
        let json = serde_json::to_string(&GateStatus::Skip).unwrap();
        assert_eq!(json, "\"SKIP\"");
        assert_ne!(GateStatus::Skip, GateStatus::Pass);
    }

    #[test]
    fn test_measurement_tagging() {
        let m = GateMeasurement::Drift {
            drift: 0.2,
            threshold: 0.15,
        };
        let value = serde_json::to_value(&m).unwrap();
        assert_eq!(value["kind"], "drift");
    }
}
