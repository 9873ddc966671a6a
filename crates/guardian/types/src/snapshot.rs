//! Evaluation snapshots and their zero-leakage views.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::assertion::StructuralFingerprint;
use crate::distribution::PertDistribution;
use crate::ids::AssertionId;
use crate::overrides::ActiveOverride;
use crate::status::{AssertionStatus, GateStatus, GateVerdict, SystemStatus};

/// Result of evaluating one assertion in one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionEvaluation {
    pub assertion_id: AssertionId,
    pub logical_name: String,
    pub owner_role: String,
    pub distribution: PertDistribution,
    pub verdicts: Vec<GateVerdict>,
    /// Status the gates alone produce.
    pub underlying_status: AssertionStatus,
    /// Status after applying any active override.
    pub status: AssertionStatus,
    /// Normalised drift used by the stability gate.
    pub drift: Option<f64>,
    /// Raw value read from the source. Never exposed through [`SnapshotView`].
    pub current_value: Option<f64>,
    pub current_fingerprint: Option<StructuralFingerprint>,
    pub read_at: Option<DateTime<Utc>>,
    /// Set when the assertion could not be fully evaluated.
    pub evaluation_error: Option<String>,
    pub active_override: Option<ActiveOverride>,
}

impl AssertionEvaluation {
    /// Recompute `status` from `underlying_status` and `active_override`.
    pub fn apply_override(&mut self, active: Option<ActiveOverride>) {
        self.active_override = active;
        self.status = match (self.underlying_status, &self.active_override) {
            (AssertionStatus::Halt, Some(_)) => AssertionStatus::Overridden,
            (AssertionStatus::Halt, None) => AssertionStatus::Halt,
            _ => AssertionStatus::Pass,
        };
    }

    pub fn is_halted(&self) -> bool {
        self.status == AssertionStatus::Halt
    }

    pub fn verdict(&self, gate: crate::status::GateKind) -> Option<&GateVerdict> {
        self.verdicts.iter().find(|v| v.gate == gate)
    }
}

/// Outcome of one declared conflict pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictCheck {
    pub first: AssertionId,
    pub second: AssertionId,
    pub overlap: f64,
    pub cutoff: f64,
    pub status: GateStatus,
}

/// The atomic unit the state authority holds.
///
/// Replaced wholesale on every commit; never mutated once published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSnapshot {
    /// Strictly increasing commit counter. `0` is the not-evaluated sentinel.
    pub sequence: u64,
    /// Sequence that was current when the producing cycle started reading.
    pub based_on_sequence: u64,
    /// Non-decreasing commit time.
    pub evaluated_at: DateTime<Utc>,
    pub system_status: SystemStatus,
    pub assertions: BTreeMap<AssertionId, AssertionEvaluation>,
    pub conflicts: Vec<ConflictCheck>,
    /// Source-level failure of the producing cycle, if any.
    pub source_error: Option<String>,
}

impl EvaluationSnapshot {
    /// Sentinel returned before the first cycle commits.
    pub fn not_evaluated() -> Self {
        Self {
            sequence: 0,
            based_on_sequence: 0,
            evaluated_at: DateTime::<Utc>::default(),
            system_status: SystemStatus::NotEvaluated,
            assertions: BTreeMap::new(),
            conflicts: Vec::new(),
            source_error: None,
        }
    }

    pub fn is_evaluated(&self) -> bool {
        self.sequence > 0
    }

    /// Derive the system status.
    ///
    /// HALT iff at least one assertion is HALT. Otherwise UNKNOWN when the
    /// producing cycle failed to read the source, PASS when it did not.
    pub fn recompute_system_status(&mut self) {
        self.system_status = if self.sequence == 0 {
            SystemStatus::NotEvaluated
        } else if self.assertions.values().any(AssertionEvaluation::is_halted) {
            SystemStatus::Halt
        } else if self.source_error.is_some() {
            SystemStatus::Unknown
        } else {
            SystemStatus::Pass
        };
    }

    pub fn get(&self, id: &AssertionId) -> Option<&AssertionEvaluation> {
        self.assertions.get(id)
    }

    pub fn halted_ids(&self) -> Vec<AssertionId> {
        self.assertions
            .values()
            .filter(|e| e.is_halted())
            .map(|e| e.assertion_id.clone())
            .collect()
    }

    pub fn count_by_status(&self, status: AssertionStatus) -> usize {
        self.assertions.values().filter(|e| e.status == status).count()
    }

    /// Strip raw values for low-trust observers.
    pub fn view(&self) -> SnapshotView {
        SnapshotView::from(self)
    }
}

/// Observer-facing assertion entry. Carries distribution shape and verdicts,
/// never raw current or baseline values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionView {
    pub id: AssertionId,
    pub logical_name: String,
    pub owner_role: String,
    pub status: AssertionStatus,
    pub underlying_status: AssertionStatus,
    pub distribution: PertDistribution,
    pub drift: Option<f64>,
    pub verdicts: Vec<GateVerdict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_error: Option<String>,
}

/// Observer-facing snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotView {
    pub sequence: u64,
    pub evaluated_at: DateTime<Utc>,
    pub system_status: SystemStatus,
    pub halted: usize,
    pub overridden: usize,
    pub assertions: Vec<AssertionView>,
    pub conflicts: Vec<ConflictCheck>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_error: Option<String>,
}

impl From<&AssertionEvaluation> for AssertionView {
    fn from(eval: &AssertionEvaluation) -> Self {
        Self {
            id: eval.assertion_id.clone(),
            logical_name: eval.logical_name.clone(),
            owner_role: eval.owner_role.clone(),
            status: eval.status,
            underlying_status: eval.underlying_status,
            distribution: eval.distribution,
            drift: eval.drift,
            verdicts: eval.verdicts.clone(),
            override_expires_at: eval.active_override.as_ref().map(|o| o.expires_at),
            evaluation_error: eval.evaluation_error.clone(),
        }
    }
}

impl From<&EvaluationSnapshot> for SnapshotView {
    fn from(snapshot: &EvaluationSnapshot) -> Self {
        Self {
            sequence: snapshot.sequence,
            evaluated_at: snapshot.evaluated_at,
            system_status: snapshot.system_status,
            halted: snapshot.count_by_status(AssertionStatus::Halt),
            overridden: snapshot.count_by_status(AssertionStatus::Overridden),
            assertions: snapshot.assertions.values().map(AssertionView::from).collect(),
            conflicts: snapshot.conflicts.clone(),
            source_error: snapshot.source_error.clone(),
        }
    }
}
