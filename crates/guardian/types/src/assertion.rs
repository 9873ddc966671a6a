//! Assertion - a governed cell-value contract.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::distribution::PertDistribution;
use crate::ids::AssertionId;

/// Opaque hash of the computation behind a monitored value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StructuralFingerprint(String);

impl StructuralFingerprint {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened form for logs and ledger details.
    pub fn abbreviated(&self) -> String {
        let prefix: String = self.0.chars().take(16).collect();
        if prefix.len() < self.0.len() {
            format!("{prefix}...")
        } else {
            prefix
        }
    }
}

impl fmt::Display for StructuralFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Location of one cell in the external data source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataBinding {
    /// Cell reference, e.g. `B5`.
    pub cell: String,

    /// Sheet name. `None` reads the source's active sheet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheet: Option<String>,

    /// Optional named range the cell is known by.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub named_range: Option<String>,
}

impl DataBinding {
    pub fn cell(cell: impl Into<String>) -> Self {
        Self {
            cell: cell.into(),
            sheet: None,
            named_range: None,
        }
    }

    pub fn with_sheet(mut self, sheet: impl Into<String>) -> Self {
        self.sheet = Some(sheet.into());
        self
    }
}

impl fmt::Display for DataBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sheet {
            Some(sheet) => write!(f, "{}!{}", sheet, self.cell),
            None => f.write_str(&self.cell),
        }
    }
}

/// A validated governance contract.
///
/// Built by the manifest loader. Immutable during a run except for
/// `last_updated`, which only [`Assertion::mark_reviewed`] changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assertion {
    pub id: AssertionId,
    pub logical_name: String,
    /// Accountable role.
    pub owner_role: String,
    pub binding: DataBinding,
    pub distribution: PertDistribution,
    pub baseline_value: Option<f64>,
    pub baseline_fingerprint: Option<StructuralFingerprint>,
    pub sla_days: u32,
    #[serde(with = "crate::time::flexible_utc")]
    pub last_updated: DateTime<Utc>,
}

impl Assertion {
    /// Freshness window.
    pub fn sla_window(&self) -> Duration {
        Duration::days(i64::from(self.sla_days))
    }

    /// Record an explicit human review. The engine never calls this on its own.
    pub fn mark_reviewed(&mut self, at: DateTime<Utc>) {
        self.last_updated = at;
    }
}
