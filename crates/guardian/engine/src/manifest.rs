//! Manifest loader
//!
//! A manifest is the declarative contract for one governed project: the
//! target workbook, the gate thresholds, the declared conflict pairs and the
//! assertions themselves. Loading validates everything up front and reports
//! every violation at once; nothing half-valid reaches the engine.

use chrono::{DateTime, Utc};
use guardian_gates::GateConfig;
use guardian_types::{
    parse_utc_timestamp, Assertion, AssertionId, DataBinding, PertDistribution,
    StructuralFingerprint,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::ManifestError;
use crate::source::{CellValue, DataSourceReader};

/// Ledger file name used when none is configured.
pub const DEFAULT_LEDGER_FILE: &str = "audit_log.jsonl";

/// Manifest as written on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestDocument {
    pub project_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,

    /// Workbook path, relative to the manifest's directory unless absolute
    pub target_file: String,

    #[serde(default = "default_stability_threshold")]
    pub stability_threshold: f64,

    #[serde(default = "default_overlap_cutoff")]
    pub overlap_integral_cutoff: f64,

    #[serde(default)]
    pub conflict_pairs: Vec<[String; 2]>,

    #[serde(default)]
    pub assertions: Vec<AssertionEntry>,
}

fn default_stability_threshold() -> f64 {
    GateConfig::default().stability_threshold
}

fn default_overlap_cutoff() -> f64 {
    GateConfig::default().overlap_cutoff
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionEntry {
    pub id: String,
    pub logical_name: String,
    pub owner_role: String,
    pub binding: BindingEntry,
    /// RFC 3339, naive date-time or date; naive values are UTC.
    pub last_updated: String,
    pub sla_days: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_value: Option<f64>,
    pub distribution: DistributionEntry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingEntry {
    pub cell: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub named_range: Option<String>,
    /// Baseline structural fingerprint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula_hash: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DistributionEntry {
    pub min: f64,
    pub mode: f64,
    pub max: f64,
}

/// Errors and warnings from preflight validation
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    fn warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

impl ManifestDocument {
    /// Collect every violation in the document.
    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();

        if self.project_id.trim().is_empty() {
            report.error("project_id is empty");
        }
        if self.target_file.trim().is_empty() {
            report.error("target_file is empty");
        }

        let gates = GateConfig {
            stability_threshold: self.stability_threshold,
            overlap_cutoff: self.overlap_integral_cutoff,
        };
        if let Err(e) = gates.validate() {
            report.error(e.to_string());
        }

        if self.assertions.is_empty() {
            report.warning("manifest declares no assertions; nothing will be governed");
        }

        let mut seen = HashSet::new();
        for (index, entry) in self.assertions.iter().enumerate() {
            let label = if entry.id.trim().is_empty() {
                format!("assertion #{index}")
            } else {
                format!("assertion '{}'", entry.id)
            };

            if entry.id.trim().is_empty() {
                report.error(format!("{label}: id is empty"));
            } else if !seen.insert(entry.id.as_str()) {
                report.error(format!("{label}: duplicate id"));
            }
            if entry.logical_name.trim().is_empty() {
                report.error(format!("{label}: logical_name is empty"));
            }
            if entry.owner_role.trim().is_empty() {
                report.error(format!("{label}: owner_role is empty"));
            }
            if entry.binding.cell.trim().is_empty() {
                report.error(format!("{label}: binding.cell is empty"));
            }
            if matches!(entry.binding.sheet.as_deref(), Some(s) if s.trim().is_empty()) {
                report.error(format!("{label}: binding.sheet is empty"));
            }
            if entry.sla_days == 0 {
                report.error(format!("{label}: sla_days must be at least 1"));
            }
            if parse_utc_timestamp(&entry.last_updated).is_none() {
                report.error(format!(
                    "{label}: last_updated '{}' is not a recognised timestamp",
                    entry.last_updated
                ));
            }
            let d = entry.distribution;
            if let Err(e) = PertDistribution::new(d.min, d.mode, d.max) {
                report.error(format!("{label}: {e}"));
            }
            if let Some(baseline) = entry.baseline_value {
                if !baseline.is_finite() {
                    report.error(format!("{label}: baseline_value is not finite"));
                }
            }
        }

        let mut pairs = HashSet::new();
        for [first, second] in &self.conflict_pairs {
            for id in [first, second] {
                if !seen.contains(id.as_str()) {
                    report.error(format!("conflict pair [{first}, {second}]: unknown assertion '{id}'"));
                }
            }
            if first == second {
                report.error(format!("conflict pair [{first}, {second}]: pairs an assertion with itself"));
            }
            let key = if first <= second {
                (first.as_str(), second.as_str())
            } else {
                (second.as_str(), first.as_str())
            };
            if !pairs.insert(key) {
                report.error(format!("conflict pair [{first}, {second}]: declared more than once"));
            }
        }

        report
    }
}

/// Validated manifest
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub project_id: String,
    pub project_name: Option<String>,
    /// Resolved workbook path
    pub target_path: PathBuf,
    /// Directory the manifest was loaded from
    pub base_dir: PathBuf,
    pub gates: GateConfig,
    pub conflict_pairs: Vec<(AssertionId, AssertionId)>,
    pub assertions: Vec<Assertion>,
}

impl Manifest {
    /// Read, parse and validate a manifest file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ManifestError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let manifest = Self::from_json(&raw, base_dir)?;

        info!(
            path = %path.display(),
            project_id = %manifest.project_id,
            assertions = manifest.assertions.len(),
            conflict_pairs = manifest.conflict_pairs.len(),
            "Manifest loaded"
        );
        Ok(manifest)
    }

    pub fn from_json(raw: &str, base_dir: impl Into<PathBuf>) -> Result<Self, ManifestError> {
        let document: ManifestDocument = serde_json::from_str(raw)?;
        Self::from_document(document, base_dir)
    }

    /// Validate a parsed document and build the assertion set.
    pub fn from_document(
        document: ManifestDocument,
        base_dir: impl Into<PathBuf>,
    ) -> Result<Self, ManifestError> {
        let report = document.validate();
        for warning in &report.warnings {
            warn!(project_id = %document.project_id, "{}", warning);
        }
        if !report.is_valid() {
            return Err(ManifestError::Invalid {
                violations: report.errors,
            });
        }

        let base_dir = base_dir.into();
        let target_path = base_dir.join(&document.target_file);

        let mut assertions = Vec::with_capacity(document.assertions.len());
        let mut violations = Vec::new();
        for entry in document.assertions {
            match build_assertion(entry) {
                Ok(assertion) => assertions.push(assertion),
                Err(violation) => violations.push(violation),
            }
        }
        if !violations.is_empty() {
            return Err(ManifestError::Invalid { violations });
        }

        Ok(Self {
            project_id: document.project_id,
            project_name: document.project_name,
            target_path,
            base_dir,
            gates: GateConfig {
                stability_threshold: document.stability_threshold,
                overlap_cutoff: document.overlap_integral_cutoff,
            },
            conflict_pairs: document
                .conflict_pairs
                .into_iter()
                .map(|[a, b]| (AssertionId::new(a), AssertionId::new(b)))
                .collect(),
            assertions,
        })
    }

    /// `audit_log.jsonl` beside the manifest.
    pub fn default_ledger_path(&self) -> PathBuf {
        self.base_dir.join(DEFAULT_LEDGER_FILE)
    }

    pub fn assertion(&self, id: &AssertionId) -> Option<&Assertion> {
        self.assertions.iter().find(|a| &a.id == id)
    }

    /// Check every binding against the live source.
    ///
    /// Invalid bindings and an unreadable source are errors; empty or
    /// non-numeric cells under an assertion with a baseline are warnings.
    pub async fn preflight(&self, source: &dyn DataSourceReader) -> ValidationReport {
        let mut report = ValidationReport::default();
        let bindings: Vec<(AssertionId, DataBinding)> = self
            .assertions
            .iter()
            .map(|a| (a.id.clone(), a.binding.clone()))
            .collect();

        let readings = match source.read_all(&bindings).await {
            Ok(readings) => readings,
            Err(e) => {
                report.error(format!("{}: {}", self.target_path.display(), e));
                return report;
            }
        };

        for assertion in &self.assertions {
            match readings.get(&assertion.id) {
                Some(Ok(reading)) => match &reading.value {
                    CellValue::Empty => report.warning(format!(
                        "assertion '{}': cell {} is empty",
                        assertion.id, assertion.binding
                    )),
                    CellValue::Text(_) if assertion.baseline_value.is_some() => {
                        report.warning(format!(
                            "assertion '{}': cell {} is not numeric but a baseline is declared",
                            assertion.id, assertion.binding
                        ))
                    }
                    _ => {}
                },
                Some(Err(e)) => report.error(format!("assertion '{}': {}", assertion.id, e)),
                None => report.error(format!(
                    "assertion '{}': source returned no reading",
                    assertion.id
                )),
            }
        }

        report
    }
}

fn build_assertion(entry: AssertionEntry) -> Result<Assertion, String> {
    let last_updated: DateTime<Utc> = parse_utc_timestamp(&entry.last_updated)
        .ok_or_else(|| format!("assertion '{}': unparseable last_updated", entry.id))?;
    let d = entry.distribution;
    let distribution = PertDistribution::new(d.min, d.mode, d.max)
        .map_err(|e| format!("assertion '{}': {}", entry.id, e))?;

    Ok(Assertion {
        id: AssertionId::new(entry.id),
        logical_name: entry.logical_name,
        owner_role: entry.owner_role,
        binding: DataBinding {
            cell: entry.binding.cell,
            sheet: entry.binding.sheet,
            named_range: entry.binding.named_range,
        },
        distribution,
        baseline_value: entry.baseline_value,
        baseline_fingerprint: entry.binding.formula_hash.map(StructuralFingerprint::new),
        sla_days: entry.sla_days,
        last_updated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample() -> serde_json::Value {
        serde_json::json!({
            "project_id": "fy26-plan",
            "project_name": "FY26 Operating Plan",
            "target_file": "model.json",
            "conflict_pairs": [["revenue", "pipeline"]],
            "assertions": [
                {
                    "id": "revenue",
                    "logical_name": "Revenue forecast",
                    "owner_role": "VP Sales",
                    "binding": {"cell": "B5", "sheet": "Model", "formula_hash": "abc"},
                    "last_updated": "2026-01-20T09:00:00",
                    "sla_days": 30,
                    "baseline_value": 1200000.0,
                    "distribution": {"min": 1000000.0, "mode": 1200000.0, "max": 1500000.0}
                },
                {
                    "id": "pipeline",
                    "logical_name": "Qualified pipeline",
                    "owner_role": "CRO",
                    "binding": {"cell": "C9"},
                    "last_updated": "2026-01-20",
                    "sla_days": 7,
                    "distribution": {"min": 900000.0, "mode": 1100000.0, "max": 1400000.0}
                }
            ]
        })
    }

    #[test]
    fn test_loads_valid_manifest() {
        let manifest = Manifest::from_json(&sample().to_string(), "/projects/fy26").unwrap();
        assert_eq!(manifest.assertions.len(), 2);
        assert_eq!(manifest.target_path, PathBuf::from("/projects/fy26/model.json"));
        assert_eq!(
            manifest.default_ledger_path(),
            PathBuf::from("/projects/fy26/audit_log.jsonl")
        );
        assert_eq!(manifest.gates, GateConfig::default());
        assert_eq!(
            manifest.assertions[0].baseline_fingerprint,
            Some(StructuralFingerprint::new("abc"))
        );
        assert_eq!(manifest.assertions[0].binding.to_string(), "Model!B5");
        assert!(manifest.assertions[1].baseline_value.is_none());
    }

    #[test]
    fn test_absolute_target_is_kept() {
        let mut doc = sample();
        doc["target_file"] = serde_json::json!("/data/model.json");
        let manifest = Manifest::from_json(&doc.to_string(), "/projects/fy26").unwrap();
        assert_eq!(manifest.target_path, PathBuf::from("/data/model.json"));
    }

    #[test]
    fn test_rejects_unordered_distribution() {
        let mut doc = sample();
        doc["assertions"][0]["distribution"]["mode"] = serde_json::json!(2_000_000.0);
        let err = Manifest::from_json(&doc.to_string(), ".").unwrap_err();
        assert!(matches!(err, ManifestError::Invalid { .. }));
    }

    #[test]
    fn test_collects_every_violation() {
        let mut doc = sample();
        doc["assertions"][1]["id"] = serde_json::json!("revenue");
        doc["assertions"][0]["sla_days"] = serde_json::json!(0);
        doc["assertions"][0]["last_updated"] = serde_json::json!("last tuesday");
        doc["stability_threshold"] = serde_json::json!(1.5);

        let ManifestError::Invalid { violations } =
            Manifest::from_json(&doc.to_string(), ".").unwrap_err()
        else {
            panic!("expected validation failure");
        };
        assert!(violations.iter().any(|v| v.contains("duplicate id")));
        assert!(violations.iter().any(|v| v.contains("sla_days")));
        assert!(violations.iter().any(|v| v.contains("last_updated")));
        assert!(violations.iter().any(|v| v.contains("stability_threshold")));
        // "pipeline" no longer exists, so the declared pair is dangling too.
        assert!(violations.iter().any(|v| v.contains("unknown assertion 'pipeline'")));
    }

    #[test]
    fn test_rejects_self_and_duplicate_pairs() {
        let mut doc = sample();
        doc["conflict_pairs"] = serde_json::json!([
            ["revenue", "revenue"],
            ["revenue", "pipeline"],
            ["pipeline", "revenue"]
        ]);
        let report: ManifestDocument = serde_json::from_value(doc).unwrap();
        let report = report.validate();
        assert_eq!(report.errors.len(), 2);
    }

    #[test]
    fn test_schema_violation_is_parse_error() {
        let mut doc = sample();
        doc["assertions"][0].as_object_mut().unwrap().remove("owner_role");
        let err = Manifest::from_json(&doc.to_string(), ".").unwrap_err();
        assert!(matches!(err, ManifestError::Parse(_)));
    }

    #[test]
    fn test_empty_assertions_only_warn() {
        let mut doc = sample();
        doc["assertions"] = serde_json::json!([]);
        doc["conflict_pairs"] = serde_json::json!([]);
        let parsed: ManifestDocument = serde_json::from_value(doc.clone()).unwrap();
        let report = parsed.validate();
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 1);
        assert!(Manifest::from_json(&doc.to_string(), ".").is_ok());
    }

    #[tokio::test]
    async fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        tokio::fs::write(&path, sample().to_string()).await.unwrap();

        let manifest = Manifest::load(&path).await.unwrap();
        assert_eq!(manifest.base_dir, dir.path());
        assert_eq!(manifest.target_path, dir.path().join("model.json"));

        let missing = Manifest::load(dir.path().join("nope.json")).await.unwrap_err();
        assert!(matches!(missing, ManifestError::Io { .. }));
    }

    proptest! {
        #[test]
        fn prop_loader_accepts_iff_ordered(
            a in -1.0e6f64..1.0e6,
            b in -1.0e6f64..1.0e6,
            c in -1.0e6f64..1.0e6,
        ) {
            let mut doc = sample();
            doc["conflict_pairs"] = serde_json::json!([]);
            doc["assertions"][0]["distribution"] = serde_json::json!({"min": a, "mode": b, "max": c});
            let loaded = Manifest::from_json(&doc.to_string(), ".");
            prop_assert_eq!(loaded.is_ok(), a <= b && b <= c);
            if let Ok(manifest) = loaded {
                let d = manifest.assertions[0].distribution;
                prop_assert!(d.min <= d.mode && d.mode <= d.max);
            }
        }
    }
}
