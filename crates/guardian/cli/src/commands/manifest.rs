//! Manifest validation

use crate::error::{CliError, CliResult};
use crate::output::{print_error, print_success, print_warning};
use colored::*;
use guardian_engine::{JsonWorkbookSource, Manifest, ManifestError, ValidationReport};
use std::path::Path;

/// Validate a manifest and, unless `offline`, every binding against the workbook.
///
/// Returns `false` when any violation was found.
pub async fn validate(path: &Path, offline: bool) -> CliResult<bool> {
    let manifest = match Manifest::load(path).await {
        Ok(manifest) => manifest,
        Err(ManifestError::Invalid { violations }) => {
            print_error(&format!(
                "{} has {} violation(s)",
                path.display(),
                violations.len()
            ));
            for violation in &violations {
                println!("  - {}", violation);
            }
            return Ok(false);
        }
        Err(e) => return Err(CliError::Manifest(e)),
    };

    println!(
        "{} {} ({} assertions, {} conflict pairs)",
        "Project:".bold(),
        manifest.project_id,
        manifest.assertions.len(),
        manifest.conflict_pairs.len()
    );

    if offline {
        print_success("Manifest is valid");
        return Ok(true);
    }

    let source = JsonWorkbookSource::new(&manifest.target_path);
    let report = manifest.preflight(&source).await;
    Ok(print_report(&manifest, &report))
}

fn print_report(manifest: &Manifest, report: &ValidationReport) -> bool {
    for warning in &report.warnings {
        print_warning(warning);
    }
    if report.is_valid() {
        print_success(&format!(
            "Manifest and bindings in {} are valid",
            manifest.target_path.display()
        ));
        return true;
    }

    print_error(&format!("{} binding error(s)", report.errors.len()));
    for error in &report.errors {
        println!("  - {}", error);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_manifest(dir: &Path, distribution_min: f64) -> std::path::PathBuf {
        let manifest = serde_json::json!({
            "project_id": "fy26-plan",
            "target_file": "model.json",
            "assertions": [{
                "id": "revenue",
                "logical_name": "Revenue forecast",
                "owner_role": "VP Sales",
                "binding": {"cell": "B5"},
                "last_updated": "2026-01-20",
                "sla_days": 30,
                "distribution": {"min": distribution_min, "mode": 1200.0, "max": 1500.0}
            }]
        });
        let path = dir.join("manifest.json");
        std::fs::write(&path, manifest.to_string()).unwrap();
        path
    }

    #[tokio::test]
    async fn test_validate_offline() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(dir.path(), 1000.0);
        assert!(validate(&path, true).await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_distribution_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(dir.path(), 1300.0);
        assert!(!validate(&path, true).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_workbook_fails_preflight() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(dir.path(), 1000.0);
        assert!(!validate(&path, false).await.unwrap());
    }

    #[tokio::test]
    async fn test_bindings_resolve_against_workbook() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(dir.path(), 1000.0);
        let workbook = serde_json::json!({"sheets": {"Model": {"B5": {"value": 1250.0}}}});
        std::fs::write(dir.path().join("model.json"), workbook.to_string()).unwrap();
        assert!(validate(&path, false).await.unwrap());
    }
}
