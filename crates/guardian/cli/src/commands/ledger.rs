//! Offline ledger commands

use crate::error::{CliError, CliResult};
use crate::output::{print_error, print_output, print_single, print_success, OutputFormat};
use colored::*;
use guardian_ledger::{
    read_events, verify_ledger, EventKind, LedgerEvent, LedgerQuery, Outcome, OverrideIntegrity,
    Severity,
};
use guardian_types::{parse_utc_timestamp, AssertionId};
use std::path::Path;
use tabled::Tabled;

/// Verify the hash chain and every accepted override's content hash.
///
/// Returns `false` when anything fails to verify.
pub async fn verify(path: &Path, format: OutputFormat) -> CliResult<bool> {
    let report = verify_ledger(path).await?;

    if !matches!(format, OutputFormat::Table) {
        print_single(&report, format)?;
        return Ok(report.is_valid());
    }

    println!("{} {}", "Ledger:".bold(), path.display());
    if report.chain.valid {
        print_success(&format!("Hash chain intact ({} events)", report.chain.total_events));
    } else {
        print_error(&format!(
            "Hash chain broken at event {}: {}",
            report.chain.first_invalid_index.unwrap_or_default(),
            report.chain.error_message.as_deref().unwrap_or("unknown")
        ));
    }

    for check in &report.overrides {
        let status = match check.status {
            OverrideIntegrity::Valid => "VALID".green(),
            OverrideIntegrity::Tampered => "TAMPERED".red().bold(),
            OverrideIntegrity::Unreadable => "UNREADABLE".yellow(),
        };
        println!(
            "  override {} on {} by {}: {}",
            check.override_id.as_deref().unwrap_or("?"),
            check.assertion_id.as_ref().map(AssertionId::as_str).unwrap_or("?"),
            check.signer.as_deref().unwrap_or("?"),
            status
        );
    }

    if report.is_valid() {
        print_success(&format!("{} override(s) verified", report.overrides.len()));
    } else if report.tampered_overrides() > 0 {
        print_error(&format!("{} override(s) failed verification", report.tampered_overrides()));
    }
    Ok(report.is_valid())
}

/// Audit query filters
#[derive(Debug, Default)]
pub struct AuditFilter {
    pub kind: Option<String>,
    pub severity: Option<String>,
    pub assertion: Option<String>,
    pub since: Option<String>,
    pub limit: usize,
}

impl AuditFilter {
    fn into_query(self) -> CliResult<LedgerQuery> {
        let mut builder = LedgerQuery::builder().limit(self.limit);
        if let Some(kind) = &self.kind {
            let kind: EventKind = kind
                .parse()
                .map_err(|_| CliError::InvalidInput(format!("unknown event kind: {}", kind)))?;
            builder = builder.kind(kind);
        }
        if let Some(severity) = &self.severity {
            let severity: Severity = severity
                .parse()
                .map_err(|_| CliError::InvalidInput(format!("unknown severity: {}", severity)))?;
            builder = builder.min_severity(severity);
        }
        if let Some(id) = self.assertion {
            builder = builder.assertion(AssertionId::new(id));
        }
        if let Some(since) = &self.since {
            let from = parse_utc_timestamp(since)
                .ok_or_else(|| CliError::InvalidInput(format!("invalid timestamp: {}", since)))?;
            builder = builder.from(from);
        }
        Ok(builder.build())
    }
}

#[derive(Tabled)]
struct AuditRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Assertion")]
    assertion: String,
    #[tabled(rename = "Actor")]
    actor: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
}

fn outcome_label(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Recorded => "recorded".into(),
        Outcome::Accepted => "accepted".into(),
        Outcome::Rejected { code, .. } => format!("rejected ({})", code),
        Outcome::Failed { reason } => format!("failed: {}", reason),
    }
}

impl From<&LedgerEvent> for AuditRow {
    fn from(event: &LedgerEvent) -> Self {
        Self {
            time: event.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            kind: event.kind.to_string(),
            severity: event.severity.to_string(),
            assertion: event
                .assertion_id
                .as_ref()
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".into()),
            actor: event.actor.id.clone(),
            outcome: outcome_label(&event.outcome),
        }
    }
}

/// Query a ledger file, newest first
pub async fn audit(path: &Path, filter: AuditFilter, format: OutputFormat) -> CliResult<()> {
    let query = filter.into_query()?;
    let events = read_events(path).await?;
    let page = query.apply(&events);

    let rows: Vec<AuditRow> = page.events.iter().map(AuditRow::from).collect();
    print_output(&page, rows, format)?;
    if matches!(format, OutputFormat::Table) && page.has_more() {
        println!(
            "{}",
            format!("showing {} of {} matching events", page.events.len(), page.total).dimmed()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_builds_query() {
        let filter = AuditFilter {
            kind: Some("halt".into()),
            severity: Some("warn".into()),
            since: Some("2026-01-01".into()),
            limit: 5,
            ..AuditFilter::default()
        };
        let query = filter.into_query().unwrap();
        assert_eq!(query.kind, Some(EventKind::Halt));
        assert!(query.from.is_some());
        assert_eq!(query.limit, 5);
    }

    #[test]
    fn test_unknown_kind_is_invalid_input() {
        let filter = AuditFilter {
            kind: Some("purge".into()),
            limit: 5,
            ..AuditFilter::default()
        };
        assert!(matches!(filter.into_query(), Err(CliError::InvalidInput(_))));
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(outcome_label(&Outcome::Accepted), "accepted");
        assert_eq!(
            outcome_label(&Outcome::rejected("not_in_halt", "x")),
            "rejected (not_in_halt)"
        );
    }
}
