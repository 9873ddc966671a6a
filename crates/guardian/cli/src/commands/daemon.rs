//! Daemon status command

use crate::client::GuardianClient;
use crate::error::CliResult;
use crate::output::{colorize_status, print_error, print_output, print_warning, OutputFormat};
use colored::*;
use guardian_types::AssertionView;
use tabled::Tabled;

#[derive(Tabled)]
struct AssertionRow {
    #[tabled(rename = "Assertion")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Owner")]
    owner: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Drift")]
    drift: String,
    #[tabled(rename = "Failing gates")]
    failing: String,
}

impl From<&AssertionView> for AssertionRow {
    fn from(view: &AssertionView) -> Self {
        let failing: Vec<String> = view
            .verdicts
            .iter()
            .filter(|v| v.status.is_halt())
            .map(|v| v.gate.to_string())
            .collect();
        Self {
            id: view.id.to_string(),
            name: view.logical_name.clone(),
            owner: view.owner_role.clone(),
            status: colorize_status(&view.status.to_string()).to_string(),
            drift: view.drift.map_or_else(|| "-".into(), |d| format!("{:.3}", d)),
            failing: if failing.is_empty() { "-".into() } else { failing.join(", ") },
        }
    }
}

/// Show the daemon's current governance status
pub async fn status(client: &GuardianClient, format: OutputFormat) -> CliResult<bool> {
    let health = match client.health().await {
        Ok(health) => health,
        Err(e) => {
            print_error(&format!("Cannot reach Guardian daemon: {}", e));
            return Ok(false);
        }
    };
    let status = client.status().await?;

    if matches!(format, OutputFormat::Table) {
        println!(
            "{} {}  {} {}  {} {}",
            "Project:".bold(),
            status.project_name.as_deref().unwrap_or(&status.project_id),
            "Status:".bold(),
            colorize_status(&status.system_status.to_string()),
            "Sequence:".bold(),
            status.sequence
        );
        println!(
            "{}",
            format!(
                "daemon {} up {}, evaluated {}",
                health.version, health.uptime, status.evaluated_at
            )
            .dimmed()
        );
        if let Some(reason) = &health.stop_reason {
            print_warning(&format!("Engine stopped: {}", reason));
        }
        if let Some(error) = &status.source_error {
            print_warning(&format!("Last source read failed: {}", error));
        }
        println!();
    }

    let rows: Vec<AssertionRow> = status.assertions.iter().map(AssertionRow::from).collect();
    print_output(&status, rows, format)?;
    Ok(status.engine_running)
}
