//! Override commands

use crate::client::GuardianClient;
use crate::error::{CliError, CliResult};
use crate::output::{print_error, print_info, print_single, print_success, OutputFormat};
use chrono::{SecondsFormat, Utc};
use colored::*;
use guardian_types::{compute_content_hash, AssertionId, OverrideRequest};

/// Timestamp in the form the daemon hashes verbatim
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Print the content hash for a justification/signer/timestamp triple
pub fn hash(justification: &str, signer: &str, timestamp: Option<String>) {
    let timestamp = timestamp.unwrap_or_else(now_timestamp);
    println!("{} {}", "timestamp:".dimmed(), timestamp);
    println!("{}", compute_content_hash(justification, signer, &timestamp));
}

/// Sign and submit an override.
///
/// Returns `false` when the daemon rejected it; the reason is printed.
pub async fn submit(
    client: &GuardianClient,
    assertions: Vec<String>,
    justification: String,
    signer: String,
    format: OutputFormat,
) -> CliResult<bool> {
    if assertions.is_empty() {
        return Err(CliError::InvalidInput("at least one --assertion is required".into()));
    }
    let request = OverrideRequest::signed(
        assertions.into_iter().map(AssertionId::new).collect(),
        justification,
        signer,
        now_timestamp(),
    );
    print_info(&format!("content hash {}", request.content_hash));

    match client.submit_override(&request).await {
        Ok(record) => {
            if matches!(format, OutputFormat::Table) {
                print_success(&format!(
                    "Override {} applied at sequence {}",
                    record.id, record.applied_at_sequence
                ));
                println!("  Expires: {}", record.expires_at);
            } else {
                print_single(&record, format)?;
            }
            Ok(true)
        }
        Err(CliError::Api {
            status,
            message,
            reason,
            ..
        }) => {
            print_error(&format!(
                "Override rejected ({}): {}",
                reason.as_deref().unwrap_or("unknown"),
                message
            ));
            println!("  HTTP {}", status);
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Record a human review of an assertion
pub async fn review(client: &GuardianClient, assertion: &str, reviewer: &str) -> CliResult<()> {
    client.review(assertion, reviewer).await?;
    print_success(&format!("Review of {} recorded; re-evaluation scheduled", assertion));
    Ok(())
}
