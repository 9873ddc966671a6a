//! Offline ledger verification.
//!
//! Checks the hash chain and independently recomputes the content hash of
//! every accepted override from its plaintext fields.

use guardian_types::{compute_content_hash, AssertionId};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use crate::error::Result;
use crate::event::{EventKind, LedgerEvent, Outcome};
use crate::integrity::{ChainVerification, ChainVerifier};
use crate::sink::read_events;

/// Details key under which OVERRIDE events embed the override record.
pub const OVERRIDE_DETAIL_KEY: &str = "override";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverrideIntegrity {
    Valid,
    Tampered,
    /// The event does not carry a readable override record.
    Unreadable,
}

/// Verification of one accepted OVERRIDE event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideCheck {
    pub event_id: Uuid,
    pub override_id: Option<String>,
    pub assertion_id: Option<AssertionId>,
    pub signer: Option<String>,
    pub status: OverrideIntegrity,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerVerification {
    pub chain: ChainVerification,
    pub overrides: Vec<OverrideCheck>,
}

impl LedgerVerification {
    pub fn is_valid(&self) -> bool {
        self.chain.valid && self.overrides.iter().all(|o| o.status == OverrideIntegrity::Valid)
    }

    pub fn tampered_overrides(&self) -> usize {
        self.overrides
            .iter()
            .filter(|o| o.status != OverrideIntegrity::Valid)
            .count()
    }
}

/// Recompute the content hash embedded in one OVERRIDE event.
pub fn check_override_event(event: &LedgerEvent) -> OverrideCheck {
    let record = event.detail(OVERRIDE_DETAIL_KEY);
    let field = |name: &str| {
        record
            .and_then(|r| r.get(name))
            .and_then(|v| v.as_str())
            .map(str::to_owned)
    };

    let status = match (
        field("justification"),
        field("signer"),
        field("timestamp"),
        field("content_hash"),
    ) {
        (Some(justification), Some(signer), Some(timestamp), Some(stored)) => {
            if compute_content_hash(&justification, &signer, &timestamp) == stored {
                OverrideIntegrity::Valid
            } else {
                OverrideIntegrity::Tampered
            }
        }
        _ => OverrideIntegrity::Unreadable,
    };

    OverrideCheck {
        event_id: event.id,
        override_id: field("id"),
        assertion_id: event.assertion_id.clone(),
        signer: field("signer"),
        status,
    }
}

/// Verify a sequence of events in append order.
pub fn verify_events(events: &[LedgerEvent]) -> Result<LedgerVerification> {
    let chain = ChainVerifier::verify_chain(events)?;
    let overrides = events
        .iter()
        .filter(|e| e.kind == EventKind::Override && e.outcome == Outcome::Accepted)
        .map(check_override_event)
        .collect();

    Ok(LedgerVerification { chain, overrides })
}

/// Verify a ledger file.
pub async fn verify_ledger(path: &Path) -> Result<LedgerVerification> {
    let events = read_events(path).await?;
    verify_events(&events)
}
