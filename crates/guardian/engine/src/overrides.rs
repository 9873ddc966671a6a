//! Override protocol
//!
//! An accepted override is a state transition, not a log line: it commits a
//! new snapshot in which the targeted assertions are OVERRIDDEN, through the
//! same mutation boundary cycles use. Every attempt, accepted or not, lands
//! in the ledger.

use chrono::{DateTime, Duration, Utc};
use guardian_types::{
    parse_utc_timestamp, AssertionId, AssertionStatus, EvaluationSnapshot, GovernanceEvent,
    OverrideId, OverrideRecord, OverrideRequest,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::authority::StateAuthority;
use crate::error::{EngineError, OverrideRejection, Result};
use crate::recorder::LedgerRecorder;

/// Longest accepted signer identity
pub const MAX_SIGNER_LEN: usize = 256;

/// Validates and applies override requests
pub struct OverrideProtocol {
    authority: Arc<StateAuthority>,
    recorder: Arc<LedgerRecorder>,
    ttl: Duration,
    future_skew: Duration,
}

impl OverrideProtocol {
    pub fn new(
        authority: Arc<StateAuthority>,
        recorder: Arc<LedgerRecorder>,
        ttl: Duration,
        future_skew: Duration,
    ) -> Self {
        Self {
            authority,
            recorder,
            ttl,
            future_skew,
        }
    }

    /// Submit an override.
    ///
    /// Returns the accepted record, [`EngineError::Rejected`] with the
    /// specific reason, or [`EngineError::LedgerWriteFailure`].
    #[instrument(skip(self, request), fields(signer = %request.signer))]
    pub async fn submit(&self, request: OverrideRequest) -> Result<OverrideRecord> {
        let now = Utc::now();
        let submitted = match validate_request(&request, now, self.ttl, self.future_skew) {
            Ok(ts) => ts,
            Err(rejection) => return self.reject(&request, rejection).await,
        };
        let ids = dedup(&request.assertion_ids);

        let observed = self.authority.current();
        if let Err(rejection) = validate_state(&observed, &ids) {
            return self.reject(&request, rejection).await;
        }

        let guard = self.authority.begin().await;
        let current = guard.current();
        if current.sequence != observed.sequence {
            // A commit landed between the check and the lock; check once more.
            if let Err(rejection) = validate_state(&current, &ids) {
                drop(guard);
                let conflict = OverrideRejection::StateConflict(rejection.to_string());
                return self.reject(&request, conflict).await;
            }
        }

        let sequence = guard.next_sequence();
        let record = OverrideRecord {
            id: OverrideId::generate(),
            assertion_ids: ids.clone(),
            justification: request.justification.clone(),
            signer: request.signer.clone(),
            timestamp: request.timestamp.clone(),
            content_hash: request.content_hash.trim().to_ascii_lowercase(),
            submitted_at: now,
            expires_at: submitted + self.ttl,
            applied_at_sequence: sequence,
        };

        let mut snapshot = (*current).clone();
        snapshot.sequence = sequence;
        snapshot.based_on_sequence = current.sequence;
        snapshot.evaluated_at = now;
        for id in &ids {
            if let Some(eval) = snapshot.assertions.get_mut(id) {
                eval.apply_override(Some(record.as_active()));
            }
        }
        snapshot.recompute_system_status();

        for id in &ids {
            self.recorder.override_accepted(&record, id).await?;
        }
        let committed = guard.commit(snapshot)?;
        drop(guard);

        self.authority.publish(GovernanceEvent::OverrideApplied {
            override_id: record.id,
            assertion_ids: record.assertion_ids.clone(),
            sequence: committed.sequence,
            expires_at: record.expires_at,
        });
        self.authority.publish(GovernanceEvent::SnapshotCommitted {
            sequence: committed.sequence,
            system_status: committed.system_status,
            halted: committed.halted_ids(),
            at: committed.evaluated_at,
        });

        info!(
            override_id = %record.id,
            assertions = ?record.assertion_ids,
            sequence = committed.sequence,
            expires_at = %record.expires_at,
            system_status = %committed.system_status,
            "Override applied"
        );
        Ok(record)
    }

    async fn reject(&self, request: &OverrideRequest, rejection: OverrideRejection) -> Result<OverrideRecord> {
        warn!(code = rejection.code(), reason = %rejection, "Override rejected");
        let signer = if validate_signer(&request.signer).is_ok() {
            request.signer.as_str()
        } else {
            "unidentified"
        };
        self.recorder
            .override_rejected(request, &rejection, signer)
            .await?;
        Err(EngineError::Rejected(rejection))
    }
}

/// Checks that need no state. Returns the parsed submission timestamp.
pub fn validate_request(
    request: &OverrideRequest,
    now: DateTime<Utc>,
    ttl: Duration,
    future_skew: Duration,
) -> std::result::Result<DateTime<Utc>, OverrideRejection> {
    if request.assertion_ids.is_empty() {
        return Err(OverrideRejection::NoAssertions);
    }
    validate_signer(&request.signer)?;
    if request.justification.trim().is_empty() {
        return Err(OverrideRejection::EmptyJustification);
    }

    let submitted = parse_utc_timestamp(&request.timestamp)
        .ok_or_else(|| OverrideRejection::MalformedTimestamp(request.timestamp.clone()))?;
    if submitted > now + future_skew {
        return Err(OverrideRejection::FutureTimestamp(submitted));
    }
    let expires_at = submitted + ttl;
    if expires_at <= now {
        return Err(OverrideRejection::Expired(expires_at));
    }

    if !request.hash_matches() {
        return Err(OverrideRejection::ContentHashMismatch);
    }
    Ok(submitted)
}

fn validate_signer(signer: &str) -> std::result::Result<(), OverrideRejection> {
    let reason = if signer.is_empty() {
        "signer is empty"
    } else if signer.trim() != signer {
        "signer has leading or trailing whitespace"
    } else if signer.len() > MAX_SIGNER_LEN {
        "signer is too long"
    } else if signer.chars().any(char::is_control) {
        "signer contains control characters"
    } else if signer.contains('|') {
        "signer contains the hash field separator '|'"
    } else {
        return Ok(());
    };
    Err(OverrideRejection::MalformedSigner(reason.into()))
}

/// Every targeted assertion must exist and be HALT right now.
pub fn validate_state(
    snapshot: &EvaluationSnapshot,
    ids: &[AssertionId],
) -> std::result::Result<(), OverrideRejection> {
    if !snapshot.is_evaluated() {
        return Err(OverrideRejection::NotEvaluated);
    }
    for id in ids {
        let eval = snapshot
            .get(id)
            .ok_or_else(|| OverrideRejection::UnknownAssertion(id.clone()))?;
        if eval.status != AssertionStatus::Halt {
            return Err(OverrideRejection::NotInHalt {
                id: id.clone(),
                status: eval.status,
            });
        }
    }
    Ok(())
}

fn dedup(ids: &[AssertionId]) -> Vec<AssertionId> {
    let mut unique: Vec<AssertionId> = Vec::with_capacity(ids.len());
    for id in ids {
        if !unique.contains(id) {
            unique.push(id.clone());
        }
    }
    unique
}
