//! Override expiry sweep
//!
//! Expired overrides revert without waiting for the next source change: the
//! sweep commits a snapshot in which the affected assertions fall back to
//! whatever their gates last said.

use chrono::{DateTime, Utc};
use guardian_types::{ActiveOverride, AssertionId, AssertionStatus, EvaluationSnapshot, GovernanceEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::authority::StateAuthority;
use crate::cycle::expiry_events;
use crate::error::Result;
use crate::recorder::{LedgerRecorder, EXPIRY_ACTOR};

fn expired_overrides(snapshot: &EvaluationSnapshot, now: DateTime<Utc>) -> Vec<(AssertionId, ActiveOverride)> {
    snapshot
        .assertions
        .values()
        .filter_map(|eval| {
            eval.active_override
                .as_ref()
                .filter(|active| active.is_expired_at(now))
                .map(|active| (eval.assertion_id.clone(), active.clone()))
        })
        .collect()
}

/// Revert every override expired at `now`.
///
/// Returns the committed snapshot, or `None` when nothing had expired.
pub async fn sweep_expired(
    authority: &StateAuthority,
    recorder: &LedgerRecorder,
    now: DateTime<Utc>,
) -> Result<Option<Arc<EvaluationSnapshot>>> {
    if expired_overrides(&authority.current(), now).is_empty() {
        return Ok(None);
    }

    let guard = authority.begin().await;
    let current = guard.current();
    let expired = expired_overrides(&current, now);
    if expired.is_empty() {
        return Ok(None);
    }

    let sequence = guard.next_sequence();
    let mut snapshot = (*current).clone();
    snapshot.sequence = sequence;
    snapshot.evaluated_at = now;
    for (id, _) in &expired {
        if let Some(eval) = snapshot.assertions.get_mut(id) {
            eval.apply_override(None);
        }
    }
    snapshot.recompute_system_status();

    for (id, active) in &expired {
        recorder
            .override_released(id, active, sequence, "override expired", EXPIRY_ACTOR)
            .await?;
        if let Some(eval) = snapshot.get(id) {
            if eval.status == AssertionStatus::Halt {
                warn!(assertion_id = %id, override_id = %active.override_id, "Override expired, assertion back in HALT");
                recorder.halt(eval, sequence, EXPIRY_ACTOR).await?;
            }
        }
    }

    let committed = guard.commit(snapshot)?;
    drop(guard);

    for event in expiry_events(&expired, committed.sequence) {
        authority.publish(event);
    }
    authority.publish(GovernanceEvent::SnapshotCommitted {
        sequence: committed.sequence,
        system_status: committed.system_status,
        halted: committed.halted_ids(),
        at: committed.evaluated_at,
    });

    info!(
        sequence = committed.sequence,
        expired = expired.len(),
        system_status = %committed.system_status,
        "Expired overrides reverted"
    );
    Ok(Some(committed))
}

/// Sweep on an interval until shutdown. Returns `Err` only on ledger failure.
pub async fn run_expiry_loop(
    authority: Arc<StateAuthority>,
    recorder: Arc<LedgerRecorder>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                debug!("Expiry sweep stopping");
                return Ok(());
            }
            _ = interval.tick() => {
                sweep_expired(&authority, &recorder, Utc::now()).await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use guardian_ledger::{EventKind, MemoryLedger};
    use guardian_types::{
        AssertionEvaluation, GateKind, GateVerdict, OverrideId, PertDistribution, SystemStatus,
    };

    async fn overridden(expires_in: ChronoDuration) -> (Arc<StateAuthority>, Arc<MemoryLedger>, LedgerRecorder) {
        let authority = Arc::new(StateAuthority::new(16));
        let mut eval = AssertionEvaluation {
            assertion_id: AssertionId::new("a"),
            logical_name: "a".into(),
            owner_role: "Finance".into(),
            distribution: PertDistribution::new(0.0, 5.0, 10.0).unwrap(),
            verdicts: vec![GateVerdict::halt(GateKind::Freshness, "stale")],
            underlying_status: AssertionStatus::Halt,
            status: AssertionStatus::Halt,
            drift: None,
            current_value: None,
            current_fingerprint: None,
            read_at: None,
            evaluation_error: None,
            active_override: None,
        };
        eval.apply_override(Some(ActiveOverride {
            override_id: OverrideId::generate(),
            signer: "cfo".into(),
            expires_at: Utc::now() + expires_in,
            applied_at_sequence: 1,
        }));
        {
            let guard = authority.begin().await;
            let mut snapshot = EvaluationSnapshot::not_evaluated();
            snapshot.sequence = 1;
            snapshot.evaluated_at = Utc::now();
            snapshot.assertions.insert(eval.assertion_id.clone(), eval);
            guard.commit(snapshot).unwrap();
        }
        let ledger = Arc::new(MemoryLedger::new());
        let recorder = LedgerRecorder::new(ledger.clone(), "test");
        (authority, ledger, recorder)
    }

    #[tokio::test]
    async fn test_live_override_is_left_alone() {
        let (authority, ledger, recorder) = overridden(ChronoDuration::hours(1)).await;
        assert!(sweep_expired(&authority, &recorder, Utc::now()).await.unwrap().is_none());
        assert_eq!(authority.current().sequence, 1);
        assert!(ledger.events().is_empty());
    }

    #[tokio::test]
    async fn test_expired_override_reverts_to_halt() {
        let (authority, ledger, recorder) = overridden(ChronoDuration::hours(1)).await;
        assert_eq!(authority.current().system_status, SystemStatus::Pass);

        let later = Utc::now() + ChronoDuration::hours(2);
        let committed = sweep_expired(&authority, &recorder, later).await.unwrap().unwrap();
        assert_eq!(committed.sequence, 2);
        assert_eq!(committed.system_status, SystemStatus::Halt);
        assert!(committed.get(&AssertionId::new("a")).unwrap().active_override.is_none());

        let kinds: Vec<EventKind> = ledger.events().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::Resolve, EventKind::Halt]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_stops_on_shutdown() {
        let (authority, _, recorder) = overridden(ChronoDuration::hours(1)).await;
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_expiry_loop(
            authority,
            Arc::new(recorder),
            Duration::from_secs(1),
            rx,
        ));
        tokio::time::sleep(Duration::from_secs(3)).await;
        tx.send_replace(true);
        handle.await.unwrap().unwrap();
    }
}
