//! Evaluation cycle
//!
//! A cycle reads the source outside the mutation boundary, runs the gates,
//! then enters the boundary to merge in live overrides, record the ledger
//! events and commit. Nothing is committed unless every event was recorded.

use chrono::{DateTime, Utc};
use guardian_gates::{GateEngine, Observation};
use guardian_types::{
    ActiveOverride, Assertion, AssertionId, AssertionStatus, DataBinding, EvaluationSnapshot,
    GovernanceEvent, SystemStatus,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};

use crate::authority::StateAuthority;
use crate::config::RetryPolicy;
use crate::error::{Result, SourceError};
use crate::recorder::{LedgerRecorder, SCHEDULER_ACTOR};
use crate::source::{read_with_retry, DataSourceReader};

/// What a committed cycle produced
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub sequence: u64,
    pub system_status: SystemStatus,
    pub halted: Vec<AssertionId>,
    pub source_error: Option<String>,
    pub duration: Duration,
}

/// Runs one evaluation cycle against the State Authority
pub struct CycleRunner {
    source: Arc<dyn DataSourceReader>,
    gates: GateEngine,
    assertions: Arc<RwLock<Vec<Assertion>>>,
    conflict_pairs: Vec<(AssertionId, AssertionId)>,
    retry: RetryPolicy,
    read_timeout: Duration,
    authority: Arc<StateAuthority>,
    recorder: Arc<LedgerRecorder>,
}

enum Reading {
    Evaluated(guardian_gates::CycleVerdicts),
    Failed(SourceError),
}

/// Override status changes a commit must record
#[derive(Default)]
struct OverrideChanges {
    released: Vec<(AssertionId, ActiveOverride)>,
    expired: Vec<(AssertionId, ActiveOverride)>,
}

impl CycleRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: Arc<dyn DataSourceReader>,
        gates: GateEngine,
        assertions: Arc<RwLock<Vec<Assertion>>>,
        conflict_pairs: Vec<(AssertionId, AssertionId)>,
        retry: RetryPolicy,
        read_timeout: Duration,
        authority: Arc<StateAuthority>,
        recorder: Arc<LedgerRecorder>,
    ) -> Self {
        Self {
            source,
            gates,
            assertions,
            conflict_pairs,
            retry,
            read_timeout,
            authority,
            recorder,
        }
    }

    /// Run one cycle to commit.
    ///
    /// Source failures still commit (as UNKNOWN unless something is HALT);
    /// only a ledger failure returns `Err`.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<CycleReport> {
        let started = Instant::now();
        let based_on = self.authority.current().sequence;
        let assertions = self.assertions.read().clone();
        let bindings: Vec<(AssertionId, DataBinding)> = assertions
            .iter()
            .map(|a| (a.id.clone(), a.binding.clone()))
            .collect();

        let read = tokio::time::timeout(
            self.read_timeout,
            read_with_retry(self.source.as_ref(), &bindings, &self.retry),
        )
        .await
        .unwrap_or(Err(SourceError::TimedOut(self.read_timeout)));

        let now = Utc::now();
        let reading = match read {
            Ok(readings) => {
                let observations: HashMap<AssertionId, Observation> = bindings
                    .iter()
                    .filter_map(|(id, binding)| {
                        let observation = match readings.get(id)? {
                            Ok(reading) => reading.clone().into_observation(binding),
                            Err(e) => Observation::failed(e.to_string()),
                        };
                        Some((id.clone(), observation))
                    })
                    .collect();
                Reading::Evaluated(self.gates.evaluate_all(
                    &assertions,
                    &observations,
                    &self.conflict_pairs,
                    now,
                ))
            }
            Err(e) => {
                error!(based_on, error = %e, "Source read failed, cycle has no fresh data");
                Reading::Failed(e)
            }
        };

        self.commit(reading, based_on, now, started).await
    }

    async fn commit(
        &self,
        reading: Reading,
        based_on: u64,
        now: DateTime<Utc>,
        started: Instant,
    ) -> Result<CycleReport> {
        let guard = self.authority.begin().await;
        let previous = guard.current();
        let sequence = guard.next_sequence();

        let mut snapshot = match reading {
            Reading::Evaluated(verdicts) => EvaluationSnapshot {
                sequence,
                based_on_sequence: based_on,
                evaluated_at: now,
                system_status: SystemStatus::NotEvaluated,
                assertions: verdicts.assertions,
                conflicts: verdicts.conflicts,
                source_error: None,
            },
            Reading::Failed(e) => {
                // Keep the last known verdicts; they are all we have.
                let mut kept = (*previous).clone();
                kept.sequence = sequence;
                kept.based_on_sequence = based_on;
                kept.evaluated_at = now;
                kept.source_error = Some(e.to_string());
                kept
            }
        };

        let changes = carry_overrides(&previous, &mut snapshot.assertions, based_on, now);
        snapshot.recompute_system_status();

        let duration = started.elapsed();
        self.recorder
            .cycle(&snapshot, duration.as_millis() as u64)
            .await?;
        for eval in snapshot.assertions.values() {
            let before = previous.get(&eval.assertion_id).map(|e| e.status);
            if eval.status == AssertionStatus::Halt && before != Some(AssertionStatus::Halt) {
                warn!(
                    assertion_id = %eval.assertion_id,
                    sequence,
                    "Assertion entered HALT"
                );
                self.recorder.halt(eval, sequence, SCHEDULER_ACTOR).await?;
            } else if eval.status == AssertionStatus::Pass && before == Some(AssertionStatus::Halt) {
                info!(assertion_id = %eval.assertion_id, sequence, "Assertion resolved");
                self.recorder.resolved(eval, sequence).await?;
            }
            if eval.evaluation_error.is_some() && snapshot.source_error.is_none() {
                self.recorder.evaluation_error(eval, sequence).await?;
            }
        }
        for (id, active) in &changes.released {
            self.recorder
                .override_released(id, active, sequence, "gates pass", SCHEDULER_ACTOR)
                .await?;
        }
        for (id, active) in &changes.expired {
            self.recorder
                .override_released(id, active, sequence, "override expired", SCHEDULER_ACTOR)
                .await?;
        }

        let committed = guard.commit(snapshot)?;
        drop(guard);

        self.authority.publish(GovernanceEvent::SnapshotCommitted {
            sequence: committed.sequence,
            system_status: committed.system_status,
            halted: committed.halted_ids(),
            at: committed.evaluated_at,
        });
        for event in expiry_events(&changes.expired, committed.sequence) {
            self.authority.publish(event);
        }

        info!(
            sequence = committed.sequence,
            based_on,
            system_status = %committed.system_status,
            halted = committed.count_by_status(AssertionStatus::Halt),
            overridden = committed.count_by_status(AssertionStatus::Overridden),
            duration_ms = duration.as_millis() as u64,
            "Cycle committed"
        );

        Ok(CycleReport {
            sequence: committed.sequence,
            system_status: committed.system_status,
            halted: committed.halted_ids(),
            source_error: committed.source_error.clone(),
            duration,
        })
    }
}

/// Reattach overrides that are still in force.
///
/// An override stays while its assertion's gates still HALT. Once they pass,
/// it is released, unless this cycle's read predates the override, in which
/// case the pass may be stale and the override stays attached.
fn carry_overrides(
    previous: &EvaluationSnapshot,
    evaluations: &mut BTreeMap<AssertionId, guardian_types::AssertionEvaluation>,
    based_on: u64,
    now: DateTime<Utc>,
) -> OverrideChanges {
    let mut changes = OverrideChanges::default();

    for (id, eval) in evaluations.iter_mut() {
        let Some(active) = previous.get(id).and_then(|e| e.active_override.clone()) else {
            eval.apply_override(None);
            continue;
        };

        if active.is_expired_at(now) {
            changes.expired.push((id.clone(), active));
            eval.apply_override(None);
        } else if eval.underlying_status == AssertionStatus::Halt || active.applied_at_sequence > based_on {
            eval.apply_override(Some(active));
        } else {
            changes.released.push((id.clone(), active));
            eval.apply_override(None);
        }
    }

    changes
}

/// Group expired overrides into one event per override.
pub(crate) fn expiry_events(expired: &[(AssertionId, ActiveOverride)], sequence: u64) -> Vec<GovernanceEvent> {
    let mut grouped: BTreeMap<String, (guardian_types::OverrideId, Vec<AssertionId>)> = BTreeMap::new();
    for (id, active) in expired {
        grouped
            .entry(active.override_id.to_string())
            .or_insert_with(|| (active.override_id, Vec::new()))
            .1
            .push(id.clone());
    }
    grouped
        .into_values()
        .map(|(override_id, assertion_ids)| GovernanceEvent::OverrideExpired {
            override_id,
            assertion_ids,
            sequence,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use chrono::Duration as ChronoDuration;
    use guardian_ledger::{EventKind, LedgerSink, MemoryLedger};
    use guardian_types::{GateKind, GateStatus, OverrideId, PertDistribution};

    struct Harness {
        source: Arc<MemorySource>,
        ledger: Arc<MemoryLedger>,
        authority: Arc<StateAuthority>,
        runner: CycleRunner,
    }

    fn revenue() -> Assertion {
        Assertion {
            id: AssertionId::new("revenue"),
            logical_name: "Revenue forecast".into(),
            owner_role: "VP Sales".into(),
            binding: DataBinding::cell("B5"),
            distribution: PertDistribution::new(1_000_000.0, 1_200_000.0, 1_500_000.0).unwrap(),
            baseline_value: Some(1_200_000.0),
            baseline_fingerprint: None,
            sla_days: 30,
            last_updated: Utc::now(),
        }
    }

    fn harness() -> Harness {
        let source = Arc::new(MemorySource::new());
        let ledger = Arc::new(MemoryLedger::new());
        let authority = Arc::new(StateAuthority::new(16));
        let recorder = Arc::new(LedgerRecorder::new(ledger.clone(), "test"));
        let runner = CycleRunner::new(
            source.clone(),
            GateEngine::default(),
            Arc::new(RwLock::new(vec![revenue()])),
            Vec::new(),
            RetryPolicy {
                max_attempts: 1,
                ..RetryPolicy::default()
            },
            Duration::from_secs(5),
            authority.clone(),
            recorder,
        );
        Harness {
            source,
            ledger,
            authority,
            runner,
        }
    }

    async fn attach_override(authority: &StateAuthority, expires_in: ChronoDuration) -> ActiveOverride {
        let guard = authority.begin().await;
        let mut snapshot = (*guard.current()).clone();
        snapshot.sequence = guard.next_sequence();
        let active = ActiveOverride {
            override_id: OverrideId::generate(),
            signer: "cfo".into(),
            expires_at: Utc::now() + expires_in,
            applied_at_sequence: snapshot.sequence,
        };
        for eval in snapshot.assertions.values_mut() {
            eval.apply_override(Some(active.clone()));
        }
        guard.commit(snapshot).unwrap();
        active
    }

    #[tokio::test]
    async fn test_drift_halt_then_resolve() {
        let h = harness();
        let binding = DataBinding::cell("B5");

        h.source.set_value(&binding, 1_650_000.0);
        let report = h.runner.run().await.unwrap();
        assert_eq!(report.sequence, 1);
        assert_eq!(report.system_status, SystemStatus::Halt);
        let snapshot = h.authority.current();
        let eval = snapshot.get(&AssertionId::new("revenue")).unwrap();
        assert_eq!(eval.verdict(GateKind::Stability).unwrap().status, GateStatus::Halt);

        h.source.set_value(&binding, 1_210_000.0);
        let report = h.runner.run().await.unwrap();
        assert_eq!(report.system_status, SystemStatus::Pass);

        let kinds: Vec<EventKind> = h.ledger.events().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![EventKind::Cycle, EventKind::Halt, EventKind::Cycle, EventKind::Resolve]
        );
    }

    #[tokio::test]
    async fn test_source_failure_is_unknown_and_keeps_verdicts() {
        let h = harness();
        h.source.set_value(&DataBinding::cell("B5"), 1_210_000.0);
        h.runner.run().await.unwrap();

        h.source.set_failure(Some(SourceError::Unavailable("deleted".into())));
        let report = h.runner.run().await.unwrap();
        assert_eq!(report.system_status, SystemStatus::Unknown);
        assert!(report.source_error.is_some());
        assert_eq!(h.authority.current().assertions.len(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_binding_skips_gates() {
        let h = harness();
        let report = h.runner.run().await.unwrap();
        assert_eq!(report.system_status, SystemStatus::Pass);

        let snapshot = h.authority.current();
        let eval = snapshot.get(&AssertionId::new("revenue")).unwrap();
        assert_eq!(eval.verdict(GateKind::Stability).unwrap().status, GateStatus::Skip);
        assert!(eval.evaluation_error.is_some());
        // CYCLE summary plus the per-assertion evaluation error.
        assert_eq!(h.ledger.event_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_override_survives_cycle_while_gates_halt() {
        let h = harness();
        h.source.set_value(&DataBinding::cell("B5"), 1_650_000.0);
        h.runner.run().await.unwrap();
        attach_override(&h.authority, ChronoDuration::hours(1)).await;

        let report = h.runner.run().await.unwrap();
        assert_eq!(report.system_status, SystemStatus::Pass);
        let snapshot = h.authority.current();
        assert_eq!(
            snapshot.get(&AssertionId::new("revenue")).unwrap().status,
            AssertionStatus::Overridden
        );
    }

    /// Source whose next `read_all` waits until released.
    struct HeldSource {
        inner: Arc<MemorySource>,
        hold: std::sync::atomic::AtomicBool,
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait::async_trait]
    impl DataSourceReader for HeldSource {
        async fn read(&self, binding: &DataBinding) -> std::result::Result<crate::source::SourceReading, SourceError> {
            self.inner.read(binding).await
        }

        async fn read_all(
            &self,
            bindings: &[(AssertionId, DataBinding)],
        ) -> std::result::Result<crate::source::BindingReadings, SourceError> {
            if self.hold.swap(false, std::sync::atomic::Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.inner.read_all(bindings).await
        }
    }

    #[tokio::test]
    async fn test_override_committed_during_read_survives_stale_pass() {
        let inner = Arc::new(MemorySource::new());
        let binding = DataBinding::cell("B5");
        inner.set_value(&binding, 1_650_000.0);
        let source = Arc::new(HeldSource {
            inner: inner.clone(),
            hold: std::sync::atomic::AtomicBool::new(false),
            entered: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        });

        let ledger = Arc::new(MemoryLedger::new());
        let authority = Arc::new(StateAuthority::new(16));
        let recorder = Arc::new(LedgerRecorder::new(ledger.clone(), "test"));
        let runner = Arc::new(CycleRunner::new(
            source.clone(),
            GateEngine::default(),
            Arc::new(RwLock::new(vec![revenue()])),
            Vec::new(),
            RetryPolicy {
                max_attempts: 1,
                ..RetryPolicy::default()
            },
            Duration::from_secs(5),
            authority.clone(),
            recorder.clone(),
        ));
        let protocol = crate::overrides::OverrideProtocol::new(
            authority.clone(),
            recorder,
            ChronoDuration::hours(1),
            ChronoDuration::minutes(5),
        );

        let first = runner.run().await.unwrap();
        assert_eq!(first.system_status, SystemStatus::Halt);

        source.hold.store(true, std::sync::atomic::Ordering::SeqCst);
        let cycle = tokio::spawn({
            let runner = runner.clone();
            async move { runner.run().await }
        });
        source.entered.notified().await;

        // The cycle has captured its base sequence and is blocked in the read.
        let record = protocol
            .submit(guardian_types::OverrideRequest::signed(
                vec![AssertionId::new("revenue")],
                "approved for board deck",
                "cfo@example.com",
                Utc::now().to_rfc3339(),
            ))
            .await
            .unwrap();
        assert_eq!(record.applied_at_sequence, first.sequence + 1);

        inner.set_value(&binding, 1_200_000.0);
        source.release.notify_one();
        let report = cycle.await.unwrap().unwrap();

        assert!(record.applied_at_sequence < report.sequence);
        let snapshot = authority.current();
        assert_eq!(snapshot.sequence, report.sequence);
        assert_eq!(snapshot.based_on_sequence, first.sequence);
        let eval = snapshot.get(&AssertionId::new("revenue")).unwrap();
        assert_eq!(eval.underlying_status, AssertionStatus::Pass);
        assert_eq!(eval.active_override.as_ref().unwrap().override_id, record.id);
        assert_eq!(report.system_status, SystemStatus::Pass);

        // A read taken after the override may release it.
        runner.run().await.unwrap();
        let snapshot = authority.current();
        assert!(snapshot.get(&AssertionId::new("revenue")).unwrap().active_override.is_none());
        assert_eq!(ledger.events().last().unwrap().kind, EventKind::Resolve);
    }

    #[tokio::test]
    async fn test_override_released_once_gates_pass() {
        let h = harness();
        let binding = DataBinding::cell("B5");
        h.source.set_value(&binding, 1_650_000.0);
        h.runner.run().await.unwrap();
        attach_override(&h.authority, ChronoDuration::hours(1)).await;

        h.source.set_value(&binding, 1_200_000.0);
        h.runner.run().await.unwrap();
        let snapshot = h.authority.current();
        let eval = snapshot.get(&AssertionId::new("revenue")).unwrap();
        assert_eq!(eval.status, AssertionStatus::Pass);
        assert!(eval.active_override.is_none());
        assert_eq!(h.ledger.events().last().unwrap().kind, EventKind::Resolve);
    }

    #[tokio::test]
    async fn test_expired_override_reverts_to_halt() {
        let h = harness();
        h.source.set_value(&DataBinding::cell("B5"), 1_650_000.0);
        h.runner.run().await.unwrap();
        attach_override(&h.authority, ChronoDuration::milliseconds(-1)).await;

        let mut events = h.authority.subscribe();
        let report = h.runner.run().await.unwrap();
        assert_eq!(report.system_status, SystemStatus::Halt);

        assert!(matches!(
            events.recv().await.unwrap(),
            GovernanceEvent::SnapshotCommitted { .. }
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            GovernanceEvent::OverrideExpired { .. }
        ));
    }

    #[tokio::test]
    async fn test_ledger_failure_commits_nothing() {
        let h = harness();
        h.source.set_value(&DataBinding::cell("B5"), 1_200_000.0);
        h.runner.run().await.unwrap();

        h.ledger.set_failing(true);
        let err = h.runner.run().await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(h.authority.current().sequence, 1);
    }
}
