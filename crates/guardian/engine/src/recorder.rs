//! Ledger recording for engine decisions

use guardian_ledger::{
    Actor, EventKind, LedgerEvent, LedgerEventBuilder, LedgerSink, Outcome, Severity,
    OVERRIDE_DETAIL_KEY,
};
use guardian_types::{
    ActiveOverride, AssertionEvaluation, AssertionId, EvaluationSnapshot, GateStatus,
    OverrideRecord, OverrideRequest,
};
use serde_json::json;
use std::sync::Arc;
use tracing::error;

use crate::error::{EngineError, OverrideRejection, Result};

/// Actor id for scheduler-driven events
pub const SCHEDULER_ACTOR: &str = "scheduler";
/// Actor id for expiry-driven events
pub const EXPIRY_ACTOR: &str = "override-expiry";

/// Builds and appends the engine's ledger events
///
/// Every append failure surfaces as [`EngineError::LedgerWriteFailure`].
pub struct LedgerRecorder {
    sink: Arc<dyn LedgerSink>,
    session_id: String,
}

impl LedgerRecorder {
    pub fn new(sink: Arc<dyn LedgerSink>, session_id: impl Into<String>) -> Self {
        Self {
            sink,
            session_id: session_id.into(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn sink(&self) -> &Arc<dyn LedgerSink> {
        &self.sink
    }

    fn event(&self, kind: EventKind, actor: Actor) -> LedgerEventBuilder {
        LedgerEvent::builder()
            .session(self.session_id.clone())
            .kind(kind)
            .actor(actor)
    }

    async fn append(&self, builder: LedgerEventBuilder) -> Result<LedgerEvent> {
        let partial = builder.build().map_err(EngineError::LedgerWriteFailure)?;
        self.sink.append(partial).await.map_err(|e| {
            error!(session_id = %self.session_id, error = %e, "Ledger append failed");
            EngineError::LedgerWriteFailure(e)
        })
    }

    /// One CYCLE event summarising a committed cycle.
    pub async fn cycle(&self, snapshot: &EvaluationSnapshot, duration_ms: u64) -> Result<LedgerEvent> {
        let errors = snapshot
            .assertions
            .values()
            .filter(|e| e.evaluation_error.is_some())
            .count();
        let severity = if snapshot.source_error.is_some() || errors > 0 {
            Severity::Warn
        } else {
            Severity::Info
        };
        let outcome = match &snapshot.source_error {
            Some(reason) => Outcome::failed(reason.clone()),
            None => Outcome::Recorded,
        };

        self.append(
            self.event(EventKind::Cycle, Actor::system(SCHEDULER_ACTOR))
                .severity(severity)
                .outcome(outcome)
                .detail("sequence", snapshot.sequence)
                .detail("based_on_sequence", snapshot.based_on_sequence)
                .detail("system_status", snapshot.system_status)
                .detail("halted", snapshot.halted_ids())
                .detail("assertions", snapshot.assertions.len())
                .detail("evaluation_errors", errors)
                .detail("duration_ms", duration_ms),
        )
        .await
    }

    /// Per-assertion evaluation error, degraded to SKIP.
    pub async fn evaluation_error(&self, eval: &AssertionEvaluation, sequence: u64) -> Result<LedgerEvent> {
        self.append(
            self.event(EventKind::Cycle, Actor::system(SCHEDULER_ACTOR))
                .severity(Severity::Warn)
                .assertion(eval.assertion_id.clone())
                .outcome(Outcome::failed(eval.evaluation_error.clone().unwrap_or_default()))
                .detail("sequence", sequence)
                .detail("skipped_gates", skipped_gates(eval)),
        )
        .await
    }

    /// Assertion entered HALT.
    pub async fn halt(&self, eval: &AssertionEvaluation, sequence: u64, actor: &str) -> Result<LedgerEvent> {
        let failing: Vec<serde_json::Value> = eval
            .verdicts
            .iter()
            .filter(|v| v.status == GateStatus::Halt)
            .map(|v| json!({"gate": v.gate, "reason": v.reason}))
            .collect();

        self.append(
            self.event(EventKind::Halt, Actor::system(actor))
                .severity(Severity::Critical)
                .assertion(eval.assertion_id.clone())
                .detail("sequence", sequence)
                .detail("logical_name", &eval.logical_name)
                .detail("owner_role", &eval.owner_role)
                .detail("failing_gates", failing)
                .detail("drift", eval.drift),
        )
        .await
    }

    /// Assertion left HALT because its gates pass again.
    pub async fn resolved(&self, eval: &AssertionEvaluation, sequence: u64) -> Result<LedgerEvent> {
        self.append(
            self.event(EventKind::Resolve, Actor::system(SCHEDULER_ACTOR))
                .assertion(eval.assertion_id.clone())
                .detail("sequence", sequence)
                .detail("reason", "gates pass")
                .detail("status", eval.status),
        )
        .await
    }

    /// An override stopped applying, by expiry or because gates pass.
    pub async fn override_released(
        &self,
        id: &AssertionId,
        active: &ActiveOverride,
        sequence: u64,
        reason: &str,
        actor: &str,
    ) -> Result<LedgerEvent> {
        self.append(
            self.event(EventKind::Resolve, Actor::system(actor))
                .severity(Severity::Warn)
                .assertion(id.clone())
                .detail("sequence", sequence)
                .detail("override_id", active.override_id)
                .detail("signer", &active.signer)
                .detail("expires_at", active.expires_at)
                .detail("reason", reason),
        )
        .await
    }

    /// Accepted override, one event per covered assertion.
    pub async fn override_accepted(&self, record: &OverrideRecord, id: &AssertionId) -> Result<LedgerEvent> {
        self.append(
            self.event(EventKind::Override, Actor::human(&record.signer))
                .severity(Severity::Warn)
                .assertion(id.clone())
                .outcome(Outcome::Accepted)
                .detail("sequence", record.applied_at_sequence)
                .detail(OVERRIDE_DETAIL_KEY, record),
        )
        .await
    }

    /// Refused override. Records the attempt; nothing else changes.
    pub async fn override_rejected(
        &self,
        request: &OverrideRequest,
        rejection: &OverrideRejection,
        signer: &str,
    ) -> Result<LedgerEvent> {
        let mut builder = self
            .event(EventKind::Override, Actor::human(signer))
            .severity(Severity::Warn)
            .outcome(Outcome::rejected(rejection.code(), rejection.to_string()))
            .detail("assertion_ids", &request.assertion_ids)
            .detail("timestamp", &request.timestamp)
            .detail("content_hash", &request.content_hash);
        if let [only] = request.assertion_ids.as_slice() {
            builder = builder.assertion(only.clone());
        }
        self.append(builder).await
    }

    /// Explicit human review of an assertion's freshness.
    pub async fn review(
        &self,
        id: &AssertionId,
        reviewer: &str,
        previous: chrono::DateTime<chrono::Utc>,
        reviewed_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<LedgerEvent> {
        self.append(
            self.event(EventKind::Resolve, Actor::human(reviewer))
                .assertion(id.clone())
                .detail("reason", "reviewed")
                .detail("previous_last_updated", previous)
                .detail("last_updated", reviewed_at),
        )
        .await
    }
}

fn skipped_gates(eval: &AssertionEvaluation) -> Vec<serde_json::Value> {
    eval.verdicts
        .iter()
        .filter(|v| v.status == GateStatus::Skip)
        .map(|v| json!({"gate": v.gate, "reason": v.reason}))
        .collect()
}
