//! End-to-end engine behaviour: scheduler, State Authority, overrides and
//! the ledger working together.

use chrono::Utc;
use guardian_engine::{
    ChangeNotification, ChannelNotifier, EngineComponents, EngineConfig, EngineError,
    GovernanceEngine, Manifest, MemorySource, OverrideRejection,
};
use guardian_ledger::{verify_ledger, EventKind, LedgerQuery, MemoryLedger, Outcome};
use guardian_types::{
    AssertionId, AssertionStatus, DataBinding, GovernanceEvent, OverrideRequest, SystemStatus,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const BASELINE: f64 = 1_200_000.0;
const DRIFTED: f64 = 1_500_000.0;

fn manifest_json(target_file: &str) -> String {
    serde_json::json!({
        "project_id": "fy26-plan",
        "target_file": target_file,
        "assertions": [{
            "id": "revenue",
            "logical_name": "Revenue forecast",
            "owner_role": "VP Sales",
            "binding": {"cell": "B5"},
            "last_updated": Utc::now().to_rfc3339(),
            "sla_days": 30,
            "baseline_value": BASELINE,
            "distribution": {"min": 1_000_000.0, "mode": BASELINE, "max": DRIFTED}
        }]
    })
    .to_string()
}

fn revenue() -> AssertionId {
    AssertionId::new("revenue")
}

fn write_workbook(path: &Path, value: f64) {
    let workbook = serde_json::json!({
        "sheets": {"Model": {"B5": {"value": value}}}
    });
    std::fs::write(path, workbook.to_string()).unwrap();
}

struct InMemory {
    engine: GovernanceEngine,
    source: Arc<MemorySource>,
    ledger: Arc<MemoryLedger>,
    notify: mpsc::Sender<ChangeNotification>,
}

async fn start_in_memory(value: f64, config: EngineConfig) -> InMemory {
    let manifest = Manifest::from_json(&manifest_json("model.json"), "/projects/fy26").unwrap();
    let source = Arc::new(MemorySource::new());
    source.set_value(&DataBinding::cell("B5"), value);
    let ledger = Arc::new(MemoryLedger::new());
    let (notify, notifier) = ChannelNotifier::new(64);

    let engine = GovernanceEngine::start_with(
        manifest,
        config,
        EngineComponents {
            source: source.clone(),
            notifier: Box::new(notifier),
            ledger: ledger.clone(),
            ledger_path: None,
        },
    )
    .await
    .unwrap();

    InMemory {
        engine,
        source,
        ledger,
        notify,
    }
}

async fn wait_for_sequence(engine: &GovernanceEngine, sequence: u64) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while engine.current().sequence < sequence {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("engine did not reach the expected sequence");
}

fn signed_override(justification: &str) -> OverrideRequest {
    OverrideRequest::signed(
        vec![revenue()],
        justification,
        "cfo@example.com",
        Utc::now().to_rfc3339(),
    )
}

#[tokio::test]
async fn test_restart_reproduces_status_from_source_and_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let manifest_path = dir.path().join("manifest.json");
    std::fs::write(&manifest_path, manifest_json("model.json")).unwrap();
    write_workbook(&dir.path().join("model.json"), DRIFTED);

    let mut statuses = Vec::new();
    let mut sessions = Vec::new();
    for _ in 0..2 {
        let manifest = Manifest::load(&manifest_path).await.unwrap();
        let engine = GovernanceEngine::start(manifest, EngineConfig::default()).await.unwrap();
        wait_for_sequence(&engine, 1).await;

        let snapshot = engine.current();
        statuses.push((snapshot.system_status, snapshot.halted_ids()));
        sessions.push(engine.session_id().to_string());
        engine.shutdown().await;
    }

    assert_eq!(statuses[0], statuses[1]);
    assert_eq!(statuses[0].0, SystemStatus::Halt);
    assert_eq!(statuses[0].1, vec![revenue()]);
    assert_ne!(sessions[0], sessions[1]);

    // Both runs appended to one unbroken chain.
    let report = verify_ledger(&dir.path().join("audit_log.jsonl")).await.unwrap();
    assert!(report.is_valid());
    assert!(report.chain.total_events >= 4);
}

#[tokio::test(start_paused = true)]
async fn test_notification_burst_runs_one_cycle() {
    let h = start_in_memory(BASELINE, EngineConfig::default()).await;
    wait_for_sequence(&h.engine, 1).await;
    assert_eq!(h.source.read_count(), 1);

    let target = h.engine.manifest().target_path.clone();
    for _ in 0..10 {
        h.notify.send(ChangeNotification::file(&target)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(h.source.read_count(), 2);
    assert_eq!(h.engine.current().sequence, 2);
    h.engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_ledger_notifications_do_not_trigger_cycles() {
    let h = start_in_memory(BASELINE, EngineConfig::default()).await;
    wait_for_sequence(&h.engine, 1).await;

    let sibling = h.engine.manifest().base_dir.join("~$model.json");
    h.notify.send(ChangeNotification::file(sibling)).await.unwrap();
    let ledger = h.engine.manifest().default_ledger_path();
    h.notify.send(ChangeNotification::file(ledger)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(h.source.read_count(), 1);
    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_override_is_visible_immediately() {
    let h = start_in_memory(DRIFTED, EngineConfig::default()).await;
    wait_for_sequence(&h.engine, 1).await;
    assert_eq!(h.engine.current().system_status, SystemStatus::Halt);

    let mut events = h.engine.subscribe();
    let record = h
        .engine
        .submit_override(signed_override("approved for board deck"))
        .await
        .unwrap();

    let snapshot = h.engine.current();
    assert_eq!(snapshot.sequence, record.applied_at_sequence);
    assert_eq!(snapshot.system_status, SystemStatus::Pass);
    let eval = snapshot.get(&revenue()).unwrap();
    assert_eq!(eval.status, AssertionStatus::Overridden);
    assert_eq!(eval.underlying_status, AssertionStatus::Halt);

    let first = events.recv().await.unwrap();
    assert!(matches!(first, GovernanceEvent::OverrideApplied { override_id, .. } if override_id == record.id));

    let overrides = h
        .engine
        .query_ledger(&LedgerQuery::builder().kind(EventKind::Override).build())
        .await
        .unwrap();
    assert_eq!(overrides.total, 1);
    assert_eq!(overrides.events[0].outcome, Outcome::Accepted);
    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_override_on_passing_assertion_is_rejected_without_mutation() {
    let h = start_in_memory(BASELINE, EngineConfig::default()).await;
    wait_for_sequence(&h.engine, 1).await;
    let before = h.engine.current();

    let err = h
        .engine
        .submit_override(signed_override("just in case"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Rejected(OverrideRejection::NotInHalt { status: AssertionStatus::Pass, .. })
    ));

    let after = h.engine.current();
    assert_eq!(after.sequence, before.sequence);
    assert_eq!(after.system_status, SystemStatus::Pass);

    let events = h.ledger.events();
    let rejected = events
        .iter()
        .find(|e| e.kind == EventKind::Override)
        .unwrap();
    assert!(matches!(&rejected.outcome, Outcome::Rejected { code, .. } if code == "not_in_halt"));
    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_expired_override_reverts_without_a_source_change() {
    let config = EngineConfig {
        override_ttl_secs: 1,
        expiry_sweep_interval_ms: 50,
        ..EngineConfig::default()
    };
    let h = start_in_memory(DRIFTED, config).await;
    wait_for_sequence(&h.engine, 1).await;

    let record = h
        .engine
        .submit_override(signed_override("bridge to close"))
        .await
        .unwrap();
    assert_eq!(h.engine.current().system_status, SystemStatus::Pass);

    wait_for_sequence(&h.engine, record.applied_at_sequence + 1).await;
    let snapshot = h.engine.current();
    assert_eq!(snapshot.system_status, SystemStatus::Halt);
    assert!(snapshot.get(&revenue()).unwrap().active_override.is_none());
    // The sweep reverted it, not a cycle.
    assert_eq!(h.source.read_count(), 1);

    let resolves = h
        .engine
        .query_ledger(&LedgerQuery::builder().kind(EventKind::Resolve).build())
        .await
        .unwrap();
    assert_eq!(resolves.total, 1);
    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_review_refreshes_and_triggers_cycle() {
    let h = start_in_memory(BASELINE, EngineConfig::default()).await;
    wait_for_sequence(&h.engine, 1).await;

    h.engine.record_review(&revenue(), "controller").await.unwrap();
    wait_for_sequence(&h.engine, 2).await;
    assert_eq!(h.source.read_count(), 2);

    let err = h
        .engine
        .record_review(&AssertionId::new("missing"), "controller")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownAssertion(_)));
    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_ledger_failure_stops_the_engine() {
    let manifest = Manifest::from_json(&manifest_json("model.json"), "/projects/fy26").unwrap();
    let source = Arc::new(MemorySource::new());
    source.set_value(&DataBinding::cell("B5"), DRIFTED);
    let ledger = Arc::new(MemoryLedger::new());
    ledger.set_failing(true);
    let (_notify, notifier) = ChannelNotifier::new(4);

    let engine = GovernanceEngine::start_with(
        manifest,
        EngineConfig::default(),
        EngineComponents {
            source,
            notifier: Box::new(notifier),
            ledger: ledger.clone(),
            ledger_path: None,
        },
    )
    .await
    .unwrap();

    tokio::time::timeout(Duration::from_secs(10), async {
        while engine.is_running() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    // Nothing was committed without its audit record.
    assert_eq!(engine.current().sequence, 0);
    assert!(engine.stop_reason().is_some());
    let err = engine
        .submit_override(signed_override("too late"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Stopped(_)));
    engine.shutdown().await;
}

#[tokio::test]
async fn test_tampered_override_is_detected() {
    let dir = tempfile::tempdir().unwrap();
    let manifest_path = dir.path().join("manifest.json");
    std::fs::write(&manifest_path, manifest_json("model.json")).unwrap();
    write_workbook(&dir.path().join("model.json"), DRIFTED);

    let manifest = Manifest::load(&manifest_path).await.unwrap();
    let engine = GovernanceEngine::start(manifest, EngineConfig::default()).await.unwrap();
    wait_for_sequence(&engine, 1).await;
    engine
        .submit_override(signed_override("approved for board deck"))
        .await
        .unwrap();
    assert!(engine.verify_ledger().await.unwrap().is_valid());
    let ledger_path = engine.ledger_path().unwrap().to_path_buf();
    engine.shutdown().await;

    let contents = std::fs::read_to_string(&ledger_path).unwrap();
    assert!(contents.contains("approved for board deck"));
    std::fs::write(
        &ledger_path,
        contents.replace("approved for board deck", "approved for the board deck"),
    )
    .unwrap();

    let report = verify_ledger(&ledger_path).await.unwrap();
    assert!(!report.is_valid());
    assert_eq!(report.tampered_overrides(), 1);
}
