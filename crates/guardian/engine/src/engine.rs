//! Engine lifecycle
//!
//! [`GovernanceEngine`] wires the pieces together for one manifest: it owns
//! the State Authority, spawns the scheduler and the expiry sweep, and is the
//! only handle outer surfaces talk to.

use chrono::Utc;
use guardian_gates::GateEngine;
use guardian_ledger::{
    new_session_id, verify_events, FileLedger, LedgerPage, LedgerQuery, LedgerSink,
    LedgerSummary, LedgerVerification,
};
use guardian_types::{
    Assertion, AssertionId, EvaluationSnapshot, GovernanceEvent, OverrideRecord, OverrideRequest,
    SnapshotView,
};
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::authority::StateAuthority;
use crate::config::EngineConfig;
use crate::cycle::CycleRunner;
use crate::error::{EngineError, Result};
use crate::expiry::run_expiry_loop;
use crate::manifest::Manifest;
use crate::notifier::{ChangeFilter, ChangeNotifier, PollingNotifier};
use crate::overrides::OverrideProtocol;
use crate::recorder::LedgerRecorder;
use crate::scheduler::Scheduler;
use crate::source::{DataSourceReader, JsonWorkbookSource};

/// Pluggable adapters for [`GovernanceEngine::start_with`]
pub struct EngineComponents {
    pub source: Arc<dyn DataSourceReader>,
    pub notifier: Box<dyn ChangeNotifier>,
    pub ledger: Arc<dyn LedgerSink>,
    /// Where `ledger` writes, so the scheduler can ignore its own appends
    pub ledger_path: Option<PathBuf>,
}

/// Shared stop state. The first reason wins.
struct StopSignal {
    shutdown: watch::Sender<bool>,
    reason: Mutex<Option<String>>,
    authority: Arc<StateAuthority>,
}

impl StopSignal {
    fn stop(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let first = {
            let mut slot = self.reason.lock();
            if slot.is_none() {
                *slot = Some(reason.clone());
                true
            } else {
                false
            }
        };
        if first {
            self.authority.publish(GovernanceEvent::EngineStopped {
                reason,
                at: Utc::now(),
            });
        }
        self.shutdown.send_replace(true);
    }

    fn reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }
}

/// Running governance engine for one manifest
pub struct GovernanceEngine {
    manifest: Manifest,
    assertions: Arc<RwLock<Vec<Assertion>>>,
    authority: Arc<StateAuthority>,
    recorder: Arc<LedgerRecorder>,
    overrides: OverrideProtocol,
    triggers: mpsc::Sender<()>,
    stop: Arc<StopSignal>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    ledger_path: Option<PathBuf>,
}

impl GovernanceEngine {
    /// Start against the manifest's workbook with a file ledger and a
    /// polling notifier.
    pub async fn start(manifest: Manifest, config: EngineConfig) -> Result<Self> {
        let ledger_path = config
            .ledger_path
            .clone()
            .unwrap_or_else(|| manifest.default_ledger_path());
        let ledger = FileLedger::open(&ledger_path).await?;
        let components = EngineComponents {
            source: Arc::new(JsonWorkbookSource::new(&manifest.target_path)),
            notifier: Box::new(PollingNotifier::new(&manifest.target_path, config.poll_interval())),
            ledger: Arc::new(ledger),
            ledger_path: Some(ledger_path),
        };
        Self::start_with(manifest, config, components).await
    }

    /// Start with explicit adapters. Must be called inside a tokio runtime.
    pub async fn start_with(
        manifest: Manifest,
        config: EngineConfig,
        components: EngineComponents,
    ) -> Result<Self> {
        config.validate()?;

        let session_id = new_session_id(Utc::now());
        let authority = Arc::new(StateAuthority::new(config.event_capacity));
        let recorder = Arc::new(LedgerRecorder::new(components.ledger, session_id.clone()));
        let assertions = Arc::new(RwLock::new(manifest.assertions.clone()));

        let runner = Arc::new(CycleRunner::new(
            components.source,
            GateEngine::new(manifest.gates.clone()),
            assertions.clone(),
            manifest.conflict_pairs.clone(),
            config.retry.clone(),
            config.cycle_timeout(),
            authority.clone(),
            recorder.clone(),
        ));
        let overrides = OverrideProtocol::new(
            authority.clone(),
            recorder.clone(),
            config.override_ttl(),
            config.future_skew(),
        );

        let mut filter = ChangeFilter::new(&manifest.target_path);
        if let Some(path) = &components.ledger_path {
            filter = filter.ignore(path);
        }

        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stop = Arc::new(StopSignal {
            shutdown: shutdown_tx,
            reason: Mutex::new(None),
            authority: authority.clone(),
        });

        let scheduler = Scheduler::new(
            config.debounce(),
            components.notifier,
            filter,
            runner,
            trigger_rx,
            shutdown_rx.clone(),
            config.shutdown_grace(),
        );
        let scheduler_task = {
            let stop = stop.clone();
            tokio::spawn(async move {
                if let Err(e) = scheduler.run().await {
                    error!(error = %e, "Scheduler stopped on fatal error");
                    stop.stop(e.to_string());
                }
            })
        };
        let expiry_task = {
            let stop = stop.clone();
            let every = config.expiry_sweep_interval();
            let loop_fut = run_expiry_loop(authority.clone(), recorder.clone(), every, shutdown_rx);
            tokio::spawn(async move {
                if let Err(e) = loop_fut.await {
                    error!(error = %e, "Expiry sweep stopped on fatal error");
                    stop.stop(e.to_string());
                }
            })
        };

        info!(
            project_id = %manifest.project_id,
            session_id = %session_id,
            target = %manifest.target_path.display(),
            assertions = manifest.assertions.len(),
            "Governance engine started"
        );

        Ok(Self {
            manifest,
            assertions,
            authority,
            recorder,
            overrides,
            triggers: trigger_tx,
            stop,
            tasks: Mutex::new(vec![scheduler_task, expiry_task]),
            ledger_path: components.ledger_path,
        })
    }

    /// Current committed snapshot
    pub fn current(&self) -> Arc<EvaluationSnapshot> {
        self.authority.current()
    }

    /// Observer view of the current snapshot
    pub fn view(&self) -> SnapshotView {
        self.authority.current().view()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GovernanceEvent> {
        self.authority.subscribe()
    }

    fn ensure_running(&self) -> Result<()> {
        match self.stop.reason() {
            Some(reason) => Err(EngineError::Stopped(reason)),
            None => Ok(()),
        }
    }

    /// Submit an override. A ledger failure stops the engine.
    pub async fn submit_override(&self, request: OverrideRequest) -> Result<OverrideRecord> {
        self.ensure_running()?;
        self.overrides.submit(request).await.inspect_err(|e| {
            if e.is_fatal() {
                self.stop.stop(e.to_string());
            }
        })
    }

    /// Record that `reviewer` confirmed an assertion's value is current.
    ///
    /// Bumps `last_updated` and schedules a cycle so freshness re-evaluates.
    pub async fn record_review(&self, id: &AssertionId, reviewer: &str) -> Result<()> {
        self.ensure_running()?;
        let reviewer = reviewer.trim();
        if reviewer.is_empty() {
            return Err(EngineError::Configuration("reviewer must not be empty".into()));
        }

        let now = Utc::now();
        let previous = self
            .assertions
            .read()
            .iter()
            .find(|a| &a.id == id)
            .map(|a| a.last_updated)
            .ok_or_else(|| EngineError::UnknownAssertion(id.clone()))?;

        if let Err(e) = self.recorder.review(id, reviewer, previous, now).await {
            self.stop.stop(e.to_string());
            return Err(e);
        }
        if let Some(assertion) = self.assertions.write().iter_mut().find(|a| &a.id == id) {
            assertion.mark_reviewed(now);
        }
        info!(assertion_id = %id, reviewer, "Assertion reviewed");

        self.trigger_cycle();
        Ok(())
    }

    /// Ask for a cycle without waiting for a change notification.
    ///
    /// Requests made while one is already queued collapse into it.
    pub fn trigger_cycle(&self) {
        match self.triggers.try_send(()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => {}
            Err(mpsc::error::TrySendError::Closed(())) => {
                warn!("Cycle trigger ignored, scheduler is not running");
            }
        }
    }

    pub async fn query_ledger(&self, query: &LedgerQuery) -> Result<LedgerPage> {
        let events = self.recorder.sink().read_all().await?;
        Ok(query.apply(&events))
    }

    pub async fn ledger_summary(&self) -> Result<LedgerSummary> {
        let events = self.recorder.sink().read_all().await?;
        Ok(LedgerSummary::from_events(&events, Utc::now()))
    }

    /// Verify the chain and every accepted override's content hash.
    pub async fn verify_ledger(&self) -> Result<LedgerVerification> {
        let events = self.recorder.sink().read_all().await?;
        Ok(verify_events(&events)?)
    }

    pub fn is_running(&self) -> bool {
        self.stop.reason().is_none()
    }

    /// Why the engine stopped, if it has
    pub fn stop_reason(&self) -> Option<String> {
        self.stop.reason()
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn session_id(&self) -> &str {
        self.recorder.session_id()
    }

    pub fn ledger_path(&self) -> Option<&Path> {
        self.ledger_path.as_deref()
    }

    /// Stop the scheduler and the expiry sweep and wait for both.
    ///
    /// An in-flight cycle gets the configured grace period to commit.
    pub async fn shutdown(&self) {
        self.stop.stop("shutdown requested");
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Engine task ended abnormally");
            }
        }
        info!(session_id = %self.session_id(), "Governance engine stopped");
    }
}
