//! Change-detection scheduler
//!
//! [`SchedulerFsm`] is a pure state machine over
//! `IDLE -> PENDING -> RUNNING -> IDLE`:
//!
//! - a notification arms (or re-arms) the debounce deadline
//! - the deadline elapsing starts a cycle
//! - notifications during a cycle collapse into one follow-up
//!
//! [`Scheduler`] drives it from a notifier, a trigger channel and the
//! running cycle, and owns shutdown.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::cycle::{CycleReport, CycleRunner};
use crate::error::Result;
use crate::notifier::{ChangeFilter, ChangeNotifier};

/// Scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    /// Waiting out the debounce window
    Pending { deadline: Instant },
    /// A cycle holds the cycle slot; `follow_up` is the time of the latest
    /// notification seen meanwhile.
    Running { follow_up: Option<Instant> },
}

/// Inputs to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerInput {
    Notified { now: Instant },
    DeadlineElapsed { now: Instant },
    CycleFinished { now: Instant },
    /// Run as soon as possible, skipping the debounce window
    Immediate { now: Instant },
}

/// What the driver must do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerAction {
    None,
    ArmTimer(Instant),
    StartCycle,
}

#[derive(Debug, Clone)]
pub struct SchedulerFsm {
    state: SchedulerState,
    debounce: Duration,
    cycles_started: u64,
    coalesced: u64,
}

impl SchedulerFsm {
    pub fn new(debounce: Duration) -> Self {
        Self {
            state: SchedulerState::Idle,
            debounce,
            cycles_started: 0,
            coalesced: 0,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Deadline the driver should sleep until, if any
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            SchedulerState::Pending { deadline } => Some(deadline),
            _ => None,
        }
    }

    pub fn cycles_started(&self) -> u64 {
        self.cycles_started
    }

    /// Notifications absorbed without starting their own cycle
    pub fn coalesced(&self) -> u64 {
        self.coalesced
    }

    pub fn handle(&mut self, input: SchedulerInput) -> SchedulerAction {
        use SchedulerAction as A;
        use SchedulerInput as I;
        use SchedulerState as S;

        let (next, action) = match (self.state, input) {
            (S::Idle, I::Notified { now }) => {
                let deadline = now + self.debounce;
                (S::Pending { deadline }, A::ArmTimer(deadline))
            }
            (S::Pending { .. }, I::Notified { now }) => {
                self.coalesced += 1;
                let deadline = now + self.debounce;
                (S::Pending { deadline }, A::ArmTimer(deadline))
            }
            (S::Running { follow_up }, I::Notified { now }) => {
                if follow_up.is_some() {
                    self.coalesced += 1;
                }
                (S::Running { follow_up: Some(now) }, A::None)
            }

            (S::Pending { deadline }, I::DeadlineElapsed { now }) if now >= deadline => {
                self.cycles_started += 1;
                (S::Running { follow_up: None }, A::StartCycle)
            }
            (S::Pending { deadline }, I::DeadlineElapsed { .. }) => {
                (S::Pending { deadline }, A::ArmTimer(deadline))
            }

            (S::Running { follow_up: Some(at) }, I::CycleFinished { now }) => {
                let deadline = (at + self.debounce).max(now);
                (S::Pending { deadline }, A::ArmTimer(deadline))
            }
            (S::Running { follow_up: None }, I::CycleFinished { .. }) => (S::Idle, A::None),

            (S::Idle | S::Pending { .. }, I::Immediate { .. }) => {
                self.cycles_started += 1;
                (S::Running { follow_up: None }, A::StartCycle)
            }
            (S::Running { follow_up }, I::Immediate { now }) => {
                if follow_up.is_some() {
                    self.coalesced += 1;
                }
                (S::Running { follow_up: Some(now) }, A::None)
            }

            // Stale timer or a finish with nothing running.
            (state, _) => (state, A::None),
        };

        self.state = next;
        action
    }
}

type CycleHandle = JoinHandle<Result<CycleReport>>;

async fn join_cycle(handle: &mut Option<CycleHandle>) -> std::result::Result<Result<CycleReport>, JoinError> {
    match handle.as_mut() {
        Some(handle) => handle.await,
        None => pending().await,
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

/// Drives [`SchedulerFsm`] for one monitored source
pub struct Scheduler {
    fsm: SchedulerFsm,
    notifier: Box<dyn ChangeNotifier>,
    filter: ChangeFilter,
    runner: Arc<CycleRunner>,
    triggers: mpsc::Receiver<()>,
    shutdown: watch::Receiver<bool>,
    shutdown_grace: Duration,
}

impl Scheduler {
    pub fn new(
        debounce: Duration,
        notifier: Box<dyn ChangeNotifier>,
        filter: ChangeFilter,
        runner: Arc<CycleRunner>,
        triggers: mpsc::Receiver<()>,
        shutdown: watch::Receiver<bool>,
        shutdown_grace: Duration,
    ) -> Self {
        Self {
            fsm: SchedulerFsm::new(debounce),
            notifier,
            filter,
            runner,
            triggers,
            shutdown,
            shutdown_grace,
        }
    }

    fn dispatch(&mut self, input: SchedulerInput, running: &mut Option<CycleHandle>) {
        if let SchedulerAction::StartCycle = self.fsm.handle(input) {
            let runner = self.runner.clone();
            *running = Some(tokio::spawn(async move { runner.run().await }));
        }
    }

    /// Run until shutdown. Returns `Err` when a cycle hits a fatal error.
    pub async fn run(mut self) -> Result<()> {
        let mut running: Option<CycleHandle> = None;
        let mut notifier_open = true;
        let mut triggers_open = true;

        info!("Scheduler started");
        self.dispatch(SchedulerInput::Immediate { now: Instant::now() }, &mut running);

        loop {
            let deadline = self.fsm.deadline();
            tokio::select! {
                biased;

                _ = self.shutdown.changed() => break,

                joined = join_cycle(&mut running) => {
                    running = None;
                    match joined {
                        Ok(Ok(report)) => debug!(
                            sequence = report.sequence,
                            system_status = %report.system_status,
                            "Cycle finished"
                        ),
                        Ok(Err(e)) if e.is_fatal() => {
                            error!(error = %e, "Cycle failed fatally, scheduler stopping");
                            return Err(e);
                        }
                        Ok(Err(e)) => error!(error = %e, "Cycle failed"),
                        Err(e) => error!(error = %e, "Cycle task aborted"),
                    }
                    self.dispatch(SchedulerInput::CycleFinished { now: Instant::now() }, &mut running);
                }

                notification = self.notifier.next(), if notifier_open => match notification {
                    Some(n) if self.filter.accepts(&n) => {
                        debug!(path = %n.path.display(), "Change notification");
                        self.dispatch(SchedulerInput::Notified { now: Instant::now() }, &mut running);
                    }
                    Some(n) => debug!(path = %n.path.display(), "Notification ignored"),
                    None => {
                        warn!("Change notifier closed; only explicit triggers will start cycles");
                        notifier_open = false;
                    }
                },

                _ = wait_deadline(deadline) => {
                    self.dispatch(SchedulerInput::DeadlineElapsed { now: Instant::now() }, &mut running);
                }

                trigger = self.triggers.recv(), if triggers_open => match trigger {
                    Some(()) => self.dispatch(SchedulerInput::Immediate { now: Instant::now() }, &mut running),
                    None => triggers_open = false,
                },
            }
        }

        if let Some(mut handle) = running.take() {
            info!(grace_secs = self.shutdown_grace.as_secs(), "Waiting for in-flight cycle");
            match tokio::time::timeout(self.shutdown_grace, &mut handle).await {
                Ok(Ok(Err(e))) if e.is_fatal() => return Err(e),
                Ok(_) => {}
                Err(_) => {
                    warn!("In-flight cycle did not finish within the grace period, aborting");
                    handle.abort();
                }
            }
        }

        info!(
            cycles = self.fsm.cycles_started(),
            coalesced = self.fsm.coalesced(),
            "Scheduler stopped"
        );
        Ok(())
    }
}
