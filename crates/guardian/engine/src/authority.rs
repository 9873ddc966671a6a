//! State Authority
//!
//! Holds the one current [`EvaluationSnapshot`]. Reads clone an `Arc` and
//! never wait on writers. Every mutation, whether a cycle commit, an override
//! or an expiry, goes through a [`MutationGuard`], so the three are
//! serialised and each commit gets the next sequence number.

use guardian_types::{EvaluationSnapshot, GovernanceEvent};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, MutexGuard};
use tracing::debug;

use crate::error::{EngineError, Result};

pub struct StateAuthority {
    current: RwLock<Arc<EvaluationSnapshot>>,
    mutation: Mutex<()>,
    events: broadcast::Sender<GovernanceEvent>,
}

impl StateAuthority {
    pub fn new(event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            current: RwLock::new(Arc::new(EvaluationSnapshot::not_evaluated())),
            mutation: Mutex::new(()),
            events,
        }
    }

    /// Latest committed snapshot, or the not-evaluated sentinel.
    pub fn current(&self) -> Arc<EvaluationSnapshot> {
        self.current.read().clone()
    }

    /// Enter the mutation boundary.
    pub async fn begin(&self) -> MutationGuard<'_> {
        let lock = self.mutation.lock().await;
        MutationGuard {
            authority: self,
            _lock: lock,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GovernanceEvent> {
        self.events.subscribe()
    }

    /// Publish to observers. Having none is fine.
    pub fn publish(&self, event: GovernanceEvent) {
        let _ = self.events.send(event);
    }
}

/// Exclusive right to commit the next snapshot
pub struct MutationGuard<'a> {
    authority: &'a StateAuthority,
    _lock: MutexGuard<'a, ()>,
}

impl MutationGuard<'_> {
    /// Current snapshot; stable for as long as the guard is held.
    pub fn current(&self) -> Arc<EvaluationSnapshot> {
        self.authority.current()
    }

    pub fn next_sequence(&self) -> u64 {
        self.authority.current.read().sequence + 1
    }

    /// Atomically replace the current snapshot.
    ///
    /// The sequence must be exactly one past the current one. `evaluated_at`
    /// is clamped so commit times never go backwards.
    pub fn commit(&self, mut snapshot: EvaluationSnapshot) -> Result<Arc<EvaluationSnapshot>> {
        let mut slot = self.authority.current.write();
        if snapshot.sequence != slot.sequence + 1 {
            return Err(EngineError::SequenceViolation {
                current: slot.sequence,
                got: snapshot.sequence,
            });
        }
        if snapshot.evaluated_at < slot.evaluated_at {
            snapshot.evaluated_at = slot.evaluated_at;
        }
        snapshot.recompute_system_status();

        let committed = Arc::new(snapshot);
        *slot = committed.clone();
        debug!(
            sequence = committed.sequence,
            system_status = %committed.system_status,
            "Snapshot committed"
        );
        Ok(committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use guardian_types::SystemStatus;

    fn next(previous: &EvaluationSnapshot) -> EvaluationSnapshot {
        let mut snapshot = previous.clone();
        snapshot.sequence = previous.sequence + 1;
        snapshot.evaluated_at = Utc::now();
        snapshot
    }

    #[tokio::test]
    async fn test_sentinel_before_first_commit() {
        let authority = StateAuthority::new(8);
        let snapshot = authority.current();
        assert_eq!(snapshot.sequence, 0);
        assert_eq!(snapshot.system_status, SystemStatus::NotEvaluated);
    }

    #[tokio::test]
    async fn test_commit_swaps_snapshot() {
        let authority = StateAuthority::new(8);
        let before = authority.current();

        let guard = authority.begin().await;
        assert_eq!(guard.next_sequence(), 1);
        guard.commit(next(&before)).unwrap();
        drop(guard);

        let after = authority.current();
        assert_eq!(after.sequence, 1);
        assert_eq!(after.system_status, SystemStatus::Pass);
        // Readers holding the old Arc still see the old snapshot.
        assert_eq!(before.sequence, 0);
    }

    #[tokio::test]
    async fn test_commit_rejects_out_of_order_sequence() {
        let authority = StateAuthority::new(8);
        let guard = authority.begin().await;
        let mut snapshot = next(&guard.current());
        snapshot.sequence = 5;
        assert!(matches!(
            guard.commit(snapshot),
            Err(EngineError::SequenceViolation { current: 0, got: 5 })
        ));
    }

    #[tokio::test]
    async fn test_commit_time_never_goes_backwards() {
        let authority = StateAuthority::new(8);
        let guard = authority.begin().await;
        let first = guard.commit(next(&guard.current())).unwrap();

        let mut stale = next(&first);
        stale.evaluated_at = first.evaluated_at - Duration::minutes(5);
        let second = guard.commit(stale).unwrap();
        assert_eq!(second.evaluated_at, first.evaluated_at);
    }

    #[tokio::test]
    async fn test_mutations_are_serialised() {
        let authority = Arc::new(StateAuthority::new(8));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let authority = authority.clone();
            handles.push(tokio::spawn(async move {
                let guard = authority.begin().await;
                let snapshot = next(&guard.current());
                tokio::task::yield_now().await;
                guard.commit(snapshot).map(|s| s.sequence)
            }));
        }
        let mut sequences = Vec::new();
        for handle in handles {
            sequences.push(handle.await.unwrap().unwrap());
        }
        sequences.sort_unstable();
        assert_eq!(sequences, (1..=16).collect::<Vec<_>>());
    }
}
