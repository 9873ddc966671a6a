//! Governance events broadcast to observers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AssertionId, OverrideId};
use crate::status::SystemStatus;

/// Change notification published by the state authority after each commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GovernanceEvent {
    SnapshotCommitted {
        sequence: u64,
        system_status: SystemStatus,
        halted: Vec<AssertionId>,
        at: DateTime<Utc>,
    },
    OverrideApplied {
        override_id: OverrideId,
        assertion_ids: Vec<AssertionId>,
        sequence: u64,
        expires_at: DateTime<Utc>,
    },
    OverrideExpired {
        override_id: OverrideId,
        assertion_ids: Vec<AssertionId>,
        sequence: u64,
    },
    EngineStopped {
        reason: String,
        at: DateTime<Utc>,
    },
}

impl GovernanceEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::SnapshotCommitted { .. } => "snapshot_committed",
            Self::OverrideApplied { .. } => "override_applied",
            Self::OverrideExpired { .. } => "override_expired",
            Self::EngineStopped { .. } => "engine_stopped",
        }
    }

    pub fn sequence(&self) -> Option<u64> {
        match self {
            Self::SnapshotCommitted { sequence, .. }
            | Self::OverrideApplied { sequence, .. }
            | Self::OverrideExpired { sequence, .. } => Some(*sequence),
            Self::EngineStopped { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_matches_tag() {
        let event = GovernanceEvent::SnapshotCommitted {
            sequence: 3,
            system_status: SystemStatus::Halt,
            halted: vec![AssertionId::new("ast-001")],
            at: Utc::now(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], event.event_type());
        assert_eq!(event.sequence(), Some(3));
    }
}
