//! Ledger event types

use chrono::{DateTime, Utc};
use guardian_types::AssertionId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{LedgerError, Result};

/// A committed ledger event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEvent {
    /// Unique event ID
    pub id: Uuid,

    /// Time the event was recorded
    pub timestamp: DateTime<Utc>,

    /// Engine run that produced the event
    pub session_id: String,

    /// Event kind
    pub kind: EventKind,

    pub severity: Severity,

    /// Assertion concerned, `None` for system-level events
    pub assertion_id: Option<AssertionId>,

    /// Who caused the event
    pub actor: Actor,

    pub outcome: Outcome,

    /// Free-form payload
    pub details: serde_json::Value,

    /// Hash of the previous event (for chain integrity)
    pub previous_hash: Option<String>,

    /// Hash of this event
    pub entry_hash: String,
}

impl LedgerEvent {
    /// Create a new event builder
    pub fn builder() -> LedgerEventBuilder {
        LedgerEventBuilder::new()
    }

    /// Recompute this event's hash from its content.
    pub fn compute_hash(&self) -> Result<String> {
        canonical_hash(&HashedFields {
            id: &self.id,
            timestamp: &self.timestamp,
            session_id: &self.session_id,
            kind: self.kind,
            severity: self.severity,
            assertion_id: self.assertion_id.as_ref(),
            actor: &self.actor,
            outcome: &self.outcome,
            details: &self.details,
            previous_hash: self.previous_hash.as_deref(),
        })
    }

    /// Look up a field of the details payload.
    pub fn detail(&self, key: &str) -> Option<&serde_json::Value> {
        self.details.get(key)
    }
}

/// The fields covered by `entry_hash`, in a fixed order.
#[derive(Serialize)]
struct HashedFields<'a> {
    id: &'a Uuid,
    timestamp: &'a DateTime<Utc>,
    session_id: &'a str,
    kind: EventKind,
    severity: Severity,
    assertion_id: Option<&'a AssertionId>,
    actor: &'a Actor,
    outcome: &'a Outcome,
    details: &'a serde_json::Value,
    previous_hash: Option<&'a str>,
}

fn canonical_hash(fields: &HashedFields<'_>) -> Result<String> {
    let bytes = serde_json::to_vec(fields)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Builder for ledger events
#[derive(Debug, Default)]
pub struct LedgerEventBuilder {
    session_id: Option<String>,
    kind: Option<EventKind>,
    severity: Option<Severity>,
    assertion_id: Option<AssertionId>,
    actor: Option<Actor>,
    outcome: Option<Outcome>,
    details: serde_json::Map<String, serde_json::Value>,
}

impl LedgerEventBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn kind(mut self, kind: EventKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn assertion(mut self, id: AssertionId) -> Self {
        self.assertion_id = Some(id);
        self
    }

    pub fn actor(mut self, actor: Actor) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    /// Add a details value. Values that fail to serialise are skipped.
    pub fn detail(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.insert(key.into(), v);
        }
        self
    }

    /// Build the event (without hash - the sink chains and hashes it)
    pub fn build(self) -> Result<PartialLedgerEvent> {
        Ok(PartialLedgerEvent {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            session_id: self.session_id.ok_or(LedgerError::MissingField("session_id"))?,
            kind: self.kind.ok_or(LedgerError::MissingField("kind"))?,
            severity: self.severity.unwrap_or(Severity::Info),
            assertion_id: self.assertion_id,
            actor: self.actor.ok_or(LedgerError::MissingField("actor"))?,
            outcome: self.outcome.unwrap_or(Outcome::Recorded),
            details: serde_json::Value::Object(self.details),
        })
    }
}

/// An event before it is linked into the chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialLedgerEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub kind: EventKind,
    pub severity: Severity,
    pub assertion_id: Option<AssertionId>,
    pub actor: Actor,
    pub outcome: Outcome,
    pub details: serde_json::Value,
}

impl PartialLedgerEvent {
    /// Link to `previous_hash` and compute this event's hash.
    pub fn finalize(self, previous_hash: Option<String>) -> Result<LedgerEvent> {
        let entry_hash = canonical_hash(&HashedFields {
            id: &self.id,
            timestamp: &self.timestamp,
            session_id: &self.session_id,
            kind: self.kind,
            severity: self.severity,
            assertion_id: self.assertion_id.as_ref(),
            actor: &self.actor,
            outcome: &self.outcome,
            details: &self.details,
            previous_hash: previous_hash.as_deref(),
        })?;

        Ok(LedgerEvent {
            id: self.id,
            timestamp: self.timestamp,
            session_id: self.session_id,
            kind: self.kind,
            severity: self.severity,
            assertion_id: self.assertion_id,
            actor: self.actor,
            outcome: self.outcome,
            details: self.details,
            previous_hash,
            entry_hash,
        })
    }
}

/// Event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// An evaluation cycle committed (or failed)
    Cycle,
    /// An assertion entered HALT
    Halt,
    /// An override was accepted or rejected
    Override,
    /// A HALT or override ended
    Resolve,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cycle => write!(f, "CYCLE"),
            Self::Halt => write!(f, "HALT"),
            Self::Override => write!(f, "OVERRIDE"),
            Self::Resolve => write!(f, "RESOLVE"),
        }
    }
}

impl FromStr for EventKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "CYCLE" => Ok(Self::Cycle),
            "HALT" => Ok(Self::Halt),
            "OVERRIDE" => Ok(Self::Override),
            "RESOLVE" => Ok(Self::Resolve),
            other => Err(LedgerError::InvalidFilter(format!("unknown event kind: {other}"))),
        }
    }
}

/// Severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Warn,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warn => write!(f, "WARN"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl FromStr for Severity {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "INFO" => Ok(Self::Info),
            "WARN" | "WARNING" => Ok(Self::Warn),
            "CRITICAL" => Ok(Self::Critical),
            other => Err(LedgerError::InvalidFilter(format!("unknown severity: {other}"))),
        }
    }
}

/// Who caused an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub actor_type: ActorType,
    pub id: String,
}

impl Actor {
    /// An engine component
    pub fn system(component: impl Into<String>) -> Self {
        Self {
            actor_type: ActorType::System,
            id: component.into(),
        }
    }

    /// A person, identified by the signer they presented
    pub fn human(signer: impl Into<String>) -> Self {
        Self {
            actor_type: ActorType::Human,
            id: signer.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    System,
    Human,
}

/// Outcome recorded with an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// Plain observation
    Recorded,
    Accepted,
    Rejected { code: String, reason: String },
    Failed { reason: String },
}

impl Outcome {
    pub fn rejected(code: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            code: code.into(),
            reason: reason.into(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

/// Session identifier for one engine run, e.g. `20260122-14-3f9a2c1e`.
pub fn new_session_id(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", now.format("%Y%m%d-%H"), &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partial(kind: EventKind) -> PartialLedgerEvent {
        LedgerEvent::builder()
            .session("20260122-14-test")
            .kind(kind)
            .severity(Severity::Warn)
            .assertion(AssertionId::new("ast-001"))
            .actor(Actor::system("scheduler"))
            .detail("drift", 0.6)
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_requires_fields() {
        let err = LedgerEvent::builder()
            .kind(EventKind::Cycle)
            .actor(Actor::system("scheduler"))
            .build()
            .unwrap_err();
        assert!(matches!(err, LedgerError::MissingField("session_id")));
    }

    #[test]
    fn test_builder_defaults() {
        let event = LedgerEvent::builder()
            .session("s")
            .kind(EventKind::Cycle)
            .actor(Actor::system("scheduler"))
            .build()
            .unwrap();
        assert_eq!(event.severity, Severity::Info);
        assert_eq!(event.outcome, Outcome::Recorded);
        assert!(event.details.is_object());
    }

    #[test]
    fn test_finalize_links_chain() {
        let first = partial(EventKind::Cycle).finalize(None).unwrap();
        assert!(first.previous_hash.is_none());
        assert_eq!(first.entry_hash.len(), 64);

        let second = partial(EventKind::Halt)
            .finalize(Some(first.entry_hash.clone()))
            .unwrap();
        assert_eq!(second.previous_hash, Some(first.entry_hash));
    }

    #[test]
    fn test_hash_survives_json_round_trip() {
        let event = partial(EventKind::Halt).finalize(None).unwrap();
        let line = serde_json::to_string(&event).unwrap();
        let parsed: LedgerEvent = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed.compute_hash().unwrap(), event.entry_hash);
    }

    #[test]
    fn test_details_are_covered_by_hash() {
        let mut event = partial(EventKind::Halt).finalize(None).unwrap();
        event.details["drift"] = serde_json::json!(0.01);
        assert_ne!(event.compute_hash().unwrap(), event.entry_hash);
    }

    #[test]
    fn test_parse_filters() {
        assert_eq!("override".parse::<EventKind>().unwrap(), EventKind::Override);
        assert_eq!("warning".parse::<Severity>().unwrap(), Severity::Warn);
        assert!("loud".parse::<Severity>().is_err());
        assert!(Severity::Critical > Severity::Warn);
    }

    #[test]
    fn test_session_id_shape() {
        let id = new_session_id(Utc::now());
        assert_eq!(id.len(), "20260122-14-".len() + 8);
    }
}
