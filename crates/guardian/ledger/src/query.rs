//! Ledger query, pagination and summary

use chrono::{DateTime, Duration, Utc};
use guardian_types::AssertionId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::event::{EventKind, LedgerEvent, Severity};

/// Default page size.
pub const DEFAULT_PAGE_SIZE: usize = 50;
/// Largest page a caller may request.
pub const MAX_PAGE_SIZE: usize = 1_000;

/// Severity filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityFilter {
    Exactly(Severity),
    AtLeast(Severity),
}

impl SeverityFilter {
    fn matches(&self, severity: Severity) -> bool {
        match self {
            Self::Exactly(s) => severity == *s,
            Self::AtLeast(s) => severity >= *s,
        }
    }
}

/// Query over ledger events
#[derive(Debug, Clone)]
pub struct LedgerQuery {
    /// Time range start (inclusive)
    pub from: Option<DateTime<Utc>>,

    /// Time range end (exclusive)
    pub to: Option<DateTime<Utc>>,

    pub severity: Option<SeverityFilter>,
    pub kind: Option<EventKind>,
    pub assertion_id: Option<AssertionId>,
    pub session_id: Option<String>,

    pub offset: usize,
    pub limit: usize,

    /// Sort order (true = newest first)
    pub descending: bool,
}

impl Default for LedgerQuery {
    fn default() -> Self {
        Self {
            from: None,
            to: None,
            severity: None,
            kind: None,
            assertion_id: None,
            session_id: None,
            offset: 0,
            limit: DEFAULT_PAGE_SIZE,
            descending: true,
        }
    }
}

/// One page of query results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerPage {
    pub events: Vec<LedgerEvent>,
    /// Matching events before pagination
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

impl LedgerPage {
    pub fn has_more(&self) -> bool {
        self.offset + self.events.len() < self.total
    }
}

impl LedgerQuery {
    pub fn builder() -> LedgerQueryBuilder {
        LedgerQueryBuilder::default()
    }

    /// Check if an event matches this query's filters
    pub fn matches(&self, event: &LedgerEvent) -> bool {
        if let Some(from) = self.from {
            if event.timestamp < from {
                return false;
            }
        }

        if let Some(to) = self.to {
            if event.timestamp >= to {
                return false;
            }
        }

        if let Some(filter) = self.severity {
            if !filter.matches(event.severity) {
                return false;
            }
        }

        if let Some(kind) = self.kind {
            if event.kind != kind {
                return false;
            }
        }

        if let Some(ref id) = self.assertion_id {
            if event.assertion_id.as_ref() != Some(id) {
                return false;
            }
        }

        if let Some(ref session) = self.session_id {
            if &event.session_id != session {
                return false;
            }
        }

        true
    }

    /// Filter, order and paginate. `events` is in append order.
    pub fn apply(&self, events: &[LedgerEvent]) -> LedgerPage {
        let mut matched: Vec<&LedgerEvent> = events.iter().filter(|e| self.matches(e)).collect();
        if self.descending {
            matched.reverse();
        }

        let limit = self.limit.clamp(1, MAX_PAGE_SIZE);
        let total = matched.len();
        let page = matched
            .into_iter()
            .skip(self.offset)
            .take(limit)
            .cloned()
            .collect();

        LedgerPage {
            events: page,
            total,
            offset: self.offset,
            limit,
        }
    }
}

/// Builder for ledger queries
#[derive(Debug, Default)]
pub struct LedgerQueryBuilder {
    query: LedgerQuery,
}

impl LedgerQueryBuilder {
    pub fn from(mut self, time: DateTime<Utc>) -> Self {
        self.query.from = Some(time);
        self
    }

    pub fn to(mut self, time: DateTime<Utc>) -> Self {
        self.query.to = Some(time);
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.query.severity = Some(SeverityFilter::Exactly(severity));
        self
    }

    pub fn min_severity(mut self, severity: Severity) -> Self {
        self.query.severity = Some(SeverityFilter::AtLeast(severity));
        self
    }

    pub fn kind(mut self, kind: EventKind) -> Self {
        self.query.kind = Some(kind);
        self
    }

    pub fn assertion(mut self, id: AssertionId) -> Self {
        self.query.assertion_id = Some(id);
        self
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.query.session_id = Some(session_id.into());
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.query.offset = offset;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.query.limit = limit;
        self
    }

    /// Oldest first
    pub fn ascending(mut self) -> Self {
        self.query.descending = false;
        self
    }

    pub fn build(self) -> LedgerQuery {
        self.query
    }
}

/// Aggregate counts over the ledger
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub total_events: usize,
    pub by_severity: BTreeMap<String, usize>,
    pub by_kind: BTreeMap<String, usize>,
    pub halt_events: usize,
    pub override_events: usize,
    pub rejected_overrides: usize,
    pub last_24h: usize,
    pub latest_event_at: Option<DateTime<Utc>>,
}

impl LedgerSummary {
    pub fn from_events(events: &[LedgerEvent], now: DateTime<Utc>) -> Self {
        let cutoff = now - Duration::hours(24);
        let mut summary = Self {
            total_events: events.len(),
            ..Self::default()
        };

        for event in events {
            *summary.by_severity.entry(event.severity.to_string()).or_default() += 1;
            *summary.by_kind.entry(event.kind.to_string()).or_default() += 1;
            match event.kind {
                EventKind::Halt => summary.halt_events += 1,
                EventKind::Override => {
                    summary.override_events += 1;
                    if event.outcome.is_rejected() {
                        summary.rejected_overrides += 1;
                    }
                }
                _ => {}
            }
            if event.timestamp >= cutoff {
                summary.last_24h += 1;
            }
            if summary.latest_event_at.map_or(true, |t| event.timestamp > t) {
                summary.latest_event_at = Some(event.timestamp);
            }
        }

        summary
    }
}
