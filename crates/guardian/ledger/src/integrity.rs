//! Integrity verification for the ledger chain

use serde::Serialize;

use crate::error::Result;
use crate::event::LedgerEvent;

/// Chain head kept by a sink
#[derive(Debug, Clone, Default)]
pub struct LedgerChain {
    last_hash: Option<String>,
    event_count: u64,
}

impl LedgerChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore from events already on disk
    pub fn from_state(last_hash: Option<String>, event_count: u64) -> Self {
        Self {
            last_hash,
            event_count,
        }
    }

    /// Previous hash for the next event
    pub fn previous_hash(&self) -> Option<String> {
        self.last_hash.clone()
    }

    pub fn update(&mut self, event: &LedgerEvent) {
        self.last_hash = Some(event.entry_hash.clone());
        self.event_count += 1;
    }

    pub fn event_count(&self) -> u64 {
        self.event_count
    }

    pub fn head_hash(&self) -> Option<&str> {
        self.last_hash.as_deref()
    }
}

/// Verifies stored events against their hashes and links
pub struct ChainVerifier;

impl ChainVerifier {
    /// Verify a single event's hash
    pub fn verify_event(event: &LedgerEvent) -> Result<bool> {
        Ok(event.compute_hash()? == event.entry_hash)
    }

    /// Verify a whole chain, stopping at the first bad event
    pub fn verify_chain(events: &[LedgerEvent]) -> Result<ChainVerification> {
        let mut result = ChainVerification {
            valid: true,
            total_events: events.len(),
            verified_events: 0,
            first_invalid_index: None,
            error_message: None,
        };

        for (i, event) in events.iter().enumerate() {
            if !Self::verify_event(event)? {
                result.fail(i, format!("event {} has invalid hash", event.id));
                return Ok(result);
            }

            let expected_prev = if i == 0 {
                None
            } else {
                Some(&events[i - 1].entry_hash)
            };
            if event.previous_hash.as_ref() != expected_prev {
                result.fail(
                    i,
                    format!(
                        "event {} has broken chain link (expected prev: {:?}, got: {:?})",
                        event.id, expected_prev, event.previous_hash
                    ),
                );
                return Ok(result);
            }

            result.verified_events = i + 1;
        }

        Ok(result)
    }
}

/// Result of chain verification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainVerification {
    pub valid: bool,
    pub total_events: usize,
    pub verified_events: usize,
    pub first_invalid_index: Option<usize>,
    pub error_message: Option<String>,
}

impl ChainVerification {
    fn fail(&mut self, index: usize, message: String) {
        self.valid = false;
        self.first_invalid_index = Some(index);
        self.error_message = Some(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Actor, EventKind};

    fn chain_of(n: usize) -> Vec<LedgerEvent> {
        let mut chain = LedgerChain::new();
        (0..n)
            .map(|i| {
                let event = LedgerEvent::builder()
                    .session("test")
                    .kind(EventKind::Cycle)
                    .actor(Actor::system("scheduler"))
                    .detail("sequence", i)
                    .build()
                    .unwrap()
                    .finalize(chain.previous_hash())
                    .unwrap();
                chain.update(&event);
                event
            })
            .collect()
    }

    #[test]
    fn test_chain_head() {
        let mut chain = LedgerChain::new();
        assert!(chain.previous_hash().is_none());
        let events = chain_of(2);
        for event in &events {
            chain.update(event);
        }
        assert_eq!(chain.event_count(), 2);
        assert_eq!(chain.head_hash(), Some(events[1].entry_hash.as_str()));
    }

    #[test]
    fn test_valid_chain() {
        let events = chain_of(3);
        let result = ChainVerifier::verify_chain(&events).unwrap();
        assert!(result.valid);
        assert_eq!(result.verified_events, 3);
    }

    #[test]
    fn test_empty_chain_is_valid() {
        assert!(ChainVerifier::verify_chain(&[]).unwrap().valid);
    }

    #[test]
    fn test_tampered_payload_detected() {
        let mut events = chain_of(3);
        events[1].details["sequence"] = serde_json::json!(99);
        let result = ChainVerifier::verify_chain(&events).unwrap();
        assert!(!result.valid);
        assert_eq!(result.first_invalid_index, Some(1));
    }

    #[test]
    fn test_removed_event_detected() {
        let mut events = chain_of(3);
        events.remove(1);
        let result = ChainVerifier::verify_chain(&events).unwrap();
        assert!(!result.valid);
        assert_eq!(result.first_invalid_index, Some(1));
        assert_eq!(result.verified_events, 1);
    }
}
