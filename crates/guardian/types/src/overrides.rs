//! Override (bypass) records and their content hash.
//!
//! The content hash is SHA-256 over `"{justification}|{signer}|{timestamp}"`
//! with the timestamp exactly as submitted, so any verifier holding the three
//! plaintext fields can recompute it offline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ids::{AssertionId, OverrideId};

/// Compute the override content hash (lowercase hex).
pub fn compute_content_hash(justification: &str, signer: &str, timestamp: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(justification.as_bytes());
    hasher.update(b"|");
    hasher.update(signer.as_bytes());
    hasher.update(b"|");
    hasher.update(timestamp.as_bytes());
    hex::encode(hasher.finalize())
}

/// An override as submitted by an observer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideRequest {
    pub assertion_ids: Vec<AssertionId>,
    pub justification: String,
    pub signer: String,
    /// RFC 3339 timestamp, hashed verbatim.
    pub timestamp: String,
    pub content_hash: String,
}

impl OverrideRequest {
    /// Build a request and compute its hash.
    pub fn signed(
        assertion_ids: Vec<AssertionId>,
        justification: impl Into<String>,
        signer: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        let justification = justification.into();
        let signer = signer.into();
        let timestamp = timestamp.into();
        let content_hash = compute_content_hash(&justification, &signer, &timestamp);
        Self {
            assertion_ids,
            justification,
            signer,
            timestamp,
            content_hash,
        }
    }

    /// Whether the declared hash matches the plaintext fields.
    pub fn hash_matches(&self) -> bool {
        compute_content_hash(&self.justification, &self.signer, &self.timestamp)
            .eq_ignore_ascii_case(self.content_hash.trim())
    }
}

/// An accepted override. Immutable once appended to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideRecord {
    pub id: OverrideId,
    pub assertion_ids: Vec<AssertionId>,
    pub justification: String,
    pub signer: String,
    /// Timestamp string exactly as submitted.
    pub timestamp: String,
    pub content_hash: String,
    pub submitted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Snapshot sequence that made this override visible.
    pub applied_at_sequence: u64,
}

impl OverrideRecord {
    /// Recompute the content hash from the stored plaintext fields.
    pub fn verify(&self) -> bool {
        compute_content_hash(&self.justification, &self.signer, &self.timestamp) == self.content_hash
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn covers(&self, id: &AssertionId) -> bool {
        self.assertion_ids.contains(id)
    }

    pub fn as_active(&self) -> ActiveOverride {
        ActiveOverride {
            override_id: self.id,
            signer: self.signer.clone(),
            expires_at: self.expires_at,
            applied_at_sequence: self.applied_at_sequence,
        }
    }
}

/// The part of an override an assertion evaluation carries while it is in force.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveOverride {
    pub override_id: OverrideId,
    pub signer: String,
    pub expires_at: DateTime<Utc>,
    pub applied_at_sequence: u64,
}

impl ActiveOverride {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
