//! Ledger sinks
//!
//! Appends are single-writer: each sink holds one lock across chaining,
//! serialisation and the write itself, so concurrent callers can neither
//! interleave bytes nor fork the hash chain.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::error::{LedgerError, Result};
use crate::event::{LedgerEvent, PartialLedgerEvent};
use crate::integrity::{ChainVerifier, LedgerChain};

/// Append-only event store
#[async_trait]
pub trait LedgerSink: Send + Sync {
    /// Chain, hash and durably append an event
    async fn append(&self, event: PartialLedgerEvent) -> Result<LedgerEvent>;

    /// All events in append order
    async fn read_all(&self) -> Result<Vec<LedgerEvent>>;

    /// Number of events in the chain
    async fn event_count(&self) -> Result<u64>;
}

struct MemoryState {
    chain: LedgerChain,
    events: Vec<LedgerEvent>,
}

/// In-memory ledger for tests and embedding
pub struct MemoryLedger {
    state: parking_lot::Mutex<MemoryState>,
    failing: AtomicBool,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            state: parking_lot::Mutex::new(MemoryState {
                chain: LedgerChain::new(),
                events: Vec::new(),
            }),
            failing: AtomicBool::new(false),
        }
    }

    /// Snapshot of all events
    pub fn events(&self) -> Vec<LedgerEvent> {
        self.state.lock().events.clone()
    }

    /// Make every subsequent append fail, as a full disk would.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerSink for MemoryLedger {
    async fn append(&self, partial: PartialLedgerEvent) -> Result<LedgerEvent> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(LedgerError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "ledger storage unavailable",
            )));
        }

        let mut state = self.state.lock();
        let event = partial.finalize(state.chain.previous_hash())?;
        state.chain.update(&event);
        state.events.push(event.clone());
        Ok(event)
    }

    async fn read_all(&self) -> Result<Vec<LedgerEvent>> {
        Ok(self.events())
    }

    async fn event_count(&self) -> Result<u64> {
        Ok(self.state.lock().chain.event_count())
    }
}

struct FileState {
    chain: LedgerChain,
    file: File,
    /// Set after a failed write; the tail of the file is then unknown.
    poisoned: bool,
}

/// JSON-lines ledger file, one event per line
pub struct FileLedger {
    path: PathBuf,
    state: Mutex<FileState>,
}

impl FileLedger {
    /// Open (or create) a ledger file.
    ///
    /// An existing file is read and its chain verified. A corrupt record or
    /// broken link is an error: appending to a broken chain would hide it.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let chain = if tokio::fs::try_exists(&path).await? {
            let events = read_events(&path).await?;
            let verification = ChainVerifier::verify_chain(&events)?;
            if !verification.valid {
                let index = verification.first_invalid_index.unwrap_or(0);
                let reason = verification.error_message.unwrap_or_default();
                error!(path = %path.display(), index, %reason, "Ledger chain broken on open");
                return Err(LedgerError::BrokenChain { index, reason });
            }
            let head = events.last().map(|e| e.entry_hash.clone());
            LedgerChain::from_state(head, events.len() as u64)
        } else {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
            LedgerChain::new()
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        info!(
            path = %path.display(),
            events = chain.event_count(),
            "Ledger opened"
        );

        Ok(Self {
            path,
            state: Mutex::new(FileState {
                chain,
                file,
                poisoned: false,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl LedgerSink for FileLedger {
    async fn append(&self, partial: PartialLedgerEvent) -> Result<LedgerEvent> {
        let mut state = self.state.lock().await;
        if state.poisoned {
            return Err(LedgerError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "ledger is unwritable after an earlier failed append",
            )));
        }

        let event = partial.finalize(state.chain.previous_hash())?;
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');

        let written = async {
            state.file.write_all(&line).await?;
            state.file.flush().await?;
            state.file.sync_data().await
        }
        .await;

        if let Err(e) = written {
            state.poisoned = true;
            error!(path = %self.path.display(), error = %e, "Ledger append failed");
            return Err(LedgerError::Io(e));
        }

        state.chain.update(&event);
        debug!(kind = %event.kind, hash = %event.entry_hash, "Ledger event appended");
        Ok(event)
    }

    async fn read_all(&self) -> Result<Vec<LedgerEvent>> {
        // Hold the writer lock so a concurrent append is never half-read.
        let _state = self.state.lock().await;
        read_events(&self.path).await
    }

    async fn event_count(&self) -> Result<u64> {
        Ok(self.state.lock().await.chain.event_count())
    }
}

/// Read every event from a ledger file without verifying it.
pub async fn read_events(path: &Path) -> Result<Vec<LedgerEvent>> {
    let file = File::open(path).await?;
    let mut lines = BufReader::new(file).lines();
    let mut events = Vec::new();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let event: LedgerEvent = serde_json::from_str(&line).map_err(|e| LedgerError::Corrupt {
            line: line_no,
            reason: e.to_string(),
        })?;
        events.push(event);
    }

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Actor, EventKind, Severity};
    use std::sync::Arc;

    fn partial(i: usize) -> PartialLedgerEvent {
        LedgerEvent::builder()
            .session("test")
            .kind(EventKind::Cycle)
            .severity(Severity::Info)
            .actor(Actor::system("scheduler"))
            .detail("sequence", i)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_memory_ledger() {
        let ledger = MemoryLedger::new();
        let first = ledger.append(partial(1)).await.unwrap();
        let second = ledger.append(partial(2)).await.unwrap();

        assert_eq!(ledger.event_count().await.unwrap(), 2);
        assert_eq!(second.previous_hash, Some(first.entry_hash));
    }

    #[tokio::test]
    async fn test_memory_ledger_failure_injection() {
        let ledger = MemoryLedger::new();
        ledger.set_failing(true);
        assert!(ledger.append(partial(1)).await.is_err());
        assert_eq!(ledger.event_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_file_ledger_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit_log.jsonl");

        let ledger = FileLedger::open(&path).await.unwrap();
        for i in 0..3 {
            ledger.append(partial(i)).await.unwrap();
        }

        let events = ledger.read_all().await.unwrap();
        assert_eq!(events.len(), 3);
        assert!(ChainVerifier::verify_chain(&events).unwrap().valid);
    }

    #[tokio::test]
    async fn test_file_ledger_reopen_continues_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("audit_log.jsonl");

        {
            let ledger = FileLedger::open(&path).await.unwrap();
            ledger.append(partial(1)).await.unwrap();
            ledger.append(partial(2)).await.unwrap();
        }

        let ledger = FileLedger::open(&path).await.unwrap();
        assert_eq!(ledger.event_count().await.unwrap(), 2);
        ledger.append(partial(3)).await.unwrap();

        let events = ledger.read_all().await.unwrap();
        assert_eq!(events.len(), 3);
        assert!(ChainVerifier::verify_chain(&events).unwrap().valid);
    }

    #[tokio::test]
    async fn test_concurrent_appends_keep_chain_linear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit_log.jsonl");
        let ledger = Arc::new(FileLedger::open(&path).await.unwrap());

        let mut handles = Vec::new();
        for i in 0..32 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move { ledger.append(partial(i)).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let events = read_events(&path).await.unwrap();
        assert_eq!(events.len(), 32);
        assert!(ChainVerifier::verify_chain(&events).unwrap().valid);
    }

    #[tokio::test]
    async fn test_open_rejects_tampered_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit_log.jsonl");
        {
            let ledger = FileLedger::open(&path).await.unwrap();
            ledger.append(partial(1)).await.unwrap();
            ledger.append(partial(2)).await.unwrap();
        }

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let tampered = contents.replacen("\"sequence\":1", "\"sequence\":7", 1);
        assert_ne!(contents, tampered);
        tokio::fs::write(&path, tampered).await.unwrap();

        let err = FileLedger::open(&path).await.err().unwrap();
        assert!(matches!(err, LedgerError::BrokenChain { index: 0, .. }));
    }

    #[tokio::test]
    async fn test_open_rejects_truncated_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit_log.jsonl");
        tokio::fs::write(&path, "{\"id\":\"not-finished").await.unwrap();

        let err = FileLedger::open(&path).await.err().unwrap();
        assert!(matches!(err, LedgerError::Corrupt { line: 1, .. }));
    }
}
