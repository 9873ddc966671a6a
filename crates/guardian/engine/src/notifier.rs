//! Change notifiers
//!
//! Notifications are opaque hints that something under the watched
//! directory changed. They may arrive duplicated or out of order; the
//! scheduler only uses them to decide when to start a cycle.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, trace, warn};

/// Prefix office suites use for lock files
const LOCK_FILE_PREFIX: &str = "~$";

/// Something changed at `path`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotification {
    pub path: PathBuf,
    pub observed_at: DateTime<Utc>,
    pub is_dir: bool,
}

impl ChangeNotification {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            observed_at: Utc::now(),
            is_dir: false,
        }
    }
}

/// Source of change notifications
#[async_trait]
pub trait ChangeNotifier: Send {
    /// Wait for the next notification. `None` once the notifier is closed.
    ///
    /// Must be cancel safe: the scheduler polls it inside `select!`.
    async fn next(&mut self) -> Option<ChangeNotification>;
}

/// Notifier fed through a channel, for tests and embedding
pub struct ChannelNotifier {
    rx: mpsc::Receiver<ChangeNotification>,
}

impl ChannelNotifier {
    pub fn new(capacity: usize) -> (mpsc::Sender<ChangeNotification>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self { rx })
    }
}

#[async_trait]
impl ChangeNotifier for ChannelNotifier {
    async fn next(&mut self) -> Option<ChangeNotification> {
        self.rx.recv().await
    }
}

type FileStamp = (Option<SystemTime>, u64);

/// Polls a directory's entries for modification time or size changes
pub struct PollingNotifier {
    dir: PathBuf,
    interval: Interval,
    known: HashMap<PathBuf, FileStamp>,
    primed: bool,
    pending: VecDeque<ChangeNotification>,
}

impl PollingNotifier {
    /// Watch the directory that contains `target`.
    pub fn new(target: &Path, poll_interval: Duration) -> Self {
        let dir = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            dir,
            interval,
            known: HashMap::new(),
            primed: false,
            pending: VecDeque::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn scan(&self) -> std::io::Result<HashMap<PathBuf, FileStamp>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut seen = HashMap::new();
        while let Some(entry) = entries.next_entry().await? {
            let Ok(metadata) = entry.metadata().await else {
                // Removed between listing and stat.
                continue;
            };
            if metadata.is_dir() {
                continue;
            }
            seen.insert(entry.path(), (metadata.modified().ok(), metadata.len()));
        }
        Ok(seen)
    }

    fn diff(&self, seen: &HashMap<PathBuf, FileStamp>) -> Vec<PathBuf> {
        let mut changed: Vec<PathBuf> = seen
            .iter()
            .filter(|(path, stamp)| self.known.get(*path) != Some(*stamp))
            .map(|(path, _)| path.clone())
            .collect();
        changed.extend(
            self.known
                .keys()
                .filter(|path| !seen.contains_key(*path))
                .cloned(),
        );
        changed.sort();
        changed
    }
}

#[async_trait]
impl ChangeNotifier for PollingNotifier {
    async fn next(&mut self) -> Option<ChangeNotification> {
        loop {
            if let Some(notification) = self.pending.pop_front() {
                return Some(notification);
            }

            self.interval.tick().await;
            let seen = match self.scan().await {
                Ok(seen) => seen,
                Err(e) => {
                    warn!(dir = %self.dir.display(), error = %e, "Directory poll failed");
                    continue;
                }
            };

            // No awaits past this point: state only changes once a scan is complete.
            if self.primed {
                let observed_at = Utc::now();
                for path in self.diff(&seen) {
                    trace!(path = %path.display(), "Change observed");
                    self.pending.push_back(ChangeNotification {
                        path,
                        observed_at,
                        is_dir: false,
                    });
                }
            } else {
                debug!(dir = %self.dir.display(), files = seen.len(), "Polling notifier primed");
                self.primed = true;
            }
            self.known = seen;
        }
    }
}

/// Decides which notifications may start a cycle
#[derive(Debug, Clone)]
pub struct ChangeFilter {
    target: PathBuf,
    ignored: Vec<PathBuf>,
}

impl ChangeFilter {
    pub fn new(target: &Path) -> Self {
        Self {
            target: normalize(target),
            ignored: Vec::new(),
        }
    }

    /// Never react to writes at `path`, e.g. the engine's own ledger.
    pub fn ignore(mut self, path: &Path) -> Self {
        self.ignored.push(normalize(path));
        self
    }

    pub fn accepts(&self, notification: &ChangeNotification) -> bool {
        if notification.is_dir {
            return false;
        }
        let is_lock_file = notification
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .map_or(false, |name| name.starts_with(LOCK_FILE_PREFIX));
        if is_lock_file {
            return false;
        }
        let path = normalize(&notification.path);
        !self.ignored.contains(&path) && path == self.target
    }
}

/// Drop `.` components so `./dir/file` and `dir/file` compare equal.
fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_accepts_only_target() {
        let filter = ChangeFilter::new(Path::new("./project/model.json"))
            .ignore(Path::new("project/audit_log.jsonl"));

        assert!(filter.accepts(&ChangeNotification::file("project/model.json")));
        assert!(!filter.accepts(&ChangeNotification::file("./project/audit_log.jsonl")));
        assert!(!filter.accepts(&ChangeNotification::file("project/~$model.json")));
        assert!(!filter.accepts(&ChangeNotification::file("project/other.json")));

        let mut dir = ChangeNotification::file("project/model.json");
        dir.is_dir = true;
        assert!(!filter.accepts(&dir));
    }

    #[test]
    fn test_ledger_is_ignored_even_if_it_is_the_target() {
        let filter = ChangeFilter::new(Path::new("audit_log.jsonl")).ignore(Path::new("audit_log.jsonl"));
        assert!(!filter.accepts(&ChangeNotification::file("audit_log.jsonl")));
    }

    #[tokio::test]
    async fn test_channel_notifier() {
        let (tx, mut notifier) = ChannelNotifier::new(4);
        tx.send(ChangeNotification::file("model.json")).await.unwrap();
        drop(tx);
        assert_eq!(notifier.next().await.unwrap().path, PathBuf::from("model.json"));
        assert!(notifier.next().await.is_none());
    }

    #[tokio::test]
    async fn test_polling_notifier_reports_changes() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("model.json");
        tokio::fs::write(&target, "{}").await.unwrap();

        let mut notifier = PollingNotifier::new(&target, Duration::from_millis(20));

        let writer = {
            let target = target.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                tokio::fs::write(&target, "{\"sheets\": {}}").await.unwrap();
            })
        };

        let notification = tokio::time::timeout(Duration::from_secs(5), notifier.next())
            .await
            .unwrap()
            .unwrap();
        writer.await.unwrap();
        assert_eq!(notification.path, target);
    }
}
