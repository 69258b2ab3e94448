//! Filesystem watching, debouncing, and dispatch onto the work queue.
//!
//! The notify debouncer coalesces raw events over a short window; the
//! dispatcher then defers each surviving path until its size is stable,
//! coalesces repeat events for in-flight paths, honors pause buffering,
//! and applies backpressure through the bounded work queue.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebouncedEvent, Debouncer, RecommendedCache};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::PausePolicy;
use crate::engine::EngineState;
use crate::error::EngineError;

/// A unit of pending classification+move work for one detected file.
/// Consumed exactly once by a single worker.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub id: Uuid,
    pub path: PathBuf,
    pub extension: Option<String>,
    pub enqueued_at: DateTime<Utc>,
}

impl WorkItem {
    pub(crate) fn new(path: PathBuf) -> Self {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase());
        Self {
            id: Uuid::new_v4(),
            path,
            extension,
            enqueued_at: Utc::now(),
        }
    }
}

/// Start watching `folder` (non-recursive), feeding surviving paths into
/// `raw_tx`. The returned debouncer must be kept alive for as long as the
/// watch should run.
pub(crate) fn start_watch(
    folder: &Path,
    debounce: Duration,
    raw_tx: mpsc::Sender<PathBuf>,
) -> Result<Debouncer<RecommendedWatcher, RecommendedCache>, EngineError> {
    let watched = folder.to_path_buf();

    let mut debouncer = new_debouncer(
        debounce,
        None,
        move |result: Result<Vec<DebouncedEvent>, Vec<notify::Error>>| match result {
            Ok(events) => {
                for event in events {
                    handle_debounced_event(&event, &watched, &raw_tx);
                }
            }
            Err(errors) => {
                for error in errors {
                    warn!(?error, "watcher error");
                }
            }
        },
    )
    .map_err(|e| EngineError::Watcher(format!("failed to create watcher: {e}")))?;

    debouncer
        .watch(folder, RecursiveMode::NonRecursive)
        .map_err(|e| EngineError::Watcher(format!("failed to watch {}: {e}", folder.display())))?;

    Ok(debouncer)
}

/// Filter one debounced event down to admissible file paths and push them
/// onto the raw channel. Runs on the debouncer's thread; a full channel
/// blocks here (backpressure) rather than dropping the event.
fn handle_debounced_event(event: &DebouncedEvent, watched_folder: &Path, raw_tx: &mpsc::Sender<PathBuf>) {
    // New arrivals show up as creations, or as renames into the folder.
    let is_arrival = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To))
    );
    if !is_arrival {
        return;
    }

    for path in &event.paths {
        if path.is_dir() || path.is_symlink() {
            continue;
        }

        // Paths outside the watched folder (symlink escapes, stale events)
        // are never admitted.
        match (path.canonicalize(), watched_folder.canonicalize()) {
            (Ok(canonical_path), Ok(canonical_watched)) => {
                if !canonical_path.starts_with(&canonical_watched) {
                    warn!(path = %path.display(), "skipping file outside watched folder");
                    continue;
                }
            }
            _ => continue,
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if should_ignore(&file_name) {
            continue;
        }

        if raw_tx.blocking_send(path.clone()).is_err() {
            return;
        }
    }
}

/// Hidden files, temp files, and partial downloads are never candidates.
pub(crate) fn should_ignore(file_name: &str) -> bool {
    file_name.is_empty()
        || file_name.starts_with('.')
        || file_name.ends_with(".tmp")
        || file_name.ends_with(".crdownload")
        || file_name.ends_with(".part")
        || file_name.ends_with(".download")
}

/// Wait until the file's size is stable across two consecutive
/// observations, so files still being written are not admitted. Returns
/// `false` if the file vanished or never settled within the allowed attempts.
pub(crate) async fn wait_for_stable(path: &Path, interval: Duration, attempts: u32) -> bool {
    let mut last_size: Option<u64> = None;

    for _ in 0..attempts {
        let Ok(metadata) = tokio::fs::metadata(path).await else {
            return false;
        };
        let size = metadata.len();
        if size > 0 && last_size == Some(size) {
            return true;
        }
        last_size = Some(size);
        tokio::time::sleep(interval).await;
    }

    debug!(path = %path.display(), "file never settled");
    false
}

/// Admits raw paths as WorkItems: pause buffering, per-path coalescing,
/// settle deferral, bounded enqueue.
pub(crate) struct Dispatcher {
    pub(crate) raw_rx: mpsc::Receiver<PathBuf>,
    pub(crate) work_tx: mpsc::Sender<WorkItem>,
    pub(crate) state_rx: watch::Receiver<EngineState>,
    pub(crate) shutdown_rx: watch::Receiver<bool>,
    /// path -> dirty flag; present while a path has a pending or running
    /// WorkItem. A repeat event sets the flag instead of spawning a second
    /// concurrent item for the same file.
    pub(crate) in_flight: Arc<DashMap<PathBuf, bool>>,
    pub(crate) pause_policy: PausePolicy,
    pub(crate) settle_interval: Duration,
    pub(crate) settle_attempts: u32,
}

impl Dispatcher {
    pub(crate) async fn run(mut self) {
        let mut buffered: VecDeque<PathBuf> = VecDeque::new();

        loop {
            tokio::select! {
                maybe_path = self.raw_rx.recv() => {
                    let Some(path) = maybe_path else { break };
                    match *self.state_rx.borrow() {
                        EngineState::Paused => match self.pause_policy {
                            PausePolicy::Buffer => {
                                debug!(path = %path.display(), "buffering event while paused");
                                buffered.push_back(path);
                            }
                            PausePolicy::Drop => {
                                debug!(path = %path.display(), "dropping event while paused");
                            }
                        },
                        EngineState::Stopped => break,
                        _ => self.admit(path),
                    }
                }
                changed = self.state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *self.state_rx.borrow();
                    if state == EngineState::Watching {
                        while let Some(path) = buffered.pop_front() {
                            self.admit(path);
                        }
                    }
                }
                _ = self.shutdown_rx.changed() => break,
            }
        }

        debug!("dispatcher stopped");
    }

    /// Mark the path in-flight and defer admission until it settles.
    fn admit(&self, path: PathBuf) {
        use dashmap::mapref::entry::Entry;

        match self.in_flight.entry(path.clone()) {
            Entry::Occupied(mut entry) => {
                // A WorkItem for this path is already pending; coalesce.
                debug!(path = %path.display(), "coalescing repeat event");
                *entry.get_mut() = true;
                return;
            }
            Entry::Vacant(entry) => {
                entry.insert(false);
            }
        }

        let work_tx = self.work_tx.clone();
        let in_flight = Arc::clone(&self.in_flight);
        let interval = self.settle_interval;
        let attempts = self.settle_attempts;

        tokio::spawn(async move {
            if !wait_for_stable(&path, interval, attempts).await {
                in_flight.remove(&path);
                return;
            }
            let item = WorkItem::new(path.clone());
            debug!(id = %item.id, path = %path.display(), "work item admitted");
            if work_tx.send(item).await.is_err() {
                in_flight.remove(&path);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_ignored_names() {
        assert!(should_ignore(".DS_Store"));
        assert!(should_ignore("download.crdownload"));
        assert!(should_ignore("video.part"));
        assert!(should_ignore("setup.tmp"));
        assert!(should_ignore("pending.download"));
        assert!(should_ignore(""));
        assert!(!should_ignore("invoice.pdf"));
        assert!(!should_ignore("재무보고.hwp"));
    }

    #[test]
    fn test_work_item_fields() {
        let item = WorkItem::new(PathBuf::from("/watch/Invoice.PDF"));
        assert_eq!(item.extension.as_deref(), Some("pdf"));
        assert_eq!(item.path, PathBuf::from("/watch/Invoice.PDF"));
    }

    #[tokio::test]
    async fn test_stable_file_settles() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("done.txt");
        fs::write(&path, b"fully written").unwrap();

        assert!(wait_for_stable(&path, Duration::from_millis(10), 5).await);
    }

    #[tokio::test]
    async fn test_missing_file_never_settles() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone.txt");

        assert!(!wait_for_stable(&path, Duration::from_millis(10), 3).await);
    }

    #[tokio::test]
    async fn test_empty_file_never_settles() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.txt");
        fs::write(&path, b"").unwrap();

        assert!(!wait_for_stable(&path, Duration::from_millis(10), 3).await);
    }
}
