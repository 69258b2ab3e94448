//! Engine controller: lifecycle, worker pool, statistics, observer fan-out.
//!
//! The controller wires the watcher, cache, mover, and history store
//! together and is the only entry point outer layers use. It performs no
//! classification or move logic itself.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use notify::RecommendedWatcher;
use notify_debouncer_full::{Debouncer, RecommendedCache};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::cache::ClassificationCache;
use crate::classify::{fallback_result, ClassificationResult, ClassificationStatus, Classifier};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::extract::{describe, ExtractLimits};
use crate::fingerprint::fingerprint_file;
use crate::history::{HistoryStore, MoveOutcome, MoveRecord};
use crate::mover::{MoveReport, Mover};
use crate::watcher::{self, Dispatcher, WorkItem};

/// Engine lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Idle,
    Watching,
    Paused,
    Stopped,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EngineState::Idle => "idle",
            EngineState::Watching => "watching",
            EngineState::Paused => "paused",
            EngineState::Stopped => "stopped",
        };
        write!(f, "{name}")
    }
}

/// Aggregate statistics snapshot. Reads are never torn: the snapshot is
/// assembled under the stats lock.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub state: EngineState,
    pub total_processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Files per minute since watching started.
    pub files_per_minute: f64,
    /// Successful moves per folder name.
    pub categories: HashMap<String, u64>,
}

/// Asynchronous notifications delivered to observers, in order, over a
/// dedicated channel per observer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    FileProcessed {
        path: String,
        folder_name: String,
        outcome: MoveOutcome,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    StateChanged {
        state: EngineState,
    },
    Stats {
        status: EngineStatus,
    },
}

#[derive(Debug, Default)]
struct StatsInner {
    started_at: Option<Instant>,
    total_processed: u64,
    succeeded: u64,
    failed: u64,
    categories: HashMap<String, u64>,
}

type Observers = Arc<Mutex<Vec<mpsc::UnboundedSender<EngineEvent>>>>;

/// Everything a worker needs to process one item.
struct WorkerContext {
    classifier: Arc<dyn Classifier>,
    cache: Arc<ClassificationCache>,
    mover: Arc<Mover>,
    stats: Arc<RwLock<StatsInner>>,
    observers: Observers,
    in_flight: Arc<DashMap<PathBuf, bool>>,
    raw_tx: mpsc::Sender<PathBuf>,
    fingerprint_limit: u64,
    extract_limits: ExtractLimits,
}

/// Handles owned by a started engine.
struct Running {
    debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
    raw_tx: mpsc::Sender<PathBuf>,
    dispatcher: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
    stats_task: JoinHandle<()>,
}

/// The file-organization engine.
pub struct Engine {
    config: EngineConfig,
    classifier: Arc<dyn Classifier>,
    cache: Arc<ClassificationCache>,
    history: Arc<HistoryStore>,
    state_tx: watch::Sender<EngineState>,
    shutdown_tx: watch::Sender<bool>,
    stats: Arc<RwLock<StatsInner>>,
    observers: Observers,
    in_flight: Arc<DashMap<PathBuf, bool>>,
    running: Mutex<Option<Running>>,
}

impl Engine {
    /// Build an engine. Configuration problems are fatal here: an engine
    /// with an invalid configuration is never constructed.
    pub fn new(config: EngineConfig, classifier: Arc<dyn Classifier>) -> Result<Self, EngineError> {
        config.validate()?;

        fs::create_dir_all(&config.state_dir).map_err(|e| {
            EngineError::Configuration(format!(
                "cannot create state dir {}: {e}",
                config.state_dir.display()
            ))
        })?;

        let cache = Arc::new(ClassificationCache::open(
            &config.state_dir.join("classifications.db"),
        )?);
        let history = Arc::new(HistoryStore::open(config.state_dir.join("ledger.json"))?);

        let (state_tx, _) = watch::channel(EngineState::Idle);
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            classifier,
            cache,
            history,
            state_tx,
            shutdown_tx,
            stats: Arc::new(RwLock::new(StatsInner::default())),
            observers: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(DashMap::new()),
            running: Mutex::new(None),
        })
    }

    /// Register an observer. Events arrive in order on the returned
    /// channel; a dropped receiver is pruned on the next notification.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<EngineEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock_observers().push(tx);
        rx
    }

    pub fn state(&self) -> EngineState {
        *self.state_tx.borrow()
    }

    /// Begin watching `folder`. Fails unless the engine is Idle and the
    /// folder is an existing, readable directory.
    pub async fn start(&self, folder: &Path) -> Result<(), EngineError> {
        let current = self.state();
        if current != EngineState::Idle {
            return Err(EngineError::Lifecycle(format!(
                "start requires an idle engine, engine is {current}"
            )));
        }

        let metadata = fs::metadata(folder).map_err(|e| {
            EngineError::Validation(format!("watch folder {}: {e}", folder.display()))
        })?;
        if !metadata.is_dir() {
            return Err(EngineError::Validation(format!(
                "watch folder is not a directory: {}",
                folder.display()
            )));
        }
        fs::read_dir(folder).map_err(|e| {
            EngineError::Validation(format!("watch folder unreadable {}: {e}", folder.display()))
        })?;
        let folder = folder
            .canonicalize()
            .map_err(|e| EngineError::Validation(format!("resolving {}: {e}", folder.display())))?;

        let (raw_tx, raw_rx) = mpsc::channel::<PathBuf>(self.config.queue_capacity);
        let (work_tx, work_rx) = mpsc::channel::<WorkItem>(self.config.queue_capacity);

        let debouncer = watcher::start_watch(&folder, self.config.debounce_window, raw_tx.clone())?;

        let dispatcher = Dispatcher {
            raw_rx,
            work_tx,
            state_rx: self.state_tx.subscribe(),
            shutdown_rx: self.shutdown_tx.subscribe(),
            in_flight: Arc::clone(&self.in_flight),
            pause_policy: self.config.pause_policy,
            settle_interval: self.config.settle_interval,
            settle_attempts: self.config.settle_attempts,
        };
        let dispatcher_handle = tokio::spawn(dispatcher.run());

        let mover = Arc::new(Mover::new(
            folder.clone(),
            self.config.duplicate_strategy,
            self.config.denylist.clone(),
            Arc::clone(&self.history),
        ));

        let context = Arc::new(WorkerContext {
            classifier: Arc::clone(&self.classifier),
            cache: Arc::clone(&self.cache),
            mover,
            stats: Arc::clone(&self.stats),
            observers: Arc::clone(&self.observers),
            in_flight: Arc::clone(&self.in_flight),
            raw_tx: raw_tx.clone(),
            fingerprint_limit: self.config.fingerprint_limit,
            extract_limits: ExtractLimits {
                preview_bytes: self.config.preview_limit,
                max_image_bytes: self.config.max_image_bytes,
            },
        });

        let work_rx = Arc::new(tokio::sync::Mutex::new(work_rx));
        let workers = (0..self.config.worker_count)
            .map(|index| {
                tokio::spawn(worker_loop(
                    index,
                    Arc::clone(&work_rx),
                    self.shutdown_tx.subscribe(),
                    Arc::clone(&context),
                ))
            })
            .collect();

        let stats_task = tokio::spawn(stats_loop(
            self.config.stats_interval,
            Arc::clone(&self.stats),
            Arc::clone(&self.observers),
            self.state_tx.subscribe(),
            self.shutdown_tx.subscribe(),
        ));

        {
            let mut stats = self.lock_stats_mut();
            stats.started_at = Some(Instant::now());
        }
        *self.lock_running() = Some(Running {
            debouncer,
            raw_tx: raw_tx.clone(),
            dispatcher: dispatcher_handle,
            workers,
            stats_task,
        });

        self.set_state(EngineState::Watching);
        info!(folder = %folder.display(), "watching started");

        // Files already sitting in the folder go through the same
        // admission pipeline as new arrivals.
        if self.config.scan_existing {
            for entry in WalkDir::new(&folder).min_depth(1).max_depth(1) {
                let Ok(entry) = entry else { continue };
                if !entry.file_type().is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().to_string();
                if watcher::should_ignore(&name) {
                    continue;
                }
                if raw_tx.send(entry.into_path()).await.is_err() {
                    break;
                }
            }
        }

        Ok(())
    }

    /// Stop dispatching new work. Events are still observed and, under the
    /// default buffering policy, admitted once resumed. No-op if already
    /// paused.
    pub fn pause(&self) -> Result<(), EngineError> {
        match self.state() {
            EngineState::Watching => {
                self.set_state(EngineState::Paused);
                info!("watching paused");
                Ok(())
            }
            EngineState::Paused => Ok(()),
            other => Err(EngineError::Lifecycle(format!(
                "pause requires a watching engine, engine is {other}"
            ))),
        }
    }

    /// Resume dispatching after a pause. No-op when already watching.
    pub fn resume(&self) -> Result<(), EngineError> {
        match self.state() {
            EngineState::Paused => {
                self.set_state(EngineState::Watching);
                info!("watching resumed");
                Ok(())
            }
            EngineState::Watching => Ok(()),
            other => Err(EngineError::Lifecycle(format!(
                "resume requires a paused engine, engine is {other}"
            ))),
        }
    }

    /// Stop the engine, draining in-flight work first: the watcher is torn
    /// down, queued items resolve (with warning outcomes once the shutdown
    /// flag is visible), in-flight moves run to completion, and only then
    /// does the state become Stopped.
    pub async fn stop(&self) -> Result<(), EngineError> {
        if self.state() == EngineState::Stopped {
            return Ok(());
        }

        let running = self.lock_running().take();
        let _ = self.shutdown_tx.send(true);

        if let Some(running) = running {
            // Dropping the debouncer stops event delivery; dropping our
            // raw sender lets the channel close once workers are done.
            drop(running.debouncer);
            drop(running.raw_tx);

            let _ = running.dispatcher.await;
            futures::future::join_all(running.workers).await;

            running.stats_task.abort();
            let _ = running.stats_task.await;
        }

        self.set_state(EngineState::Stopped);
        info!("engine stopped");
        Ok(())
    }

    /// Undo the most recent move. `Ok(None)` when there is nothing to undo.
    pub fn undo(&self) -> Result<Option<MoveRecord>, EngineError> {
        self.history.undo()
    }

    /// Redo the most recently undone move. `Ok(None)` when there is
    /// nothing to redo.
    pub fn redo(&self) -> Result<Option<MoveRecord>, EngineError> {
        self.history.redo()
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    /// Completed moves, oldest first.
    pub fn records(&self) -> Vec<MoveRecord> {
        self.history.records()
    }

    /// Current statistics snapshot.
    pub fn status(&self) -> EngineStatus {
        let stats = self.stats.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        snapshot(&stats, self.state())
    }

    fn set_state(&self, state: EngineState) {
        self.state_tx.send_replace(state);
        notify_observers(&self.observers, EngineEvent::StateChanged { state });
    }

    fn lock_observers(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<EngineEvent>>> {
        self.observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_running(&self) -> std::sync::MutexGuard<'_, Option<Running>> {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_stats_mut(&self) -> std::sync::RwLockWriteGuard<'_, StatsInner> {
        self.stats
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn snapshot(stats: &StatsInner, state: EngineState) -> EngineStatus {
    let files_per_minute = match stats.started_at {
        Some(started_at) => {
            let minutes = started_at.elapsed().as_secs_f64() / 60.0;
            if minutes > 0.0 {
                stats.total_processed as f64 / minutes
            } else {
                0.0
            }
        }
        None => 0.0,
    };

    EngineStatus {
        state,
        total_processed: stats.total_processed,
        succeeded: stats.succeeded,
        failed: stats.failed,
        files_per_minute,
        categories: stats.categories.clone(),
    }
}

fn notify_observers(observers: &Observers, event: EngineEvent) {
    let mut list = observers
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    list.retain(|tx| tx.send(event.clone()).is_ok());
}

async fn worker_loop(
    index: usize,
    work_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<WorkItem>>>,
    mut shutdown_rx: watch::Receiver<bool>,
    context: Arc<WorkerContext>,
) {
    debug!(worker = index, "worker started");

    loop {
        let item = {
            let mut rx = work_rx.lock().await;
            rx.recv().await
        };
        let Some(item) = item else { break };

        let report = if *shutdown_rx.borrow() {
            aborted_report(&item.path)
        } else {
            run_pipeline(&context, &mut shutdown_rx, &item).await
        };

        complete_item(&context, item, report).await;
    }

    debug!(worker = index, "worker stopped");
}

/// Fingerprint, classify (cache-first), and move one file. Every path out
/// of here is a report; failures never escape as errors.
async fn run_pipeline(
    context: &Arc<WorkerContext>,
    shutdown_rx: &mut watch::Receiver<bool>,
    item: &WorkItem,
) -> MoveReport {
    let path = item.path.clone();

    if !path.exists() {
        return MoveReport {
            outcome: MoveOutcome::Warning,
            source_path: path,
            destination_path: None,
            folder_name: String::new(),
            created_folder: false,
            renamed: false,
            detail: Some("source disappeared before processing".to_string()),
            record_id: None,
        };
    }

    let fingerprint = {
        let path = path.clone();
        let limit = context.fingerprint_limit;
        match tokio::task::spawn_blocking(move || fingerprint_file(&path, limit)).await {
            Ok(Ok(fingerprint)) => fingerprint,
            Ok(Err(err)) => return error_report(&item.path, &err),
            Err(err) => return join_failure(&item.path, err),
        }
    };

    let descriptor = {
        let path = path.clone();
        let limits = context.extract_limits;
        match tokio::task::spawn_blocking(move || describe(&path, limits)).await {
            Ok(Ok(descriptor)) => descriptor,
            Ok(Err(err)) => return error_report(&item.path, &err),
            Err(err) => return join_failure(&item.path, err),
        }
    };

    let classification = match context.cache.lookup(&fingerprint.hash) {
        Ok(Some(cached)) => {
            debug!(
                fingerprint = %fingerprint.hash,
                file = %descriptor.file_name,
                "classification cache hit"
            );
            cached
        }
        lookup => {
            if let Err(err) = lookup {
                warn!(%err, "cache lookup failed, consulting the classifier");
            }

            // The classifier call is the shutdown checkpoint: an in-flight
            // request is abandoned, but a move already underway never is.
            let oracle = tokio::select! {
                result = context.classifier.classify(&fingerprint.hash, &descriptor) => result,
                _ = shutdown_rx.changed() => return aborted_report(&item.path),
            };

            resolve_classification(context, &fingerprint.hash, &descriptor.file_name, item, oracle)
        }
    };

    let mover = Arc::clone(&context.mover);
    let move_path = path.clone();
    let folder = classification.folder_name.clone();
    let category = classification.category.clone();
    match tokio::task::spawn_blocking(move || mover.move_file(&move_path, &folder, &category)).await
    {
        Ok(report) => report,
        Err(err) => join_failure(&item.path, err),
    }
}

/// Turn the oracle's answer into a usable classification, recovering from
/// every failure with the deterministic extension fallback.
fn resolve_classification(
    context: &Arc<WorkerContext>,
    fingerprint: &str,
    file_name: &str,
    item: &WorkItem,
    oracle: Result<ClassificationResult, crate::classify::ClassifyError>,
) -> ClassificationResult {
    match oracle {
        Ok(result) if result.status == ClassificationStatus::Success => {
            match context.cache.store(fingerprint, &result) {
                Ok(true) => warn!(
                    fingerprint,
                    folder = %result.folder_name,
                    "cache entry overwritten with a differing result"
                ),
                Ok(false) => {}
                Err(err) => warn!(%err, "failed to cache classification"),
            }
            result
        }
        Ok(result) => {
            let detail = result
                .error
                .unwrap_or_else(|| "classifier reported failure".to_string());
            warn!(file = file_name, %detail, "classifier failed, using extension fallback");
            fallback_result(file_name, item.extension.as_deref(), &detail)
        }
        Err(err) => {
            warn!(file = file_name, %err, "classifier failed, using extension fallback");
            fallback_result(file_name, item.extension.as_deref(), &err.to_string())
        }
    }
}

/// Record the outcome, notify observers, and release the in-flight slot.
/// A coalesced event for a still-existing source is re-admitted here.
async fn complete_item(context: &Arc<WorkerContext>, item: WorkItem, report: MoveReport) {
    {
        let mut stats = context
            .stats
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        stats.total_processed += 1;
        match report.outcome {
            MoveOutcome::Success => {
                stats.succeeded += 1;
                *stats
                    .categories
                    .entry(report.folder_name.clone())
                    .or_insert(0) += 1;
            }
            MoveOutcome::Warning => {}
            MoveOutcome::Error => stats.failed += 1,
        }
    }

    notify_observers(
        &context.observers,
        EngineEvent::FileProcessed {
            path: item.path.to_string_lossy().to_string(),
            folder_name: report.folder_name.clone(),
            outcome: report.outcome,
            detail: report.detail.clone(),
        },
    );

    let dirty = context
        .in_flight
        .remove(&item.path)
        .map(|(_, dirty)| dirty)
        .unwrap_or(false);
    if dirty && item.path.exists() {
        debug!(path = %item.path.display(), "re-admitting coalesced event");
        let _ = context.raw_tx.send(item.path).await;
    }
}

fn error_report(path: &Path, err: &EngineError) -> MoveReport {
    MoveReport {
        outcome: MoveOutcome::Error,
        source_path: path.to_path_buf(),
        destination_path: None,
        folder_name: String::new(),
        created_folder: false,
        renamed: false,
        detail: Some(err.to_string()),
        record_id: None,
    }
}

fn join_failure(path: &Path, err: tokio::task::JoinError) -> MoveReport {
    error_report(
        path,
        &EngineError::Io(std::io::Error::other(format!("worker task failed: {err}"))),
    )
}

fn aborted_report(path: &Path) -> MoveReport {
    MoveReport {
        outcome: MoveOutcome::Warning,
        source_path: path.to_path_buf(),
        destination_path: None,
        folder_name: String::new(),
        created_folder: false,
        renamed: false,
        detail: Some("engine stopping".to_string()),
        record_id: None,
    }
}

async fn stats_loop(
    interval: Duration,
    stats: Arc<RwLock<StatsInner>>,
    observers: Observers,
    state_rx: watch::Receiver<EngineState>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately; skip it so the initial snapshot
    // arrives one interval in.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let status = {
                    let stats = stats.read().unwrap_or_else(|poisoned| poisoned.into_inner());
                    snapshot(&stats, *state_rx.borrow())
                };
                notify_observers(&observers, EngineEvent::Stats { status });
            }
            _ = shutdown_rx.changed() => break,
        }
    }
}
