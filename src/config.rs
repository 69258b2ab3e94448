use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::resolve::DuplicateStrategy;

/// What to do with filesystem events observed while the engine is paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PausePolicy {
    /// Hold detected paths and admit them on resume (default).
    Buffer,
    /// Discard events observed while paused.
    Drop,
}

/// Engine configuration. Validated once at construction; a bad
/// configuration prevents the engine from being built at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Number of worker tasks pulling from the queue. Bounds concurrent
    /// classifier calls.
    pub worker_count: usize,
    /// Capacity of the bounded work queue; a full queue blocks the
    /// producer rather than dropping events.
    pub queue_capacity: usize,
    /// Collision policy at the destination, fixed per engine.
    pub duplicate_strategy: DuplicateStrategy,
    pub pause_policy: PausePolicy,
    /// Window over which filesystem events for a path are coalesced.
    pub debounce_window: Duration,
    /// Interval between size observations when waiting for a file to settle.
    pub settle_interval: Duration,
    /// Maximum size observations before giving up on a still-growing file.
    pub settle_attempts: u32,
    /// Files larger than this are fingerprinted over their first
    /// `fingerprint_limit` bytes only. Changing this value invalidates the
    /// classification cache as a whole; delete `classifications.db` when
    /// reconfiguring it.
    pub fingerprint_limit: u64,
    /// Bytes of text preview forwarded to the classifier. Must lie within
    /// the fingerprinted prefix.
    pub preview_limit: usize,
    /// Largest image forwarded to the vision path. Must lie within the
    /// fingerprinted prefix.
    pub max_image_bytes: u64,
    /// Process files already present in the folder when watching starts.
    pub scan_existing: bool,
    /// Interval between aggregate statistics notifications.
    pub stats_interval: Duration,
    /// Directory holding the classification cache and the move ledger.
    pub state_dir: PathBuf,
    /// Folder names the sanitizer refuses in addition to reserved device
    /// names, compared case-insensitively.
    pub denylist: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let state_dir = dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("filewarden");

        Self {
            worker_count: num_cpus::get().clamp(2, 4),
            queue_capacity: 64,
            duplicate_strategy: DuplicateStrategy::RenameWithNumber,
            pause_policy: PausePolicy::Buffer,
            debounce_window: Duration::from_millis(500),
            settle_interval: Duration::from_millis(200),
            settle_attempts: 10,
            fingerprint_limit: 4 * 1024 * 1024,
            preview_limit: 4096,
            max_image_bytes: 4 * 1024 * 1024,
            scan_existing: false,
            stats_interval: Duration::from_secs(30),
            state_dir,
            denylist: vec![
                "Documents".to_string(),
                "Desktop".to_string(),
                "Downloads".to_string(),
                "Pictures".to_string(),
                "Music".to_string(),
                "Videos".to_string(),
            ],
        }
    }
}

impl EngineConfig {
    /// Check the configuration for values the engine cannot run with.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.worker_count == 0 {
            return Err(EngineError::Configuration(
                "worker_count must be at least 1".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(EngineError::Configuration(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.settle_attempts < 2 {
            return Err(EngineError::Configuration(
                "settle_attempts must allow two size observations".to_string(),
            ));
        }
        if self.fingerprint_limit == 0 {
            return Err(EngineError::Configuration(
                "fingerprint_limit must be non-zero".to_string(),
            ));
        }
        // The classifier must only ever see content that contributed to the
        // fingerprint, or cache hits become semantically wrong.
        if self.preview_limit as u64 > self.fingerprint_limit {
            return Err(EngineError::Configuration(
                "preview_limit must not exceed fingerprint_limit".to_string(),
            ));
        }
        if self.max_image_bytes > self.fingerprint_limit {
            return Err(EngineError::Configuration(
                "max_image_bytes must not exceed fingerprint_limit".to_string(),
            ));
        }
        if self.stats_interval.is_zero() {
            return Err(EngineError::Configuration(
                "stats_interval must be non-zero".to_string(),
            ));
        }
        if self.denylist.iter().any(|name| name.trim().is_empty()) {
            return Err(EngineError::Configuration(
                "denylist entries must be non-empty".to_string(),
            ));
        }
        Ok(())
    }
}
