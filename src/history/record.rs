//! Ledger entry types for completed relocations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal outcome of processing one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveOutcome {
    Success,
    Warning,
    Error,
}

/// One completed relocation. Immutable after creation; owned by the
/// history store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveRecord {
    /// Monotonic record id assigned by the store.
    pub id: u64,
    pub source_path: String,
    pub destination_path: String,
    /// Folder name actually used (post-sanitization).
    pub folder_name: String,
    pub moved_at: DateTime<Utc>,
    pub outcome: MoveOutcome,
    /// Whether the destination directory was created for this move.
    pub created_folder: bool,
    /// Whether duplicate resolution altered the file name.
    pub renamed: bool,
}

/// Record fields supplied by the mover; the store assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct MoveDraft {
    pub source_path: String,
    pub destination_path: String,
    pub folder_name: String,
    pub created_folder: bool,
    pub renamed: bool,
}
