//! Append-only move ledger with undo/redo cursors.
//!
//! The store is the single mutation point for history: appends, undo, and
//! redo all serialize through one mutex, so record ids are strictly
//! monotonic and the two stacks never observe a partial interleaving.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::EngineError;
use crate::history::record::{MoveDraft, MoveOutcome, MoveRecord};
use crate::mover::relocate;

/// Schema version for forward compatibility
pub const LEDGER_SCHEMA_VERSION: u32 = 1;

/// On-disk ledger layout.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LedgerFile {
    version: u32,
    next_id: u64,
    /// Undo-capable records, most recent last.
    done: Vec<MoveRecord>,
    /// Redo-capable records, most recent last.
    undone: Vec<MoveRecord>,
}

#[derive(Debug)]
struct LedgerState {
    next_id: u64,
    done: Vec<MoveRecord>,
    undone: Vec<MoveRecord>,
}

/// Persistent ledger of completed moves.
pub struct HistoryStore {
    ledger_path: PathBuf,
    state: Mutex<LedgerState>,
}

impl HistoryStore {
    /// Open the ledger at `ledger_path`, loading persisted state if present.
    pub fn open(ledger_path: PathBuf) -> Result<Self, EngineError> {
        let state = if ledger_path.exists() {
            Self::load(&ledger_path)?
        } else {
            LedgerState {
                next_id: 1,
                done: Vec::new(),
                undone: Vec::new(),
            }
        };

        Ok(Self {
            ledger_path,
            state: Mutex::new(state),
        })
    }

    fn load(path: &Path) -> Result<LedgerState, EngineError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let ledger: LedgerFile = serde_json::from_reader(reader)?;

        // Reload as a prefix-consistent sequence: ids must be strictly
        // ascending. Anything after the first inconsistency is dropped.
        let done = longest_consistent_prefix(ledger.done);
        let mut undone = ledger.undone;
        if !is_strictly_ascending(&undone) {
            warn!("redo stack in ledger is inconsistent, discarding it");
            undone.clear();
        }

        let max_id = done
            .iter()
            .chain(undone.iter())
            .map(|r| r.id)
            .max()
            .unwrap_or(0);
        let next_id = ledger.next_id.max(max_id + 1);

        info!(
            path = %path.display(),
            done = done.len(),
            undone = undone.len(),
            "loaded move ledger"
        );

        Ok(LedgerState {
            next_id,
            done,
            undone,
        })
    }

    /// Append a completed move. Assigns the next record id, stamps the
    /// time, and clears the redo stack: a fresh action invalidates the
    /// redo branch.
    pub fn append(&self, draft: MoveDraft) -> Result<MoveRecord, EngineError> {
        let mut state = self.lock();

        let record = MoveRecord {
            id: state.next_id,
            source_path: draft.source_path,
            destination_path: draft.destination_path,
            folder_name: draft.folder_name,
            moved_at: Utc::now(),
            outcome: MoveOutcome::Success,
            created_folder: draft.created_folder,
            renamed: draft.renamed,
        };

        state.next_id += 1;
        state.done.push(record.clone());
        state.undone.clear();

        self.persist(&state)?;
        Ok(record)
    }

    /// Undo the most recent move: relocate the file back to its original
    /// path and shift the record onto the redo stack.
    ///
    /// A no-op (`Ok(None)`) on empty history. If the original path is now
    /// occupied by another file, or the moved file has disappeared, the
    /// undo fails with a conflict and the ledger entry stays put so the
    /// operator can retry or discard explicitly.
    pub fn undo(&self) -> Result<Option<MoveRecord>, EngineError> {
        let mut state = self.lock();

        let Some(record) = state.done.last().cloned() else {
            return Ok(None);
        };

        let source = Path::new(&record.source_path);
        let destination = Path::new(&record.destination_path);

        if source.exists() {
            return Err(EngineError::Conflict(format!(
                "original path is occupied: {}",
                record.source_path
            )));
        }
        if !destination.exists() {
            return Err(EngineError::Conflict(format!(
                "moved file is missing: {}",
                record.destination_path
            )));
        }

        relocate(destination, source)?;

        state.done.pop();
        state.undone.push(record.clone());
        self.persist(&state)?;

        info!(id = record.id, path = %record.source_path, "move undone");
        Ok(Some(record))
    }

    /// Re-apply the most recently undone move. A no-op (`Ok(None)`) when
    /// there is nothing to redo; conflicts mirror [`HistoryStore::undo`].
    pub fn redo(&self) -> Result<Option<MoveRecord>, EngineError> {
        let mut state = self.lock();

        let Some(record) = state.undone.last().cloned() else {
            return Ok(None);
        };

        let source = Path::new(&record.source_path);
        let destination = Path::new(&record.destination_path);

        if destination.exists() {
            return Err(EngineError::Conflict(format!(
                "destination path is occupied: {}",
                record.destination_path
            )));
        }
        if !source.exists() {
            return Err(EngineError::Conflict(format!(
                "file to re-move is missing: {}",
                record.source_path
            )));
        }

        relocate(source, destination)?;

        state.undone.pop();
        state.done.push(record.clone());
        self.persist(&state)?;

        info!(id = record.id, path = %record.destination_path, "move redone");
        Ok(Some(record))
    }

    pub fn can_undo(&self) -> bool {
        !self.lock().done.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.lock().undone.is_empty()
    }

    /// Snapshot of the undo-capable records, most recent last.
    pub fn records(&self) -> Vec<MoveRecord> {
        self.lock().done.clone()
    }

    pub fn done_len(&self) -> usize {
        self.lock().done.len()
    }

    pub fn undone_len(&self) -> usize {
        self.lock().undone.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Atomically write the ledger: temp file, flush, sync, rename.
    fn persist(&self, state: &LedgerState) -> Result<(), EngineError> {
        let ledger = LedgerFile {
            version: LEDGER_SCHEMA_VERSION,
            next_id: state.next_id,
            done: state.done.clone(),
            undone: state.undone.clone(),
        };

        if let Some(parent) = self.ledger_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp_path = self.ledger_path.with_extension("tmp");
        let file = File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);

        serde_json::to_writer_pretty(&mut writer, &ledger)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;

        fs::rename(&temp_path, &self.ledger_path)?;
        Ok(())
    }
}

fn is_strictly_ascending(records: &[MoveRecord]) -> bool {
    records.windows(2).all(|pair| pair[0].id < pair[1].id)
}

fn longest_consistent_prefix(records: Vec<MoveRecord>) -> Vec<MoveRecord> {
    let mut consistent = Vec::with_capacity(records.len());
    let mut last_id = 0u64;
    for record in records {
        if record.id <= last_id {
            warn!(
                id = record.id,
                "ledger ids not strictly ascending, truncating to consistent prefix"
            );
            break;
        }
        last_id = record.id;
        consistent.push(record);
    }
    consistent
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> HistoryStore {
        HistoryStore::open(dir.path().join("ledger.json")).unwrap()
    }

    fn draft(source: &Path, destination: &Path) -> MoveDraft {
        MoveDraft {
            source_path: source.to_string_lossy().to_string(),
            destination_path: destination.to_string_lossy().to_string(),
            folder_name: "문서".to_string(),
            created_folder: true,
            renamed: false,
        }
    }

    /// Set up a completed move on disk and in the ledger.
    fn perform_move(dir: &TempDir, store: &HistoryStore, name: &str) -> (PathBuf, PathBuf) {
        let source = dir.path().join(name);
        let dest_dir = dir.path().join("문서");
        fs::create_dir_all(&dest_dir).unwrap();
        let destination = dest_dir.join(name);

        fs::write(&destination, b"content").unwrap();
        store.append(draft(&source, &destination)).unwrap();
        (source, destination)
    }

    #[test]
    fn test_append_assigns_monotonic_ids() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let a = store
            .append(draft(&dir.path().join("a"), &dir.path().join("d/a")))
            .unwrap();
        let b = store
            .append(draft(&dir.path().join("b"), &dir.path().join("d/b")))
            .unwrap();

        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(a.outcome, MoveOutcome::Success);
    }

    #[test]
    fn test_undo_restores_file_and_shifts_record() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let (source, destination) = perform_move(&dir, &store, "report.pdf");

        let undone = store.undo().unwrap().unwrap();

        assert!(source.exists());
        assert!(!destination.exists());
        assert_eq!(undone.id, 1);
        assert_eq!(store.done_len(), 0);
        assert_eq!(store.undone_len(), 1);
    }

    #[test]
    fn test_redo_reapplies_move() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let (source, destination) = perform_move(&dir, &store, "report.pdf");

        store.undo().unwrap();
        let redone = store.redo().unwrap().unwrap();

        assert!(!source.exists());
        assert!(destination.exists());
        assert_eq!(redone.id, 1);
        assert_eq!(store.done_len(), 1);
        assert_eq!(store.undone_len(), 0);
    }

    #[test]
    fn test_undo_empty_history_is_noop() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert!(store.undo().unwrap().is_none());
        assert!(store.redo().unwrap().is_none());
    }

    #[test]
    fn test_append_clears_redo_stack() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        perform_move(&dir, &store, "first.pdf");
        store.undo().unwrap();
        assert_eq!(store.undone_len(), 1);

        perform_move(&dir, &store, "second.pdf");

        assert_eq!(store.undone_len(), 0);
        assert_eq!(store.done_len(), 1);
    }

    #[test]
    fn test_undo_conflict_leaves_ledger_undisturbed() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let (source, _destination) = perform_move(&dir, &store, "report.pdf");

        // An unrelated file now occupies the original path.
        fs::write(&source, b"intruder").unwrap();

        let result = store.undo();

        assert!(matches!(result, Err(EngineError::Conflict(_))));
        assert_eq!(store.done_len(), 1);
        assert_eq!(store.undone_len(), 0);
        assert_eq!(fs::read(&source).unwrap(), b"intruder");
    }

    #[test]
    fn test_undo_missing_destination_is_conflict() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let (_source, destination) = perform_move(&dir, &store, "report.pdf");

        fs::remove_file(&destination).unwrap();

        assert!(matches!(store.undo(), Err(EngineError::Conflict(_))));
        assert_eq!(store.done_len(), 1);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let ledger_path = dir.path().join("ledger.json");

        {
            let store = HistoryStore::open(ledger_path.clone()).unwrap();
            store
                .append(draft(&dir.path().join("a"), &dir.path().join("d/a")))
                .unwrap();
            store
                .append(draft(&dir.path().join("b"), &dir.path().join("d/b")))
                .unwrap();
        }

        let store = HistoryStore::open(ledger_path).unwrap();
        assert_eq!(store.done_len(), 2);

        let next = store
            .append(draft(&dir.path().join("c"), &dir.path().join("d/c")))
            .unwrap();
        assert_eq!(next.id, 3);
    }

    #[test]
    fn test_load_truncates_at_id_gap() {
        let dir = TempDir::new().unwrap();
        let ledger_path = dir.path().join("ledger.json");

        let record = |id: u64| MoveRecord {
            id,
            source_path: format!("/src/{id}"),
            destination_path: format!("/dst/{id}"),
            folder_name: "문서".to_string(),
            moved_at: Utc::now(),
            outcome: MoveOutcome::Success,
            created_folder: false,
            renamed: false,
        };

        // Ids 1, 2, 2 — the duplicate breaks strict ascent.
        let ledger = LedgerFile {
            version: LEDGER_SCHEMA_VERSION,
            next_id: 4,
            done: vec![record(1), record(2), record(2)],
            undone: vec![],
        };
        fs::write(&ledger_path, serde_json::to_vec(&ledger).unwrap()).unwrap();

        let store = HistoryStore::open(ledger_path).unwrap();
        assert_eq!(store.done_len(), 2);
    }
}
