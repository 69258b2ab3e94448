//! Validated, reversible relocation of one file into its category folder.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::EngineError;
use crate::fingerprint::digest_full;
use crate::history::{HistoryStore, MoveDraft, MoveOutcome};
use crate::resolve::{self, DuplicateStrategy, Resolution};
use crate::sanitize;

/// Result of one move attempt. Every attempt yields exactly one report;
/// internal errors are folded into the `outcome`/`detail` fields rather
/// than propagated, so the pipeline keeps running.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveReport {
    pub outcome: MoveOutcome,
    pub source_path: PathBuf,
    /// Final location; only set on success.
    pub destination_path: Option<PathBuf>,
    /// Folder name actually used (post-sanitization or fallback).
    pub folder_name: String,
    pub created_folder: bool,
    /// Whether duplicate resolution altered the file name.
    pub renamed: bool,
    /// Warning or error description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Ledger record id; only set on success.
    pub record_id: Option<u64>,
}

impl MoveReport {
    fn failure(source: &Path, folder_name: &str, err: &EngineError) -> Self {
        Self {
            outcome: MoveOutcome::Error,
            source_path: source.to_path_buf(),
            destination_path: None,
            folder_name: folder_name.to_string(),
            created_folder: false,
            renamed: false,
            detail: Some(err.to_string()),
            record_id: None,
        }
    }
}

/// Moves files into category folders under a fixed base directory and
/// commits each success to the history ledger.
pub struct Mover {
    base_dir: PathBuf,
    strategy: DuplicateStrategy,
    denylist: Vec<String>,
    history: Arc<HistoryStore>,
}

impl Mover {
    pub fn new(
        base_dir: PathBuf,
        strategy: DuplicateStrategy,
        denylist: Vec<String>,
        history: Arc<HistoryStore>,
    ) -> Self {
        Self {
            base_dir,
            strategy,
            denylist,
            history,
        }
    }

    /// Move `source` into the folder suggested by classification.
    ///
    /// The suggested name is sanitized first; on rejection the category tag
    /// supplies a deterministic fallback. The source file survives any
    /// failure intact, and nothing half-written is left at the destination.
    pub fn move_file(&self, source: &Path, suggested_folder: &str, category: &str) -> MoveReport {
        // (a) the source must be an existing, readable regular file
        if let Err(err) = validate_source(source) {
            warn!(path = %source.display(), %err, "refusing to move");
            return MoveReport::failure(source, suggested_folder, &err);
        }

        // (b) sanitize the folder name, falling back to the category
        let folder_name = match sanitize::sanitize(suggested_folder, &self.denylist) {
            Ok(name) => name,
            Err(rejection) => {
                info!(
                    suggested = suggested_folder,
                    %rejection,
                    category,
                    "folder name rejected, using category fallback"
                );
                match sanitize::sanitize(category, &self.denylist) {
                    Ok(name) => name,
                    Err(rejection) => {
                        // Deterministic fallbacks are chosen to pass; reaching
                        // this means the configuration denylisted its own
                        // category names.
                        let err = EngineError::Validation(format!(
                            "category fallback rejected: {rejection}"
                        ));
                        return MoveReport::failure(source, suggested_folder, &err);
                    }
                }
            }
        };

        // (c) ensure the destination directory exists and is writable
        let dest_dir = self.base_dir.join(&folder_name);
        let created_folder = !dest_dir.exists();
        if let Err(err) = prepare_directory(&dest_dir) {
            return MoveReport::failure(source, &folder_name, &err);
        }

        // (d) resolve the final destination path
        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let destination = match resolve::resolve(&dest_dir, &file_name, self.strategy) {
            Resolution::Target(path) => path,
            Resolution::Skip => {
                info!(path = %source.display(), "destination occupied, skipping per strategy");
                return MoveReport {
                    outcome: MoveOutcome::Warning,
                    source_path: source.to_path_buf(),
                    destination_path: None,
                    folder_name,
                    created_folder: false,
                    renamed: false,
                    detail: Some("destination already exists, move skipped".to_string()),
                    record_id: None,
                };
            }
        };
        let renamed = destination
            .file_name()
            .map(|n| n.to_string_lossy() != file_name.as_str())
            .unwrap_or(false);

        // (e) relocate; on any failure the source is intact and no partial
        // destination file remains
        if let Err(err) = relocate(source, &destination) {
            error!(
                source = %source.display(),
                destination = %destination.display(),
                %err,
                "move failed"
            );
            return MoveReport::failure(source, &folder_name, &err);
        }

        // (f) commit to the ledger; a move that cannot be recorded is
        // rolled back so history never misses a relocation
        let draft = MoveDraft {
            source_path: source.to_string_lossy().to_string(),
            destination_path: destination.to_string_lossy().to_string(),
            folder_name: folder_name.clone(),
            created_folder,
            renamed,
        };
        let record = match self.history.append(draft) {
            Ok(record) => record,
            Err(err) => {
                error!(%err, "ledger append failed, rolling the move back");
                if let Err(rollback_err) = relocate(&destination, source) {
                    error!(
                        destination = %destination.display(),
                        %rollback_err,
                        "rollback after ledger failure also failed"
                    );
                }
                return MoveReport::failure(source, &folder_name, &err);
            }
        };

        info!(
            source = %source.display(),
            destination = %destination.display(),
            folder = %folder_name,
            record = record.id,
            "file moved"
        );

        MoveReport {
            outcome: MoveOutcome::Success,
            source_path: source.to_path_buf(),
            destination_path: Some(destination),
            folder_name,
            created_folder,
            renamed,
            detail: None,
            record_id: Some(record.id),
        }
    }
}

fn validate_source(source: &Path) -> Result<(), EngineError> {
    let metadata = fs::symlink_metadata(source).map_err(|e| {
        EngineError::Validation(format!("source does not exist: {} ({e})", source.display()))
    })?;
    if !metadata.is_file() {
        return Err(EngineError::Validation(format!(
            "source is not a regular file: {}",
            source.display()
        )));
    }
    // Readability check; the handle is dropped immediately.
    File::open(source)
        .map(|_| ())
        .map_err(|e| EngineError::from_fs(e, &format!("opening {}", source.display())))
}

fn prepare_directory(dir: &Path) -> Result<(), EngineError> {
    fs::create_dir_all(dir)
        .map_err(|e| EngineError::from_fs(e, &format!("creating {}", dir.display())))?;

    let metadata = fs::metadata(dir)
        .map_err(|e| EngineError::from_fs(e, &format!("reading metadata for {}", dir.display())))?;
    if metadata.permissions().readonly() {
        return Err(EngineError::Permission(format!(
            "destination directory is not writable: {}",
            dir.display()
        )));
    }
    Ok(())
}

/// Move a file as a single logical operation.
///
/// `fs::rename` is atomic within a filesystem. Across devices it fails
/// with `CrossesDevices`, in which case the relocation degrades to a
/// copy, a full-content digest comparison, and only then removal of the
/// source; a failed verification removes the half-written destination.
pub(crate) fn relocate(source: &Path, destination: &Path) -> Result<(), EngineError> {
    match fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::CrossesDevices => {
            copy_verify_delete(source, destination)
        }
        Err(err) => Err(EngineError::from_fs(
            err,
            &format!(
                "renaming {} -> {}",
                source.display(),
                destination.display()
            ),
        )),
    }
}

fn copy_verify_delete(source: &Path, destination: &Path) -> Result<(), EngineError> {
    if let Err(err) = fs::copy(source, destination) {
        remove_partial(destination);
        return Err(EngineError::from_fs(
            err,
            &format!("copying {} -> {}", source.display(), destination.display()),
        ));
    }

    let source_digest = digest_full(source)?;
    let destination_digest = match digest_full(destination) {
        Ok(digest) => digest,
        Err(err) => {
            remove_partial(destination);
            return Err(err);
        }
    };
    if source_digest != destination_digest {
        remove_partial(destination);
        return Err(EngineError::Io(io::Error::other(format!(
            "copy verification failed for {}",
            destination.display()
        ))));
    }

    if let Err(err) = fs::remove_file(source) {
        // Keep exactly one copy: the verified destination is removed and
        // the still-present source remains authoritative.
        remove_partial(destination);
        return Err(EngineError::from_fs(
            err,
            &format!("removing source {}", source.display()),
        ));
    }
    Ok(())
}

fn remove_partial(destination: &Path) {
    if destination.exists() {
        if let Err(err) = fs::remove_file(destination) {
            warn!(
                path = %destination.display(),
                %err,
                "could not remove partial destination file"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn mover_in(dir: &TempDir, strategy: DuplicateStrategy) -> Mover {
        let history =
            Arc::new(HistoryStore::open(dir.path().join("state").join("ledger.json")).unwrap());
        Mover::new(
            dir.path().join("base"),
            strategy,
            vec!["Documents".to_string(), "Desktop".to_string()],
            history,
        )
    }

    fn write_source(dir: &TempDir, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_successful_move_preserves_content() {
        let dir = TempDir::new().unwrap();
        let mover = mover_in(&dir, DuplicateStrategy::RenameWithNumber);
        let source = write_source(&dir, "invoice.pdf", b"invoice bytes");

        let report = mover.move_file(&source, "재무", "문서");

        assert_eq!(report.outcome, MoveOutcome::Success);
        assert!(!source.exists());
        let destination = report.destination_path.unwrap();
        assert_eq!(destination, dir.path().join("base").join("재무").join("invoice.pdf"));
        assert_eq!(fs::read(&destination).unwrap(), b"invoice bytes");
        assert!(report.created_folder);
        assert!(!report.renamed);
        assert_eq!(report.record_id, Some(1));
    }

    #[test]
    fn test_missing_source_is_error_without_mutation() {
        let dir = TempDir::new().unwrap();
        let mover = mover_in(&dir, DuplicateStrategy::RenameWithNumber);

        let report = mover.move_file(&dir.path().join("gone.pdf"), "재무", "문서");

        assert_eq!(report.outcome, MoveOutcome::Error);
        assert!(!dir.path().join("base").exists());
        assert_eq!(mover.history.done_len(), 0);
    }

    #[test]
    fn test_rejected_name_falls_back_to_category() {
        let dir = TempDir::new().unwrap();
        let mover = mover_in(&dir, DuplicateStrategy::RenameWithNumber);
        let source = write_source(&dir, "memo.txt", b"memo");

        let report = mover.move_file(&source, "...", "문서");

        assert_eq!(report.outcome, MoveOutcome::Success);
        assert_eq!(report.folder_name, "문서");
        assert!(dir.path().join("base").join("문서").join("memo.txt").exists());
    }

    #[test]
    fn test_denylisted_name_falls_back_to_category() {
        let dir = TempDir::new().unwrap();
        let mover = mover_in(&dir, DuplicateStrategy::RenameWithNumber);
        let source = write_source(&dir, "memo.txt", b"memo");

        let report = mover.move_file(&source, "Documents", "문서");

        assert_eq!(report.outcome, MoveOutcome::Success);
        assert_eq!(report.folder_name, "문서");
    }

    #[test]
    fn test_skip_strategy_leaves_source_and_ledger_untouched() {
        let dir = TempDir::new().unwrap();
        let mover = mover_in(&dir, DuplicateStrategy::Skip);
        let source = write_source(&dir, "report.pdf", b"new");

        let occupied = dir.path().join("base").join("문서");
        fs::create_dir_all(&occupied).unwrap();
        fs::write(occupied.join("report.pdf"), b"old").unwrap();

        let report = mover.move_file(&source, "문서", "문서");

        assert_eq!(report.outcome, MoveOutcome::Warning);
        assert!(source.exists());
        assert_eq!(fs::read(occupied.join("report.pdf")).unwrap(), b"old");
        assert_eq!(mover.history.done_len(), 0);
    }

    #[test]
    fn test_numeric_rename_sequence_in_arrival_order() {
        let dir = TempDir::new().unwrap();
        let mover = mover_in(&dir, DuplicateStrategy::RenameWithNumber);

        let mut destinations = Vec::new();
        for i in 0..3 {
            let sub = dir.path().join(format!("inbox{i}"));
            fs::create_dir_all(&sub).unwrap();
            let source = sub.join("report.pdf");
            fs::write(&source, format!("copy {i}")).unwrap();

            let report = mover.move_file(&source, "문서", "문서");
            assert_eq!(report.outcome, MoveOutcome::Success);
            destinations.push(
                report
                    .destination_path
                    .unwrap()
                    .file_name()
                    .unwrap()
                    .to_string_lossy()
                    .to_string(),
            );
        }

        assert_eq!(destinations, ["report.pdf", "report(1).pdf", "report(2).pdf"]);
        let renamed_flags: Vec<bool> = mover.history.records().iter().map(|r| r.renamed).collect();
        assert_eq!(renamed_flags, [false, true, true]);
    }

    #[test]
    fn test_overwrite_strategy_replaces_existing() {
        let dir = TempDir::new().unwrap();
        let mover = mover_in(&dir, DuplicateStrategy::Overwrite);
        let source = write_source(&dir, "report.pdf", b"new");

        let occupied = dir.path().join("base").join("문서");
        fs::create_dir_all(&occupied).unwrap();
        fs::write(occupied.join("report.pdf"), b"old").unwrap();

        let report = mover.move_file(&source, "문서", "문서");

        assert_eq!(report.outcome, MoveOutcome::Success);
        assert_eq!(fs::read(occupied.join("report.pdf")).unwrap(), b"new");
        assert!(!report.renamed);
    }

    #[test]
    fn test_reusing_existing_folder_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let mover = mover_in(&dir, DuplicateStrategy::RenameWithNumber);
        fs::create_dir_all(dir.path().join("base").join("문서")).unwrap();
        let source = write_source(&dir, "memo.txt", b"memo");

        let report = mover.move_file(&source, "문서", "문서");

        assert_eq!(report.outcome, MoveOutcome::Success);
        assert!(!report.created_folder);
    }

    #[test]
    fn test_directory_source_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mover = mover_in(&dir, DuplicateStrategy::RenameWithNumber);
        let subdir = dir.path().join("folder");
        fs::create_dir_all(&subdir).unwrap();

        let report = mover.move_file(&subdir, "문서", "문서");

        assert_eq!(report.outcome, MoveOutcome::Error);
    }

    #[test]
    fn test_copy_verify_delete_moves_content() {
        let dir = TempDir::new().unwrap();
        let source = write_source(&dir, "a.bin", b"payload");
        let destination = dir.path().join("b.bin");

        copy_verify_delete(&source, &destination).unwrap();

        assert!(!source.exists());
        assert_eq!(fs::read(&destination).unwrap(), b"payload");
    }

    #[test]
    fn test_relocate_is_undoable() {
        let dir = TempDir::new().unwrap();
        let source = write_source(&dir, "a.bin", b"payload");
        let destination = dir.path().join("b.bin");

        relocate(&source, &destination).unwrap();
        relocate(&destination, &source).unwrap();

        assert!(source.exists());
        assert!(!destination.exists());
        assert_eq!(fs::read(&source).unwrap(), b"payload");
    }
}
