//! Destination collision handling.
//!
//! The strategy is fixed per engine configuration; the resolver itself is
//! stateless and re-checks existence on every probe so concurrent external
//! writers cannot invalidate a cached "next free number".

use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Serialize};

/// How a filename collision at the destination is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateStrategy {
    /// `report.pdf` -> `report(1).pdf`
    RenameWithNumber,
    /// `report.pdf` -> `2026-08-08_14-03-12_report.pdf`
    RenameWithTimestamp,
    /// Keep the original path; the mover replaces the existing file.
    Overwrite,
    /// Leave the source in place and report a warning.
    Skip,
}

/// Outcome of collision resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Final non-colliding destination path.
    Target(PathBuf),
    /// Abort the move, leaving the source untouched.
    Skip,
}

/// Resolve the final destination for `file_name` inside `dir`.
pub fn resolve(dir: &Path, file_name: &str, strategy: DuplicateStrategy) -> Resolution {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return Resolution::Target(candidate);
    }

    match strategy {
        DuplicateStrategy::Skip => Resolution::Skip,
        DuplicateStrategy::Overwrite => Resolution::Target(candidate),
        DuplicateStrategy::RenameWithNumber => Resolution::Target(number_suffix(dir, file_name)),
        DuplicateStrategy::RenameWithTimestamp => {
            let stamp = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
            Resolution::Target(timestamp_prefixed(dir, file_name, &stamp))
        }
    }
}

/// Probe `name(1)`, `name(2)`, ... until an unused path is found.
/// Existence is re-checked on every probe.
fn number_suffix(dir: &Path, file_name: &str) -> PathBuf {
    let (stem, ext) = split_name(file_name);
    let mut counter = 1u32;
    loop {
        let name = match ext {
            Some(ext) => format!("{stem}({counter}).{ext}"),
            None => format!("{stem}({counter})"),
        };
        let candidate = dir.join(&name);
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

/// Prefix the name with a timestamp; expected collision-free, but falls
/// through to numeric suffixing if the stamped name is also taken.
fn timestamp_prefixed(dir: &Path, file_name: &str, stamp: &str) -> PathBuf {
    let stamped = format!("{stamp}_{file_name}");
    let candidate = dir.join(&stamped);
    if candidate.exists() {
        return number_suffix(dir, &stamped);
    }
    candidate
}

/// Split a filename into stem and extension, keeping dotfiles whole.
fn split_name(file_name: &str) -> (&str, Option<&str>) {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (file_name, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_no_collision_returns_plain_name() {
        let dir = TempDir::new().unwrap();
        let resolution = resolve(dir.path(), "report.pdf", DuplicateStrategy::RenameWithNumber);
        assert_eq!(
            resolution,
            Resolution::Target(dir.path().join("report.pdf"))
        );
    }

    #[test]
    fn test_numeric_suffix_sequence() {
        let dir = TempDir::new().unwrap();

        // Three arrivals destined for the same name land as
        // report.pdf, report(1).pdf, report(2).pdf.
        for expected in ["report.pdf", "report(1).pdf", "report(2).pdf"] {
            let resolution =
                resolve(dir.path(), "report.pdf", DuplicateStrategy::RenameWithNumber);
            let Resolution::Target(path) = resolution else {
                panic!("expected a target path");
            };
            assert_eq!(path, dir.path().join(expected));
            fs::write(&path, b"x").unwrap();
        }
    }

    #[test]
    fn test_numeric_suffix_without_extension() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("README"), b"x").unwrap();
        let resolution = resolve(dir.path(), "README", DuplicateStrategy::RenameWithNumber);
        assert_eq!(
            resolution,
            Resolution::Target(dir.path().join("README(1)"))
        );
    }

    #[test]
    fn test_skip_on_collision() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("report.pdf"), b"x").unwrap();
        assert_eq!(
            resolve(dir.path(), "report.pdf", DuplicateStrategy::Skip),
            Resolution::Skip
        );
    }

    #[test]
    fn test_overwrite_keeps_original_path() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("report.pdf"), b"x").unwrap();
        assert_eq!(
            resolve(dir.path(), "report.pdf", DuplicateStrategy::Overwrite),
            Resolution::Target(dir.path().join("report.pdf"))
        );
    }

    #[test]
    fn test_timestamp_prefix_shape() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("report.pdf"), b"x").unwrap();
        let resolution = resolve(
            dir.path(),
            "report.pdf",
            DuplicateStrategy::RenameWithTimestamp,
        );
        let Resolution::Target(path) = resolution else {
            panic!("expected a target path");
        };
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.ends_with("_report.pdf"), "got {name}");
        assert_eq!(name.len(), "2026-08-08_14-03-12_report.pdf".len());
    }

    #[test]
    fn test_timestamp_collision_falls_through_to_number() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("stamp_report.pdf"), b"x").unwrap();
        let path = timestamp_prefixed(dir.path(), "report.pdf", "stamp");
        assert_eq!(path, dir.path().join("stamp_report(1).pdf"));
    }

    #[test]
    fn test_dotfile_suffixing() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".env"), b"x").unwrap();
        let resolution = resolve(dir.path(), ".env", DuplicateStrategy::RenameWithNumber);
        assert_eq!(resolution, Resolution::Target(dir.path().join(".env(1)")));
    }
}
