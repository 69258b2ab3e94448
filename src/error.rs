use std::io;

use crate::classify::ClassifyError;

/// Errors produced by the organization engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("insufficient storage: {0}")]
    Capacity(String),

    #[error("classifier error: {0}")]
    ExternalService(#[from] ClassifyError),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("invalid lifecycle transition: {0}")]
    Lifecycle(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("watcher error: {0}")]
    Watcher(String),
}

impl EngineError {
    /// Map a filesystem error onto the engine's error kinds.
    /// Permission and storage failures get their own variants so the
    /// per-file outcome can name them; everything else stays an IO error.
    pub(crate) fn from_fs(err: io::Error, context: &str) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => Self::Permission(format!("{context}: {err}")),
            io::ErrorKind::StorageFull | io::ErrorKind::QuotaExceeded => {
                Self::Capacity(format!("{context}: {err}"))
            }
            _ => Self::Io(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_errors_are_classified() {
        let err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(
            EngineError::from_fs(err, "creating folder"),
            EngineError::Permission(_)
        ));
    }

    #[test]
    fn test_storage_errors_are_classified() {
        let err = io::Error::new(io::ErrorKind::StorageFull, "disk full");
        assert!(matches!(
            EngineError::from_fs(err, "moving file"),
            EngineError::Capacity(_)
        ));
    }

    #[test]
    fn test_other_errors_stay_io() {
        let err = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert!(matches!(
            EngineError::from_fs(err, "reading file"),
            EngineError::Io(_)
        ));
    }
}
