//! filewarden: a file-organization engine.
//!
//! Watches a directory, classifies newly-arrived files by content through
//! an external categorization oracle, and relocates them into category
//! subfolders. Every relocation is recorded in a reversible ledger and is
//! safe against races, duplicate names, and partial failure.
//!
//! The [`engine::Engine`] controller is the sole entry point for outer
//! layers (GUI/CLI): lifecycle commands, undo/redo, a statistics snapshot,
//! and an event stream of per-file outcomes.

pub mod cache;
pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod extract;
pub mod fingerprint;
pub mod history;
pub mod mover;
pub mod resolve;
pub mod sanitize;
pub mod watcher;

pub use cache::ClassificationCache;
pub use classify::{
    ClassificationResult, ClassificationStatus, Classifier, ClassifierConfig, ClassifyError,
    HttpClassifier,
};
pub use config::{EngineConfig, PausePolicy};
pub use engine::{Engine, EngineEvent, EngineState, EngineStatus};
pub use error::EngineError;
pub use history::{HistoryStore, MoveOutcome, MoveRecord};
pub use mover::{MoveReport, Mover};
pub use resolve::DuplicateStrategy;

use tracing_subscriber::EnvFilter;

/// Initialize tracing with the `RUST_LOG` env filter.
/// Default: warn for most crates, info for the engine.
/// Use `RUST_LOG=debug` for verbose per-file logs.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,filewarden=info")),
        )
        .init();
}
