//! Persistent classification cache keyed by content fingerprint.
//!
//! One row per fingerprint, never mutated in place: `store` is a no-op for
//! an equal result and last-write-wins for a differing one (the caller is
//! the one that logs that anomaly). The engine works identically whether
//! entries live forever or an external retention policy evicts them.

use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::classify::{ClassificationResult, ClassificationStatus};
use crate::error::EngineError;

pub struct ClassificationCache {
    conn: Mutex<Connection>,
}

impl ClassificationCache {
    /// Open (or create) the cache database at `path`.
    pub fn open(path: &Path) -> Result<Self, EngineError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// In-memory cache for tests.
    pub fn open_in_memory() -> Result<Self, EngineError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, EngineError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS classifications (
                fingerprint TEXT PRIMARY KEY,
                status      TEXT NOT NULL,
                folder_name TEXT NOT NULL,
                category    TEXT NOT NULL,
                confidence  REAL NOT NULL,
                reason      TEXT,
                created_at  TEXT NOT NULL
            );",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Look up the stored result for a fingerprint.
    pub fn lookup(&self, fingerprint: &str) -> Result<Option<ClassificationResult>, EngineError> {
        let conn = self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let row = conn
            .query_row(
                "SELECT status, folder_name, category, confidence, reason
                 FROM classifications WHERE fingerprint = ?1",
                params![fingerprint],
                |row| {
                    let status: String = row.get(0)?;
                    Ok(ClassificationResult {
                        status: if status == "success" {
                            ClassificationStatus::Success
                        } else {
                            ClassificationStatus::Error
                        },
                        folder_name: row.get(1)?,
                        category: row.get(2)?,
                        confidence: row.get(3)?,
                        reason: row.get(4)?,
                        error: None,
                    })
                },
            )
            .optional()?;

        Ok(row)
    }

    /// Store a result for a fingerprint.
    ///
    /// Storing an equal result again is a no-op. Storing a differing result
    /// overwrites (last-write-wins) and returns `true` so the caller can log
    /// the anomaly.
    pub fn store(
        &self,
        fingerprint: &str,
        result: &ClassificationResult,
    ) -> Result<bool, EngineError> {
        let existing = self.lookup(fingerprint)?;

        if let Some(ref previous) = existing {
            if previous == result {
                return Ok(false);
            }
        }

        let conn = self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let status = match result.status {
            ClassificationStatus::Success => "success",
            ClassificationStatus::Error => "error",
        };

        conn.execute(
            "INSERT OR REPLACE INTO classifications
             (fingerprint, status, folder_name, category, confidence, reason, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                fingerprint,
                status,
                result.folder_name,
                result.category,
                result.confidence,
                result.reason,
                Utc::now().to_rfc3339(),
            ],
        )?;

        Ok(existing.is_some())
    }

    /// Number of cached entries.
    pub fn len(&self) -> Result<u64, EngineError> {
        let conn = self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let count: u64 = conn.query_row("SELECT COUNT(*) FROM classifications", [], |row| {
            row.get(0)
        })?;
        Ok(count)
    }

    pub fn is_empty(&self) -> Result<bool, EngineError> {
        Ok(self.len()? == 0)
    }
}
