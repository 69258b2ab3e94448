//! SHA-256 content fingerprints used as cache keys and for move verification.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::EngineError;

/// Buffer size for reading files (8KB)
const BUFFER_SIZE: usize = 8192;

/// Digest of a file's content, possibly truncated for oversized files.
///
/// The hash is deterministic for identical byte content regardless of the
/// file's name or location. When `truncated` is set, only the first
/// `limit` bytes contributed to the hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// Hex-encoded SHA-256 digest.
    pub hash: String,
    /// Total file size in bytes (not the hashed length).
    pub size: u64,
    /// Whether the file exceeded the limit and was hashed over a prefix.
    pub truncated: bool,
}

/// Fingerprint a file, hashing at most `limit` bytes of its content.
pub fn fingerprint_file(path: &Path, limit: u64) -> Result<Fingerprint, EngineError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| EngineError::from_fs(e, &format!("reading metadata for {}", path.display())))?;

    let file = File::open(path)
        .map_err(|e| EngineError::from_fs(e, &format!("opening {}", path.display())))?;

    let mut reader = BufReader::new(file).take(limit);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; BUFFER_SIZE];

    loop {
        let bytes_read = reader
            .read(&mut buffer)
            .map_err(|e| EngineError::from_fs(e, &format!("reading {}", path.display())))?;

        if bytes_read == 0 {
            break;
        }

        hasher.update(&buffer[..bytes_read]);
    }

    Ok(Fingerprint {
        hash: hex::encode(hasher.finalize()),
        size: metadata.len(),
        truncated: metadata.len() > limit,
    })
}

/// Full-content digest, used to verify that a cross-device copy landed
/// byte-for-byte intact before the source is deleted.
pub fn digest_full(path: &Path) -> Result<String, EngineError> {
    Ok(fingerprint_file(path, u64::MAX)?.hash)
}
