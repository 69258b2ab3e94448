//! Classification contract and the deterministic extension fallback.
//!
//! The engine only ever sees a [`ClassificationResult`]; how the suggestion
//! was produced (HTTP oracle, cache, fallback rule) is invisible to the
//! mover and the history ledger.

pub mod client;
pub(crate) mod prompts;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::extract::ContentDescriptor;
use crate::sanitize::FORBIDDEN_CHARS;

pub use client::{ClassifierConfig, HttpClassifier};

/// Category used when nothing better is known.
pub const FALLBACK_CATEGORY: &str = "기타";

/// Confidence assigned to fallback classifications so observers can tell
/// a degraded result from an oracle answer.
pub const FALLBACK_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationStatus {
    Success,
    Error,
}

/// Outcome of one classification. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResult {
    pub status: ClassificationStatus,
    /// Suggested folder name, unsanitized.
    pub folder_name: String,
    /// Category tag (문서, 이미지, ...).
    pub category: String,
    /// Confidence in [0.0, 1.0].
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Ways the external oracle can fail. All of them are recovered locally
/// with [`fallback_result`]; none fails a work item.
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("rate limit reached")]
    RateLimited,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("request timed out")]
    Timeout,

    #[error("malformed response: {0}")]
    Parse(String),

    #[error("missing API credentials")]
    Credentials,
}

/// The external categorization oracle.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classify the described content. The fingerprint identifies the
    /// (possibly truncated) content the descriptor was built from.
    async fn classify(
        &self,
        fingerprint: &str,
        descriptor: &ContentDescriptor,
    ) -> Result<ClassificationResult, ClassifyError>;
}

/// Map a file extension onto its default category.
pub fn category_for_extension(extension: Option<&str>) -> &'static str {
    let Some(ext) = extension else {
        return FALLBACK_CATEGORY;
    };
    match ext.to_lowercase().as_str() {
        "txt" | "pdf" | "docx" | "doc" | "hwp" => "문서",
        "xlsx" | "xls" => "스프레드시트",
        "csv" => "데이터",
        "jpg" | "jpeg" | "png" | "gif" | "bmp" | "svg" | "webp" => "이미지",
        "mp4" | "avi" | "mov" | "mkv" | "flv" => "비디오",
        "mp3" | "wav" | "flac" | "aac" | "m4a" => "음악",
        "zip" | "rar" | "7z" | "tar" | "gz" => "압축파일",
        "py" | "js" | "ts" | "rs" | "java" | "cpp" | "c" | "html" | "css" => "코드",
        _ => FALLBACK_CATEGORY,
    }
}

/// Derive a deterministic folder name from the filename, falling back to
/// the extension category when the stem is unusable.
pub fn fallback_folder_name(file_name: &str, extension: Option<&str>) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    let cleaned: String = stem
        .chars()
        .filter(|c| !FORBIDDEN_CHARS.contains(c))
        .collect();
    let truncated: String = cleaned.trim().chars().take(20).collect();

    if truncated.chars().count() >= 2 {
        truncated
    } else {
        category_for_extension(extension).to_string()
    }
}

/// Deterministic classification used whenever the oracle is unavailable.
/// Always a success with degraded confidence, so the file still gets filed.
pub fn fallback_result(file_name: &str, extension: Option<&str>, detail: &str) -> ClassificationResult {
    ClassificationResult {
        status: ClassificationStatus::Success,
        folder_name: fallback_folder_name(file_name, extension),
        category: category_for_extension(extension).to_string(),
        confidence: FALLBACK_CONFIDENCE,
        reason: Some(format!("classified by extension ({detail})")),
        error: None,
    }
}
