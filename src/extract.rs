//! Bounded content descriptors handed to the classifier.
//!
//! The engine never forwards more content than contributed to the file's
//! fingerprint: the text preview and the vision payload are both capped by
//! limits the configuration validates against `fingerprint_limit`.

use std::io::Read;
use std::path::Path;

use base64::Engine as _;

use crate::error::EngineError;

/// Extensions treated as text and eligible for a content preview.
const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "json", "yaml", "yml", "toml", "xml", "html", "css", "js", "ts", "jsx", "tsx",
    "py", "rb", "go", "rs", "java", "c", "cpp", "h", "hpp", "swift", "kt", "sh", "bash", "zsh",
    "csv", "log", "ini", "conf", "config", "env",
];

/// Extensions routed through the vision path.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp"];

/// What the classifier gets to look at.
#[derive(Debug, Clone)]
pub enum DescriptorKind {
    /// Bounded UTF-8 preview of a text-like file.
    Text(String),
    /// Base64-encoded image payload for the vision path.
    Image { mime: String, base64: String },
    /// Nothing beyond the file's name, type, and size.
    Opaque,
}

/// Bounded description of one file's content.
#[derive(Debug, Clone)]
pub struct ContentDescriptor {
    pub file_name: String,
    pub extension: Option<String>,
    pub size: u64,
    pub mime: String,
    pub kind: DescriptorKind,
}

/// Limits applied while building a descriptor.
#[derive(Debug, Clone, Copy)]
pub struct ExtractLimits {
    /// Bytes of text preview.
    pub preview_bytes: usize,
    /// Largest image forwarded whole to the vision path.
    pub max_image_bytes: u64,
}

/// Build a bounded descriptor for the file at `path`.
pub fn describe(path: &Path, limits: ExtractLimits) -> Result<ContentDescriptor, EngineError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| EngineError::from_fs(e, &format!("reading metadata for {}", path.display())))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase());
    let mime = mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string();

    let kind = match extension.as_deref() {
        Some(ext) if IMAGE_EXTENSIONS.contains(&ext) && metadata.len() <= limits.max_image_bytes => {
            let bytes = std::fs::read(path)
                .map_err(|e| EngineError::from_fs(e, &format!("reading {}", path.display())))?;
            DescriptorKind::Image {
                mime: mime.clone(),
                base64: base64::engine::general_purpose::STANDARD.encode(bytes),
            }
        }
        Some(ext) if TEXT_EXTENSIONS.contains(&ext) => {
            match read_text_preview(path, limits.preview_bytes)? {
                Some(preview) => DescriptorKind::Text(preview),
                None => DescriptorKind::Opaque,
            }
        }
        _ => DescriptorKind::Opaque,
    };

    Ok(ContentDescriptor {
        file_name,
        extension,
        size: metadata.len(),
        kind,
        mime,
    })
}

/// Read at most `limit` bytes and return them as text, or `None` when the
/// content looks binary despite the extension.
fn read_text_preview(path: &Path, limit: usize) -> Result<Option<String>, EngineError> {
    let file = std::fs::File::open(path)
        .map_err(|e| EngineError::from_fs(e, &format!("opening {}", path.display())))?;

    // take() bounds the read; the file is never read whole.
    let mut reader = file.take(limit as u64);
    let mut buffer = Vec::with_capacity(limit.min(8192));
    reader
        .read_to_end(&mut buffer)
        .map_err(|e| EngineError::from_fs(e, &format!("reading {}", path.display())))?;

    // High proportion of non-printable bytes means a mislabeled binary file.
    let non_printable = buffer
        .iter()
        .filter(|&&b| b < 0x20 && b != b'\n' && b != b'\r' && b != b'\t')
        .count();
    if !buffer.is_empty() && non_printable > buffer.len() / 10 {
        return Ok(None);
    }

    Ok(Some(String::from_utf8_lossy(&buffer).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn limits() -> ExtractLimits {
        ExtractLimits {
            preview_bytes: 64,
            max_image_bytes: 1024,
        }
    }

    #[test]
    fn test_text_file_preview_is_bounded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, "a".repeat(200)).unwrap();

        let descriptor = describe(&path, limits()).unwrap();
        match descriptor.kind {
            DescriptorKind::Text(preview) => assert_eq!(preview.len(), 64),
            other => panic!("expected text descriptor, got {other:?}"),
        }
        assert_eq!(descriptor.size, 200);
        assert_eq!(descriptor.extension.as_deref(), Some("txt"));
    }

    #[test]
    fn test_binary_content_with_text_extension_is_opaque() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fake.txt");
        fs::write(&path, [0u8, 1, 2, 3, 4, 5, 6, 7, 8, 9]).unwrap();

        let descriptor = describe(&path, limits()).unwrap();
        assert!(matches!(descriptor.kind, DescriptorKind::Opaque));
    }

    #[test]
    fn test_small_image_is_encoded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("photo.png");
        fs::write(&path, b"not a real png but small").unwrap();

        let descriptor = describe(&path, limits()).unwrap();
        match descriptor.kind {
            DescriptorKind::Image { mime, base64 } => {
                assert_eq!(mime, "image/png");
                assert!(!base64.is_empty());
            }
            other => panic!("expected image descriptor, got {other:?}"),
        }
    }

    #[test]
    fn test_oversized_image_is_opaque() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("huge.png");
        fs::write(&path, vec![0u8; 2048]).unwrap();

        let descriptor = describe(&path, limits()).unwrap();
        assert!(matches!(descriptor.kind, DescriptorKind::Opaque));
    }

    #[test]
    fn test_unknown_extension_is_opaque() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("archive.zip");
        fs::write(&path, b"PK...").unwrap();

        let descriptor = describe(&path, limits()).unwrap();
        assert!(matches!(descriptor.kind, DescriptorKind::Opaque));
        assert_eq!(descriptor.mime, "application/zip");
    }
}
