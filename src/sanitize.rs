//! Folder-name validation. Pure string work, no filesystem I/O.

/// Characters that cannot appear in a path segment on the platforms we
/// care about (Windows is the strictest).
pub const FORBIDDEN_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Reserved device names (Windows), matched case-insensitively.
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Length window for folder names, in characters.
pub const MIN_NAME_LEN: usize = 2;
pub const MAX_NAME_LEN: usize = 30;

/// Why a suggested name was refused. Rejection is total: the caller gets
/// no partial name and must substitute its own deterministic fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Nothing left after stripping and trimming.
    Empty,
    /// Name consisted only of dots.
    DotsOnly,
    TooShort(usize),
    TooLong(usize),
    /// Matched a reserved device name.
    Reserved(String),
    /// Matched the configured system-folder denylist.
    Denied(String),
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::Empty => write!(f, "name is empty after cleaning"),
            Rejection::DotsOnly => write!(f, "name consists only of dots"),
            Rejection::TooShort(len) => write!(f, "name too short ({len} < {MIN_NAME_LEN})"),
            Rejection::TooLong(len) => write!(f, "name too long ({len} > {MAX_NAME_LEN})"),
            Rejection::Reserved(name) => write!(f, "reserved device name: {name}"),
            Rejection::Denied(name) => write!(f, "denied system folder name: {name}"),
        }
    }
}

/// Validate a suggested folder name into a filesystem-safe path segment.
///
/// Strips forbidden characters, trims surrounding whitespace, and enforces
/// the length window and reserved-name rules. Any violation rejects the
/// whole name; callers fall back to a category-derived default.
pub fn sanitize(raw: &str, denylist: &[String]) -> Result<String, Rejection> {
    let stripped: String = raw
        .chars()
        .filter(|c| !FORBIDDEN_CHARS.contains(c))
        .collect();
    let trimmed = stripped.trim();

    if trimmed.is_empty() {
        return Err(Rejection::Empty);
    }
    if trimmed.chars().all(|c| c == '.') {
        return Err(Rejection::DotsOnly);
    }

    let len = trimmed.chars().count();
    if len < MIN_NAME_LEN {
        return Err(Rejection::TooShort(len));
    }
    if len > MAX_NAME_LEN {
        return Err(Rejection::TooLong(len));
    }

    if let Some(reserved) = RESERVED_NAMES
        .iter()
        .find(|r| r.eq_ignore_ascii_case(trimmed))
    {
        return Err(Rejection::Reserved(reserved.to_string()));
    }
    if let Some(denied) = denylist.iter().find(|d| d.eq_ignore_ascii_case(trimmed)) {
        return Err(Rejection::Denied(denied.clone()));
    }

    Ok(trimmed.to_string())
}
