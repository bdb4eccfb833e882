use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LegacyPathError {
    #[error("path is empty")]
    Empty,

    #[error("path segment is invalid: {0}")]
    InvalidSegment(String),

    #[error("file name does not carry a sha256 digest: {0}")]
    NoDigest(String),
}

/// Normalizes a legacy fyle path: trims it, collapses repeated separators and
/// rejects segments that can't come from a file system path.
pub fn normalize_path(path: &str) -> Result<String, LegacyPathError> {
    let path = path.trim();

    if path.is_empty() {
        return Err(LegacyPathError::Empty);
    }

    let segments: Vec<&str> = path
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    if segments.is_empty() {
        return Err(LegacyPathError::Empty);
    }

    for segment in &segments {
        validate_segment(segment)?;
    }

    Ok(format!("/{}", segments.join("/")))
}

fn validate_segment(segment: &str) -> Result<(), LegacyPathError> {
    if segment.len() > 255 {
        let prefix: String = segment.chars().take(16).collect();
        return Err(LegacyPathError::InvalidSegment(format!("{prefix}...")));
    }

    const INVALID_CHARS: &[char] = &['\0', '\n', '\r'];
    if segment.chars().any(|c| INVALID_CHARS.contains(&c)) || segment == ".." {
        return Err(LegacyPathError::InvalidSegment(segment.escape_debug().to_string()));
    }

    Ok(())
}

/// Extracts the content hash from a legacy fyle path.
///
/// Legacy stores kept blobs at `<anything>/<HEX_SHA256>[.ext]`; the file name
/// stem must be exactly 64 hex digits. The digest is returned lowercased.
pub fn legacy_fyle_hash(path: &str) -> Result<String, LegacyPathError> {
    let normalized = normalize_path(path)?;
    let file_name = normalized.rsplit('/').next().unwrap_or_default();
    let stem = file_name.split('.').next().unwrap_or_default();

    if stem.len() != 64 || !stem.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(LegacyPathError::NoDigest(file_name.to_string()));
    }

    Ok(stem.to_ascii_lowercase())
}
