//! Filename normalization.

/// Reduce an arbitrary client-supplied filename to a filesystem- and
/// URL-safe token.
///
/// Whitespace runs (including tabs and newlines) collapse to a single
/// underscore, then every character outside `[A-Za-z0-9_.-]` is dropped.
/// Deterministic and infallible; an empty result is possible and must be
/// rejected by callers that use the name as a path.
pub fn normalize_filename(filename: &str) -> String {
    filename
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect()
}
