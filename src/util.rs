//! Utility functions for `ChanLens`.
//!
//! This module contains reusable helper functions used across the codebase.

/// Truncate a string to at most `max_chars` characters, appending "..." if truncated.
///
/// Safe for multi-byte UTF-8 content (emoji, CJK, accented characters) because it
/// cuts on character boundaries, never byte indices. Used for display rendering,
/// where the ellipsis marker is wanted.
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => {
            let truncated = &s[..idx];
            format!("{}...", truncated.trim_end())
        }
        None => s.to_string(),
    }
}

/// Truncate a string to at most `max_chars` characters with no marker.
///
/// The collector uses this for its hard per-message cap, where the bound must be
/// exact and an appended ellipsis would overshoot it.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
