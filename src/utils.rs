// SPDX-License-Identifier: MIT OR Apache-2.0

//! Utility functions for docrag

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};

static WHITESPACE_OR_CONTROL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\s\p{Cc}]+").expect("static regex"));

/// Collapse every run of whitespace or control characters to a single space and trim the ends.
///
/// Newlines and carriage returns count as whitespace, so a multi-line document
/// becomes one line of space-separated tokens.
pub fn clean_text(text: &str) -> String {
    WHITESPACE_OR_CONTROL
        .replace_all(text, " ")
        .trim()
        .to_string()
}

/// Generate a fresh, never-reused chunk identifier.
pub fn new_chunk_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Resolve a configured store directory against `base`.
/// Absolute paths are returned unchanged.
pub fn resolve_store_dir(dir: impl AsRef<Path>, base: impl AsRef<Path>) -> PathBuf {
    let dir = dir.as_ref();
    if dir.is_absolute() {
        dir.to_path_buf()
    } else {
        base.as_ref().join(dir)
    }
}
