// SPDX-License-Identifier: MIT OR Apache-2.0

//! Raw text extraction for local files.
//!
//! Only text-like files are understood; bytes that are not valid UTF-8 are
//! replaced rather than rejected.

use serde_json::Value;
use std::path::Path;

use crate::errors::{RagError, Result};
use crate::store::ChunkMeta;

/// Text and default annotations for one file.
#[derive(Debug, Clone)]
pub struct Extracted {
    pub source: String,
    pub text: String,
    pub meta: ChunkMeta,
}

/// Reads `path` as UTF-8 (lossy) and annotates it with its file name.
pub fn extract_from_file(path: impl AsRef<Path>) -> Result<Extracted> {
    let path = path.as_ref();
    if path.is_dir() {
        return Err(RagError::invalid(format!(
            "{} is a directory",
            path.display()
        )));
    }
    let bytes = std::fs::read(path).map_err(|e| RagError::io(path, e))?;
    let text = String::from_utf8_lossy(&bytes).into_owned();

    let mut meta = ChunkMeta::new();
    if let Some(name) = path.file_name() {
        meta.insert(
            "filename".to_string(),
            Value::String(name.to_string_lossy().into_owned()),
        );
    }

    Ok(Extracted {
        source: path.display().to_string(),
        text,
        meta,
    })
}
