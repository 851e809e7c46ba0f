// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error taxonomy for the ingestion and retrieval core.
//!
//! Library operations return [`Result`], whose error type separates the
//! recoverable cases (an embedding backend hiccup, bad caller input) from
//! [`RagError::CorruptStore`], which means the vector and metadata stores no
//! longer agree and nothing should be written until someone repairs them.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Debug, Error)]
pub enum RagError {
    /// The embedding backend was unreachable or returned malformed output.
    #[error("embedding backend unavailable: {reason}")]
    EmbeddingUnavailable { reason: String },

    /// The persisted stores disagree with each other or with the configured dimension.
    #[error("corrupt store: {reason}")]
    CorruptStore { reason: String },

    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("chunk not found: {id}")]
    NotFound { id: String },

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("metadata database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RagError {
    pub fn embedding_unavailable(reason: impl Into<String>) -> Self {
        Self::EmbeddingUnavailable {
            reason: reason.into(),
        }
    }

    pub fn corrupt(reason: impl Into<String>) -> Self {
        Self::CorruptStore {
            reason: reason.into(),
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the caller may retry or correct the request without repairing the store.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::EmbeddingUnavailable { .. } | Self::InvalidInput { .. } | Self::NotFound { .. }
        )
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::CorruptStore { .. })
    }

    /// Stable machine-readable code for this error.
    pub fn status_code(&self) -> &'static str {
        match self {
            Self::EmbeddingUnavailable { .. } => "EMBEDDING_UNAVAILABLE",
            Self::CorruptStore { .. } => "CORRUPT_STORE",
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Io { .. } => "IO_ERROR",
            Self::Sqlite(_) => "DATABASE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}
