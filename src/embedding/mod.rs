// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding module - turns text into unit-length vectors
//!
//! This module provides the token-window chunker, the provider capability
//! trait with its implementations, and the [`Embedder`] that validates and
//! normalizes provider output.

pub mod chunker;
pub mod embedder;
pub mod provider;

pub use chunker::{ChunkConfig, Chunker, Chunks, TextChunk};
pub use embedder::{l2_normalize, Embedder, DIMENSION_SAMPLE, NORM_EPSILON};
pub use provider::{
    create_provider, CommandProvider, DummyProvider, EmbeddingProvider, FastEmbedder,
};
