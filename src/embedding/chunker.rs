// SPDX-License-Identifier: MIT OR Apache-2.0

//! Text chunker for embedding generation.
//!
//! This module splits cleaned document text into overlapping windows of
//! whitespace-delimited tokens. Windows are produced lazily, one per call to
//! [`Iterator::next`], from a single pass over the token list.

use crate::errors::{RagError, Result};

/// Default number of tokens per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 1200;

/// Default overlap between consecutive chunks.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Configuration for the text chunker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    /// Number of tokens per chunk.
    pub size: usize,
    /// Number of overlapping tokens between consecutive chunks.
    pub overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkConfig {
    /// Creates a new ChunkConfig, rejecting `size == 0` and `overlap >= size`.
    pub fn new(size: usize, overlap: usize) -> Result<Self> {
        if size == 0 {
            return Err(RagError::invalid("chunk size must be greater than 0"));
        }
        if overlap >= size {
            return Err(RagError::invalid(format!(
                "chunk overlap ({}) must be less than chunk size ({})",
                overlap, size
            )));
        }
        Ok(Self { size, overlap })
    }

    /// Distance between the starts of consecutive windows, never less than one token.
    pub fn step(&self) -> usize {
        self.size.saturating_sub(self.overlap).max(1)
    }
}

/// A window of tokens with its position in the source token list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// 0-based position of this chunk in the sequence.
    pub index: usize,
    /// Index of the first token in the window.
    pub start_token: usize,
    /// Index one past the last token in the window.
    pub end_token: usize,
    /// Tokens joined by single spaces.
    pub text: String,
}

/// Splits text into overlapping token windows.
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkConfig,
}

impl Chunker {
    /// Creates a new chunker with the given configuration.
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    /// Creates a chunker with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ChunkConfig::default())
    }

    /// Splits text into overlapping token windows.
    ///
    /// Algorithm:
    /// ```text
    /// tokens = text.split_whitespace()
    /// step = max(1, size - overlap)
    /// start = 0
    /// while start < len(tokens):
    ///   yield tokens[start .. min(start + size, len(tokens))]
    ///   start += step
    /// ```
    ///
    /// Empty or all-whitespace input yields nothing.
    pub fn chunk<'a>(&self, text: &'a str) -> Chunks<'a> {
        Chunks {
            tokens: text.split_whitespace().collect(),
            size: self.config.size.max(1),
            step: self.config.step(),
            start: 0,
            index: 0,
        }
    }
}

/// Lazy iterator over the windows of one text. Consumed once.
#[derive(Debug)]
pub struct Chunks<'a> {
    tokens: Vec<&'a str>,
    size: usize,
    step: usize,
    start: usize,
    index: usize,
}

impl Iterator for Chunks<'_> {
    type Item = TextChunk;

    fn next(&mut self) -> Option<Self::Item> {
        if self.start >= self.tokens.len() {
            return None;
        }

        let end = (self.start + self.size).min(self.tokens.len());
        let chunk = TextChunk {
            index: self.index,
            start_token: self.start,
            end_token: end,
            text: self.tokens[self.start..end].join(" "),
        };

        self.start += self.step;
        self.index += 1;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining_tokens = self.tokens.len().saturating_sub(self.start);
        let remaining = remaining_tokens.div_ceil(self.step);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Chunks<'_> {}
