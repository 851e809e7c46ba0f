// SPDX-License-Identifier: MIT OR Apache-2.0

//! docrag - Local document ingestion and semantic retrieval library
//!
//! Shared modules for the docrag CLI tool: chunking, embedding, the paired
//! vector/metadata stores, and the ingestion and retrieval pipelines built on them.

pub mod config;
pub mod embedding;
pub mod engine;
pub mod errors;
pub mod extract;
pub mod ingest;
pub mod output;
pub mod retrieve;
pub mod store;
pub mod utils;

pub use engine::Engine;
pub use errors::{RagError, Result};
