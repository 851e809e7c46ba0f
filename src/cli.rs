// SPDX-License-Identifier: MIT OR Apache-2.0

//! CLI argument parsing using clap

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// docrag - Local document ingestion and semantic retrieval
///
/// Splits documents into overlapping token windows, embeds them, and ranks
/// stored chunks by cosine similarity to a natural-language query.
#[derive(Parser, Debug)]
#[command(name = "docrag")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Compact JSON output (no pretty formatting)
    #[arg(long, global = true)]
    pub compact: bool,

    /// Store directory (overrides config and DOCRAG_STORE_DIR)
    #[arg(long, global = true, value_name = "DIR")]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for results
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest files, or standard input when the path is `-`
    Ingest {
        /// Files to ingest (`-` reads text from stdin)
        #[arg(required = true, value_name = "PATH")]
        paths: Vec<PathBuf>,

        /// Source name to record (required for stdin, single input only)
        #[arg(long)]
        source: Option<String>,

        /// Annotation attached to every chunk (repeatable)
        #[arg(long = "meta", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        meta: Vec<(String, String)>,
    },

    /// Rank stored chunks by similarity to a query
    #[command(alias = "s")]
    Search {
        /// Natural-language query
        query: String,

        /// Number of results (defaults to search.top_k)
        #[arg(short = 'k', long = "top-k")]
        top_k: Option<usize>,
    },

    /// Show store row counts
    Stats,

    /// Check that the vector and metadata stores agree
    Verify,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}
