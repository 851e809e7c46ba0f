// SPDX-License-Identifier: MIT OR Apache-2.0

//! docrag - Local document ingestion and semantic retrieval
//!
//! Chunks documents into overlapping token windows, embeds them with a
//! local or external model, and answers top-k cosine-similarity queries
//! from an on-disk vector matrix joined with a SQLite metadata table.

mod cli;
mod commands;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Commands};
use colored::Colorize;
use docrag::config::Config;
use docrag::engine::Engine;
use docrag::errors::RagError;
use docrag::utils::resolve_store_dir;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn main() {
    // Initialize tracing with DOCRAG_LOG env var (e.g., DOCRAG_LOG=debug docrag search "query")
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("DOCRAG_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        let rag_error = err.chain().find_map(|e| e.downcast_ref::<RagError>());
        let code = rag_error.map(RagError::status_code).unwrap_or("ERROR");
        eprintln!("{} [{}] {:#}", "error:".red().bold(), code, err);
        std::process::exit(exit_code(rag_error));
    }
}

fn run(cli: Cli) -> Result<()> {
    let Cli {
        format,
        compact,
        store,
        command,
    } = cli;

    match command {
        Commands::Ingest {
            paths,
            source,
            meta,
        } => {
            let (engine, _) = open_engine(store, true)?;
            commands::ingest::run(&engine, &paths, source.as_deref(), &meta, format, compact)?;
        }
        Commands::Search { query, top_k } => {
            let (engine, _) = open_engine(store, false)?;
            commands::search::run(&engine, &query, top_k, format, compact)?;
        }
        Commands::Stats => {
            let (engine, store_dir) = open_engine(store, false)?;
            commands::stats::run(&engine, &store_dir, format, compact)?;
        }
        Commands::Verify => {
            let (engine, _) = open_engine(store, false)?;
            commands::stats::verify(&engine, format, compact)?;
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "docrag", &mut std::io::stdout());
        }
    }

    Ok(())
}

/// Load configuration and open the store, creating its directory when `create` is set.
fn open_engine(store: Option<PathBuf>, create: bool) -> Result<(Engine, PathBuf)> {
    let config = Config::load()?;
    let configured = store.unwrap_or_else(|| config.store().dir());
    let store_dir = resolve_store_dir(configured, std::env::current_dir()?);

    if create {
        std::fs::create_dir_all(&store_dir).with_context(|| {
            format!("Failed to create store directory {}", store_dir.display())
        })?;
    }
    let engine = Engine::from_config(&config, &store_dir)?;
    Ok((engine, store_dir))
}

/// 2 for caller mistakes, 3 for a diverged store, 1 otherwise.
fn exit_code(error: Option<&RagError>) -> i32 {
    match error {
        Some(RagError::InvalidInput { .. }) => 2,
        Some(RagError::CorruptStore { .. }) => 3,
        _ => 1,
    }
}
