// SPDX-License-Identifier: MIT OR Apache-2.0

//! Store statistics and consistency check

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use std::path::Path;

use crate::cli::OutputFormat;
use docrag::engine::Engine;
use docrag::store::CorpusStats;

use super::print_json;

#[derive(Debug, Serialize)]
struct StatsReport<'a> {
    store: String,
    model: &'a str,
    #[serde(flatten)]
    stats: CorpusStats,
}

/// Run the stats command
pub fn run(engine: &Engine, store_dir: &Path, format: OutputFormat, compact: bool) -> Result<()> {
    let stats = engine.stats()?;
    match format {
        OutputFormat::Json => print_json(
            &StatsReport {
                store: store_dir.display().to_string(),
                model: engine.model_id(),
                stats,
            },
            compact,
        )?,
        OutputFormat::Text => {
            println!("Store:     {}", store_dir.display().to_string().cyan());
            println!("Model:     {}", engine.model_id());
            println!("Dimension: {}", stats.dimension);
            println!("Vectors:   {}", stats.vectors);
            println!("Chunks:    {}", stats.chunks);
            println!("Sources:   {}", stats.sources);
        }
    }
    Ok(())
}

/// Run the verify command
pub fn verify(engine: &Engine, format: OutputFormat, compact: bool) -> Result<()> {
    let stats = engine.verify()?;
    match format {
        OutputFormat::Json => print_json(&stats, compact)?,
        OutputFormat::Text => println!(
            "{} Store consistent: {} chunks from {} sources",
            "✓".green(),
            stats.chunks,
            stats.sources
        ),
    }
    Ok(())
}
