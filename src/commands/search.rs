// SPDX-License-Identifier: MIT OR Apache-2.0

//! Rank stored chunks against a query

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;

use crate::cli::OutputFormat;
use docrag::engine::Engine;
use docrag::output::{
    colorize_context, colorize_rank, colorize_score, colorize_source, preview, use_colors,
};
use docrag::retrieve::SearchHit;

use super::print_json;

const PREVIEW_CHARS: usize = 240;

/// JSON envelope consumed by prompt builders
#[derive(Debug, Serialize)]
struct SearchResponse<'a> {
    query: &'a str,
    results: &'a [SearchHit],
}

/// Run the search command
pub fn run(
    engine: &Engine,
    query: &str,
    top_k: Option<usize>,
    format: OutputFormat,
    compact: bool,
) -> Result<()> {
    let results = engine.search(query, top_k)?;

    match format {
        OutputFormat::Json => print_json(
            &SearchResponse {
                query,
                results: &results,
            },
            compact,
        )?,
        OutputFormat::Text => {
            if results.is_empty() {
                println!("{} No results for: {}", "✗".red(), query.yellow());
                return Ok(());
            }
            let use_color = use_colors();
            for hit in &results {
                println!(
                    "{} {} #{}  {}",
                    colorize_rank(hit.rank, use_color),
                    colorize_source(&hit.chunk.source, use_color),
                    hit.chunk.chunk_index,
                    colorize_score(hit.score, use_color)
                );
                println!(
                    "   {}",
                    colorize_context(&preview(&hit.chunk.text, PREVIEW_CHARS), use_color)
                );
            }
        }
    }

    Ok(())
}
