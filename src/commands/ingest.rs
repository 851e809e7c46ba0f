// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ingest files or standard input into the store

use anyhow::{bail, Context, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::cli::OutputFormat;
use docrag::engine::Engine;
use docrag::extract::extract_from_file;
use docrag::output::{colorize_source, use_colors};
use docrag::store::ChunkMeta;

use super::print_json;

const STDIN_PATH: &str = "-";

/// Run the ingest command
pub fn run(
    engine: &Engine,
    paths: &[PathBuf],
    source: Option<&str>,
    meta: &[(String, String)],
    format: OutputFormat,
    compact: bool,
) -> Result<()> {
    if source.is_some() && paths.len() > 1 {
        bail!("--source names a single input, got {} paths", paths.len());
    }
    let annotations: ChunkMeta = meta
        .iter()
        .map(|(key, value)| (key.clone(), Value::String(value.clone())))
        .collect();

    let pb = if format == OutputFormat::Text && paths.len() > 1 {
        let pb = ProgressBar::new(paths.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{bar:40.cyan/blue}] {pos}/{len} files | Ingesting {msg}")
                .expect("valid progress bar template")
                .progress_chars("##."),
        );
        pb
    } else {
        ProgressBar::hidden()
    };

    let mut outcomes = Vec::with_capacity(paths.len());
    for path in paths {
        let (name, text, mut chunk_meta) = if path == Path::new(STDIN_PATH) {
            let Some(source) = source else {
                bail!("reading stdin requires --source NAME");
            };
            let mut bytes = Vec::new();
            std::io::stdin()
                .read_to_end(&mut bytes)
                .context("Failed to read stdin")?;
            (
                source.to_string(),
                String::from_utf8_lossy(&bytes).into_owned(),
                ChunkMeta::new(),
            )
        } else {
            let extracted = extract_from_file(path)?;
            let name = source.map(str::to_string).unwrap_or(extracted.source);
            (name, extracted.text, extracted.meta)
        };
        chunk_meta.extend(annotations.clone());

        pb.set_message(name.clone());
        let outcome = engine
            .ingest(&name, &text, &chunk_meta)
            .with_context(|| format!("Failed to ingest {}", name))?;
        pb.inc(1);
        outcomes.push(outcome);
    }
    pb.finish_and_clear();

    match format {
        OutputFormat::Json => print_json(&outcomes, compact)?,
        OutputFormat::Text => {
            let use_color = use_colors();
            for outcome in &outcomes {
                println!(
                    "{} Added {} chunks from {}",
                    "✓".green(),
                    outcome.added,
                    colorize_source(&outcome.source, use_color)
                );
            }
        }
    }

    Ok(())
}
