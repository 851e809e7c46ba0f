// SPDX-License-Identifier: MIT OR Apache-2.0

//! Command runners - translate CLI arguments into engine calls and print results

pub mod ingest;
pub mod search;
pub mod stats;

use anyhow::Result;
use serde::Serialize;

/// Print `value` as JSON on stdout.
pub(crate) fn print_json<T: Serialize>(value: &T, compact: bool) -> Result<()> {
    let json = if compact {
        serde_json::to_string(value)?
    } else {
        serde_json::to_string_pretty(value)?
    };
    println!("{}", json);
    Ok(())
}
