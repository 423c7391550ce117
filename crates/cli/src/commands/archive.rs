//! `corvid archive`: List conversation batches stored by the file archive.

use std::path::Path;
use std::process::ExitCode;

use anyhow::Context;
use corvid_archive::JsonlFileSink;
use corvid_core::archive::ArchiveBatch;

use super::startup;

pub fn run(config_path: Option<&Path>, limit: Option<usize>) -> anyhow::Result<ExitCode> {
    let config = startup::load_config(config_path)?;

    if config.archive.backend != "file" {
        println!(
            "Archive backend is '{}'; only the file backend keeps batches between runs.",
            config.archive.backend
        );
        return Ok(ExitCode::SUCCESS);
    }

    let path = config.archive.resolved_path();
    let batches = JsonlFileSink::read_all(&path)
        .with_context(|| format!("Failed to read archive at {}", path.display()))?;

    println!("🗄  Archive: {}", path.display());
    println!("─────────────────────────────────────");
    if batches.is_empty() {
        println!("  (no archived batches)");
        return Ok(ExitCode::SUCCESS);
    }

    let shown = recent(&batches, limit);
    for batch in shown {
        println!(
            "  {}  {}  {:>3} turns  ~{:>6} tokens  {}",
            short_id(&batch.id),
            batch.pruned_at.format("%Y-%m-%d %H:%M"),
            batch.len(),
            batch.estimated_tokens,
            batch.description
        );
    }
    println!();
    println!("  {} of {} batches shown", shown.len(), batches.len());
    Ok(ExitCode::SUCCESS)
}

/// The newest `limit` batches, still oldest first.
fn recent(batches: &[ArchiveBatch], limit: Option<usize>) -> &[ArchiveBatch] {
    let keep = limit.unwrap_or(batches.len()).min(batches.len());
    &batches[batches.len() - keep..]
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
