//! Index statistics and connection overview.
//!
//! `cirrus stats` prints document count and store size of the configured
//! index; `cirrus status` checks the connection and whether the index
//! exists and holds data, which is what a caller needs before deciding
//! between reusing and recreating it.

use anyhow::Result;

use crate::backend;
use crate::config::Config;
use crate::error::BackendError;
use crate::progress::format_number;
use crate::schema::index_has_data;

/// Run the stats command: query the backend and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let backend = backend::connect(config)?;
    let index = &config.backend.index;

    let stats = match backend.stats(index).await {
        Ok(stats) => stats,
        Err(BackendError::IndexNotFound(_)) => {
            anyhow::bail!("index '{}' does not exist; run `cirrus init` first", index)
        }
        Err(e) => return Err(e.into()),
    };

    println!("Index Stats");
    println!("===========");
    println!();
    println!("  Backend:     {}", config.backend.url);
    println!("  Index:       {}", index);
    println!("  Documents:   {}", format_number(stats.doc_count));
    println!("  Size:        {}", format_bytes(stats.size_bytes));
    println!();

    Ok(())
}

/// Run the status command: connection check plus index state.
pub async fn run_status(config: &Config) -> Result<()> {
    let backend = backend::connect(config)?;
    let index = &config.backend.index;

    let info = backend.info().await?;
    println!("connected {}", config.backend.url);
    println!("  cluster: {}", info.cluster_name);
    println!("  version: {}", info.version);

    let exists = backend.index_exists(index).await?;
    let has_data = exists && index_has_data(backend.as_ref(), index).await?;
    let state = match (exists, has_data) {
        (false, _) => "missing",
        (true, false) => "empty",
        (true, true) => "has data",
    };
    println!("  index {}: {}", index, state);
    if has_data {
        println!("  hint: pass --recreate to ingest into a fresh index");
    }
    println!("ok");

    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
