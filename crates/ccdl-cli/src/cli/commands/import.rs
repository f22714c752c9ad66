//! `ccdl import <file>` – load pending jobs, one uri per line.

use anyhow::{Context, Result};
use ccdl_core::store::JobStore;
use std::path::Path;

/// Uris in `text`, skipping blank lines and `#` comments.
pub(crate) fn parse_uri_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

pub async fn run_import(db: &dyn JobStore, path: &Path) -> Result<()> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("read {}", path.display()))?;
    let uris = parse_uri_list(&text);
    let inserted = db.add_jobs(&uris).await?;
    tracing::info!(read = uris.len(), inserted, "imported jobs from {}", path.display());
    println!(
        "Added {} job(s); {} already present.",
        inserted,
        uris.len() as u64 - inserted
    );
    Ok(())
}
