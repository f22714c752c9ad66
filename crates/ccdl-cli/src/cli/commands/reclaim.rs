//! `ccdl reclaim --older-than SECS` – requeue jobs left Downloading by dead workers.

use anyhow::{Context, Result};
use ccdl_core::store::JobStore;

pub async fn run_reclaim(db: &dyn JobStore, older_than_secs: u64) -> Result<()> {
    let age = chrono::Duration::try_seconds(i64::try_from(older_than_secs)?)
        .context("--older-than is too large")?;
    let cutoff = chrono::Utc::now() - age;
    let n = db.requeue_stale(cutoff).await?;
    tracing::info!(requeued = n, %cutoff, "reclaimed stale jobs");
    println!("Requeued {n} job(s) started before {cutoff}.");
    Ok(())
}
