//! One fetch attempt: stream the resource to disk, then ask for its declared length.
//!
//! Both requests belong to the attempt. A cancel at any point before the
//! attempt returns rolls the job back, even if the body is already on disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;

use crate::progress::ProgressStats;
use crate::retry::{classify, AttemptError};
use crate::store::{JobId, UNKNOWN_SIZE};
use crate::transport::FetchError;
use crate::worker::WorkerContext;

/// Run a single attempt on the blocking pool. Returns the size to record:
/// the declared `Content-Length`, or `UNKNOWN_SIZE`.
///
/// Both blocking requests watch the cancel token through their progress
/// callbacks, so a cancel surfaces as `AttemptError::Cancelled` once curl has
/// stopped and the partial file is gone.
pub(super) async fn fetch_once(
    ctx: &WorkerContext<'_>,
    job_id: JobId,
    url: &str,
    dest: &Path,
    attempt: u32,
) -> Result<i64, AttemptError> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("create {}", parent.display()))
            .map_err(AttemptError::Recoverable)?;
    }
    tracing::debug!(job_id, attempt, %url, "fetch attempt");

    let transport = Arc::clone(&ctx.transport);
    let cancel = ctx.cancel.clone();
    let progress_tx = ctx.progress_tx.clone();
    let url = url.to_string();
    let dest: PathBuf = dest.to_path_buf();

    let task = tokio::task::spawn_blocking(move || -> Result<Option<u64>, FetchError> {
        let started = Instant::now();
        let mut on_progress = |bytes_done: u64, total_bytes: Option<u64>| {
            if let Some(tx) = &progress_tx {
                let _ = tx.try_send(ProgressStats {
                    job_id,
                    bytes_done,
                    total_bytes,
                    elapsed_secs: started.elapsed().as_secs_f64(),
                });
            }
            !cancel.is_cancelled()
        };
        let written = transport.fetch(&url, &dest, &mut on_progress)?;
        tracing::debug!(job_id, written, "transfer complete");
        let declared = transport.head_length(&url, &|| !cancel.is_cancelled())?;
        if cancel.is_cancelled() {
            return Err(FetchError::Aborted);
        }
        Ok(declared)
    });

    let declared = match task.await {
        Ok(Ok(declared)) => declared,
        Ok(Err(e)) => {
            tracing::debug!(job_id, attempt, kind = ?classify(&e), "fetch attempt failed");
            return Err(e.into());
        }
        Err(join) => return Err(AttemptError::recoverable(join)),
    };
    Ok(declared
        .and_then(|n| i64::try_from(n).ok())
        .unwrap_or(UNKNOWN_SIZE))
}
