//! Per-job orchestration: fetch with retries, then commit exactly one terminal state.
//!
//! A claimed job ends in one of three ways, each committed before
//! `process_job` returns:
//! - fetch succeeded: `Finished` with size, worker and `finished_at`
//! - retries exhausted (or the uri is unusable): `Failed`
//! - cancelled: back to `Pending` with `started_at` cleared

mod attempt;
mod path;

use anyhow::{Context, Result};

use crate::retry::{run_with_retry, RetryError};
use crate::store::{ClaimedJob, JobState};
use crate::worker::WorkerContext;

pub use path::{destination_path, UnsafeUri};

/// How a claimed job left the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Finished { size: i64 },
    Failed { attempts: u32 },
    /// Returned to the pool; the worker must stop.
    Cancelled,
}

/// Download `job` and record its outcome.
///
/// `Err` is reserved for store failures while committing; the job may then
/// still be `Downloading` and is left for `requeue_stale`.
pub async fn process_job(ctx: &WorkerContext<'_>, job: &ClaimedJob) -> Result<JobOutcome> {
    let dest = match destination_path(&ctx.settings.download_root, &job.uri) {
        Ok(dest) => dest,
        Err(e) => {
            tracing::error!(job_id = job.id, uri = %job.uri, "{}", e);
            commit_failed(ctx, job).await?;
            return Ok(JobOutcome::Failed { attempts: 0 });
        }
    };
    let url = ctx.settings.job_url(&job.uri);
    tracing::info!(job_id = job.id, %url, dest = %dest.display(), "downloading");

    let res = run_with_retry(&ctx.settings.fetch_retry, &ctx.cancel, "download", |n| {
        attempt::fetch_once(ctx, job.id, &url, &dest, n)
    })
    .await;

    match res {
        Ok(size) => {
            commit_finished(ctx, job, size).await?;
            Ok(JobOutcome::Finished { size })
        }
        Err(RetryError::Exhausted { attempts, last }) => {
            tracing::error!(
                job_id = job.id,
                uri = %job.uri,
                attempts,
                "download failed: {:#}",
                last
            );
            commit_failed(ctx, job).await?;
            Ok(JobOutcome::Failed { attempts })
        }
        Err(RetryError::Cancelled) => {
            commit_released(ctx, job).await?;
            Ok(JobOutcome::Cancelled)
        }
    }
}

async fn commit_finished(ctx: &WorkerContext<'_>, job: &ClaimedJob, size: i64) -> Result<()> {
    let row = ctx
        .store
        .find_job_by_uri(&job.uri)
        .await
        .with_context(|| format!("re-resolve job {}", job.uri))?;
    let worker = ctx
        .store
        .find_or_create_worker(&ctx.settings.worker_name)
        .await
        .with_context(|| format!("resolve worker {}", ctx.settings.worker_name))?;
    let updated = ctx
        .store
        .mark_finished(row.id, worker.id, ctx.clock.now(), size)
        .await?;
    if updated {
        tracing::info!(job_id = row.id, uri = %job.uri, size, worker = %worker.name, "Download finished");
    } else {
        lease_lost(ctx, job, JobState::Finished).await;
    }
    Ok(())
}

async fn commit_failed(ctx: &WorkerContext<'_>, job: &ClaimedJob) -> Result<()> {
    if ctx.store.mark_failed(job.id).await? {
        tracing::warn!(job_id = job.id, uri = %job.uri, "job marked failed");
    } else {
        lease_lost(ctx, job, JobState::Failed).await;
    }
    Ok(())
}

async fn commit_released(ctx: &WorkerContext<'_>, job: &ClaimedJob) -> Result<()> {
    let row = ctx
        .store
        .find_job_by_uri(&job.uri)
        .await
        .with_context(|| format!("re-resolve job {}", job.uri))?;
    if ctx.store.release_to_pending(row.id).await? {
        tracing::info!(job_id = row.id, uri = %job.uri, "download cancelled; job returned to pending");
    } else {
        lease_lost(ctx, job, JobState::Pending).await;
    }
    Ok(())
}

/// The row left `Downloading` while we held it (an external requeue).
async fn lease_lost(ctx: &WorkerContext<'_>, job: &ClaimedJob, wanted: JobState) {
    let current = match ctx.store.get_job(job.id).await {
        Ok(Some(row)) => row.state.as_str(),
        Ok(None) => "missing",
        Err(_) => "unknown",
    };
    tracing::warn!(
        job_id = job.id,
        uri = %job.uri,
        current,
        "lease lost; not moving job to {}",
        wanted.as_str()
    );
}
