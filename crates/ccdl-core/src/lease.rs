//! Job acquisition: claim one `Pending` job, retrying transient store errors.
//!
//! "No job" is a normal answer, not a failure; only store errors are retried.

use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::retry::{run_with_retry, AttemptError, RetryError, RetryPolicy};
use crate::store::{ClaimedJob, JobStore};

/// Claim the next pending job under `policy`.
///
/// `Ok(None)` means the backlog has nothing to hand out. `Exhausted` means
/// the store kept failing; no job is held, so the caller may simply stop.
pub async fn claim_next(
    store: &dyn JobStore,
    policy: &RetryPolicy,
    clock: &dyn Clock,
    cancel: &CancellationToken,
) -> Result<Option<ClaimedJob>, RetryError> {
    let claimed = run_with_retry(policy, cancel, "claim job", |_| async move {
        store
            .claim_next_pending(clock.now())
            .await
            .map_err(AttemptError::Recoverable)
    })
    .await?;

    match &claimed {
        Some(job) => tracing::info!(job_id = job.id, uri = %job.uri, "New job fetched"),
        None => tracing::info!("no unclaimed job in backlog"),
    }
    Ok(claimed)
}
