//! Retry loop: run an async operation until success, exhaustion, or cancellation.

use std::future::Future;
use tokio_util::sync::CancellationToken;

use super::error::{AttemptError, RetryError};
use super::policy::{RetryDecision, RetryPolicy};

/// Runs `op` until it succeeds or the policy says stop.
///
/// Each attempt is a full redo; `op` receives the 1-based attempt number.
/// A `Cancelled` attempt, or a cancel during the backoff sleep, returns
/// `RetryError::Cancelled` at once. `what` names the operation in log lines.
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    what: &str,
    mut op: F,
) -> Result<T, RetryError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AttemptError>>,
{
    let mut retries = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }
        let attempt = retries + 1;
        let err = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(AttemptError::Cancelled) => return Err(RetryError::Cancelled),
            Err(AttemptError::Recoverable(err)) => err,
        };
        tracing::error!(attempt, "{} failed: {:#}", what, err);
        match policy.decide(retries) {
            RetryDecision::NoRetry => {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            }
            RetryDecision::RetryAfter(delay) => {
                tracing::info!(
                    retries_left = policy.retries_left(retries),
                    "retry {} after {:.1}s",
                    what,
                    delay.as_secs_f64()
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                retries += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let policy = RetryPolicy::new(3, Duration::from_secs(5));
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let out = run_with_retry(&policy, &cancel, "op", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(AttemptError::recoverable(anyhow::anyhow!("blip")))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_exactly_max_retries_plus_one() {
        let policy = RetryPolicy::new(4, Duration::from_secs(2));
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();
        let res: Result<(), _> = run_with_retry(&policy, &cancel, "op", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AttemptError::recoverable(anyhow::anyhow!("down"))) }
        })
        .await;
        match res {
            Err(RetryError::Exhausted { attempts, .. }) => assert_eq!(attempts, 5),
            other => panic!("expected Exhausted, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert!(started.elapsed() >= Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_attempt_is_not_retried() {
        let policy = RetryPolicy::new(10, Duration::from_secs(1));
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let res: Result<(), _> = run_with_retry(&policy, &cancel, "op", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AttemptError::Cancelled) }
        })
        .await;
        assert!(matches!(res, Err(RetryError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff_stops_retrying() {
        let policy = RetryPolicy::new(10, Duration::from_secs(60));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });
        let calls = AtomicU32::new(0);
        let res: Result<(), _> = run_with_retry(&policy, &cancel, "op", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AttemptError::recoverable(anyhow::anyhow!("down"))) }
        })
        .await;
        assert!(res.unwrap_err().is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn already_cancelled_skips_the_operation() {
        let policy = RetryPolicy::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = AtomicU32::new(0);
        let res: Result<(), _> = run_with_retry(&policy, &cancel, "op", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;
        assert!(matches!(res, Err(RetryError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
