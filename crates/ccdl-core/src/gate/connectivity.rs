//! Connectivity gate: block until a HEAD ping succeeds.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::GateError;
use crate::config::ConnectivitySettings;
use crate::retry::{run_with_retry, AttemptError, RetryError};
use crate::transport::Transport;

/// Ping `settings.url` until it answers, retrying per `settings.retry`.
///
/// Exhaustion is returned as `GateError::Unreachable`; the worker treats it
/// as fatal since nothing downstream can work without the network.
pub async fn ensure_reachable(
    settings: &ConnectivitySettings,
    transport: Arc<dyn Transport>,
    cancel: &CancellationToken,
) -> Result<(), GateError> {
    let res = run_with_retry(&settings.retry, cancel, "connectivity check", |_| {
        let transport = Arc::clone(&transport);
        let url = settings.url.clone();
        let timeout = settings.timeout;
        async move {
            let ping = tokio::task::spawn_blocking(move || transport.ping(&url, timeout));
            tokio::select! {
                _ = cancel.cancelled() => Err(AttemptError::Cancelled),
                joined = ping => match joined {
                    Ok(res) => res.map_err(AttemptError::from),
                    Err(e) => Err(AttemptError::recoverable(e)),
                },
            }
        }
    })
    .await;

    match res {
        Ok(()) => {
            tracing::debug!(url = %settings.url, "connectivity check passed");
            Ok(())
        }
        Err(RetryError::Cancelled) => Err(GateError::Cancelled),
        Err(RetryError::Exhausted { attempts, .. }) => {
            tracing::error!(
                url = %settings.url,
                "connectivity check failed after {} retries",
                settings.retry.max_retries
            );
            Err(GateError::Unreachable {
                url: settings.url.clone(),
                attempts,
            })
        }
    }
}
