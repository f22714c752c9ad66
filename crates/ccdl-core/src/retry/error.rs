//! Typed attempt and retry outcomes.

/// Failure of a single attempt. Success is `Ok(T)`.
#[derive(Debug, thiserror::Error)]
pub enum AttemptError {
    /// Transient failure; the executor may run the operation again.
    #[error(transparent)]
    Recoverable(anyhow::Error),
    /// User-initiated interrupt. Never retried.
    #[error("cancelled")]
    Cancelled,
}

impl AttemptError {
    pub fn recoverable(err: impl Into<anyhow::Error>) -> Self {
        AttemptError::Recoverable(err.into())
    }
}

/// Final outcome of `run_with_retry` when no attempt succeeded.
#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    #[error("gave up after {attempts} attempt(s): {last:#}")]
    Exhausted { attempts: u32, last: anyhow::Error },
    #[error("cancelled")]
    Cancelled,
}

impl RetryError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled)
    }
}
