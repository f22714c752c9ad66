use std::time::Duration;

/// Decision returned by the retry policy after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Give up; the caller escalates.
    NoRetry,
    /// Retry after the given delay.
    RetryAfter(Duration),
}

/// Fixed-interval retry policy.
///
/// `max_retries` counts retries, not attempts: a permanently failing
/// operation runs `max_retries + 1` times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            interval: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, interval: Duration) -> Self {
        Self {
            max_retries,
            interval,
        }
    }

    /// Total attempts before escalation.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Decide what to do after a failure, given how many retries already ran.
    pub fn decide(&self, retries_done: u32) -> RetryDecision {
        if retries_done >= self.max_retries {
            return RetryDecision::NoRetry;
        }
        RetryDecision::RetryAfter(self.interval)
    }

    /// Retries still available after `retries_done`.
    pub fn retries_left(&self, retries_done: u32) -> u32 {
        self.max_retries.saturating_sub(retries_done)
    }
}
