//! Bounded retry with a fixed backoff.
//!
//! Used around job acquisition and around each fetch. The executor never
//! decides what exhaustion means; callers escalate (fatal exit, or a
//! `Failed` job) as their context requires. Cancellation is never retried.

mod classify;
mod error;
mod policy;
mod run;

pub use classify::{classify, ErrorKind};
pub use error::{AttemptError, RetryError};
pub use policy::{RetryDecision, RetryPolicy};
pub use run::run_with_retry;
