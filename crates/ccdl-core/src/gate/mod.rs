//! Pre-claim gates: network reachability and the time-of-day window.
//!
//! The worker loop passes both before every claim. Neither holds a job, so a
//! cancel here just ends the loop.

mod connectivity;
mod schedule;

pub use connectivity::ensure_reachable;
pub use schedule::{await_window, ScheduleWindow};

/// Why a gate did not open.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("{url} unreachable after {attempts} attempt(s)")]
    Unreachable { url: String, attempts: u32 },
    #[error("cancelled")]
    Cancelled,
}
