//! Progress reporting for the job being downloaded (bytes done, rate, ETA).
//!
//! The orchestrator sends snapshots to the CLI; consumers compute
//! rate = bytes_done / elapsed_secs and ETA = (total_bytes - bytes_done) / rate.

use crate::store::JobId;

/// Snapshot of download progress for one job (CLI-friendly).
#[derive(Debug, Clone)]
pub struct ProgressStats {
    pub job_id: JobId,
    /// Bytes received so far in the current attempt.
    pub bytes_done: u64,
    /// Declared size, once the server has sent one.
    pub total_bytes: Option<u64>,
    /// Elapsed time since the attempt started (seconds).
    pub elapsed_secs: f64,
}

impl ProgressStats {
    /// Download rate in bytes per second (0 if elapsed is 0).
    pub fn bytes_per_sec(&self) -> f64 {
        if self.elapsed_secs <= 0.0 {
            return 0.0;
        }
        self.bytes_done as f64 / self.elapsed_secs
    }

    /// Estimated seconds remaining (None if size unknown or nothing received yet).
    pub fn eta_secs(&self) -> Option<f64> {
        let total = self.total_bytes?;
        let remaining = total.saturating_sub(self.bytes_done);
        if remaining == 0 {
            return Some(0.0);
        }
        let rate = self.bytes_per_sec();
        if rate <= 0.0 {
            return None;
        }
        Some(remaining as f64 / rate)
    }

    /// Fraction complete in [0.0, 1.0], if the size is known.
    pub fn fraction(&self) -> Option<f64> {
        match self.total_bytes? {
            0 => Some(1.0),
            total => Some((self.bytes_done as f64 / total as f64).min(1.0)),
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.total_bytes, Some(total) if self.bytes_done >= total)
    }
}
