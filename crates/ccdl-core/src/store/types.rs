//! Types stored in and returned by the job store.

use chrono::{DateTime, Utc};

/// Job identifier (surrogate key).
pub type JobId = i64;

/// Worker identifier (surrogate key).
pub type WorkerId = i64;

/// `size` of a job whose length was never declared.
pub const UNKNOWN_SIZE: i64 = -1;

/// Download state, stored as a small integer.
///
/// Forward path: `Pending -> Downloading -> Finished | Failed`. The only
/// backward step is `Downloading -> Pending` (interrupted download).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Pending,
    Downloading,
    Finished,
    Failed,
}

impl JobState {
    pub const ALL: [JobState; 4] = [
        JobState::Pending,
        JobState::Downloading,
        JobState::Finished,
        JobState::Failed,
    ];

    pub fn as_i16(self) -> i16 {
        match self {
            JobState::Pending => 0,
            JobState::Downloading => 1,
            JobState::Finished => 2,
            JobState::Failed => 3,
        }
    }

    pub fn from_i16(v: i16) -> Option<Self> {
        match v {
            0 => Some(JobState::Pending),
            1 => Some(JobState::Downloading),
            2 => Some(JobState::Finished),
            3 => Some(JobState::Failed),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Downloading => "downloading",
            JobState::Finished => "finished",
            JobState::Failed => "failed",
        }
    }

    /// Whether the normal flow may move a job from `self` to `next`.
    pub fn can_transition_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Pending, JobState::Downloading)
                | (JobState::Downloading, JobState::Finished)
                | (JobState::Downloading, JobState::Failed)
                | (JobState::Downloading, JobState::Pending)
        )
    }
}

/// Full job row.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub uri: String,
    /// Declared byte length, or `UNKNOWN_SIZE`.
    pub size: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub state: JobState,
    pub worker_id: Option<WorkerId>,
}

/// Identity of a job this process just moved to `Downloading`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedJob {
    pub id: JobId,
    pub uri: String,
}

/// Named worker credited with finished jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Worker {
    pub id: WorkerId,
    pub name: String,
}

/// Number of jobs in each state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCounts {
    pub pending: u64,
    pub downloading: u64,
    pub finished: u64,
    pub failed: u64,
}

impl StateCounts {
    pub fn add(&mut self, state: JobState, n: u64) {
        match state {
            JobState::Pending => self.pending += n,
            JobState::Downloading => self.downloading += n,
            JobState::Finished => self.finished += n,
            JobState::Failed => self.failed += n,
        }
    }

    pub fn get(&self, state: JobState) -> u64 {
        match state {
            JobState::Pending => self.pending,
            JobState::Downloading => self.downloading,
            JobState::Finished => self.finished,
            JobState::Failed => self.failed,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.downloading + self.finished + self.failed
    }
}
