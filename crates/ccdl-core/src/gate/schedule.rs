//! Schedule gate: hold the worker until local time is inside the window.

use chrono::NaiveTime;
use chrono_tz::Tz;
use tokio_util::sync::CancellationToken;

use super::GateError;
use crate::clock::Clock;
use crate::config::ScheduleSettings;

/// Daily time-of-day window, inclusive at both ends.
///
/// `start > end` means the window wraps midnight (e.g. 22:00-06:00).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl ScheduleWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn wraps_midnight(&self) -> bool {
        self.start > self.end
    }

    pub fn contains(&self, now: NaiveTime) -> bool {
        if self.wraps_midnight() {
            !(self.end < now && now < self.start)
        } else {
            self.start <= now && now <= self.end
        }
    }
}

/// Return once local time (in `tz`) falls inside the window, polling every
/// `poll_interval`. A no-op when the schedule is disabled.
pub async fn await_window(
    settings: &ScheduleSettings,
    tz: Tz,
    clock: &dyn Clock,
    cancel: &CancellationToken,
) -> Result<(), GateError> {
    if !settings.enabled {
        return Ok(());
    }
    let window = settings.window;
    let mut waiting = false;
    loop {
        let now = clock.time_of_day(tz);
        if window.contains(now) {
            if waiting {
                tracing::info!(%now, "download window open");
            }
            return Ok(());
        }
        if !waiting {
            tracing::info!(
                start = %window.start,
                end = %window.end,
                %now,
                "outside download window; waiting"
            );
            waiting = true;
        }
        tokio::select! {
            _ = cancel.cancelled() => return Err(GateError::Cancelled),
            _ = tokio::time::sleep(settings.poll_interval) => {}
        }
    }
}
