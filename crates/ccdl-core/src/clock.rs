//! Wall-clock access, injectable so schedule and timestamp logic can be tested.

use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Local time of day in `tz`.
    fn time_of_day(&self, tz: Tz) -> NaiveTime {
        self.now().with_timezone(&tz).time()
    }
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
