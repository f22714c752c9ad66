//! `ccdl check-schedule` – is now inside the download window?

use ccdl_core::clock::{Clock, SystemClock};
use ccdl_core::config::WorkerSettings;

pub fn run_check_schedule(settings: &WorkerSettings) {
    let schedule = &settings.schedule;
    let now = SystemClock.time_of_day(settings.timezone);
    if !schedule.enabled {
        println!("Schedule disabled; downloads may run at any time ({now} {}).", settings.timezone);
        return;
    }
    let inside = schedule.window.contains(now);
    println!(
        "Window {}-{} {}: now {} is {}.",
        schedule.window.start,
        schedule.window.end,
        settings.timezone,
        now.format("%H:%M:%S"),
        if inside { "inside" } else { "outside" }
    );
}
