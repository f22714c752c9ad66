//! Validated, resolved configuration threaded through the worker.

use chrono::NaiveTime;
use chrono_tz::Tz;
use std::path::PathBuf;
use std::time::Duration;

use super::{CcdlConfig, RetryConfig};
use crate::gate::ScheduleWindow;
use crate::retry::RetryPolicy;

/// Reasons a loaded config cannot drive a worker.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{field}: invalid time of day {value:?} (expected HH:MM:SS or HH:MM)")]
    InvalidTime { field: &'static str, value: String },
    #[error("unknown timezone {0:?}")]
    UnknownTimezone(String),
    #[error("unknown database driver {0:?} (expected postgres or sqlite)")]
    UnknownDriver(String),
    #[error("{field}: invalid duration {value} seconds")]
    InvalidDuration { field: &'static str, value: f64 },
    #[error("worker.name must not be empty")]
    EmptyWorkerName,
}

/// Supported backlog databases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseDriver {
    Postgres,
    Sqlite,
}

impl DatabaseDriver {
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(DatabaseDriver::Postgres),
            "sqlite" => Ok(DatabaseDriver::Sqlite),
            _ => Err(ConfigError::UnknownDriver(s.to_string())),
        }
    }
}

/// Connectivity gate parameters.
#[derive(Debug, Clone)]
pub struct ConnectivitySettings {
    pub url: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

/// Schedule gate parameters.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleSettings {
    pub enabled: bool,
    pub window: ScheduleWindow,
    pub poll_interval: Duration,
}

/// Everything the worker loop needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub base_url: String,
    pub timezone: Tz,
    pub worker_name: String,
    pub download_root: PathBuf,
    pub fetch_retry: RetryPolicy,
    pub claim_retry: RetryPolicy,
    /// Socket/request timeout for downloads.
    pub request_timeout: Duration,
    pub connectivity: ConnectivitySettings,
    pub schedule: ScheduleSettings,
}

impl WorkerSettings {
    pub fn from_config(cfg: &CcdlConfig) -> Result<Self, ConfigError> {
        if cfg.worker.name.trim().is_empty() {
            return Err(ConfigError::EmptyWorkerName);
        }
        DatabaseDriver::parse(&cfg.database.driver)?;

        let timezone: Tz = cfg
            .timezone
            .parse()
            .map_err(|_| ConfigError::UnknownTimezone(cfg.timezone.clone()))?;

        let fetch_retry = RetryPolicy::new(
            cfg.worker.max_retries,
            secs("worker.retry_interval_secs", cfg.worker.retry_interval_secs)?,
        );
        let claim_retry = match &cfg.claim_retry {
            Some(RetryConfig {
                max_retries,
                retry_interval_secs,
            }) => RetryPolicy::new(
                *max_retries,
                secs("claim_retry.retry_interval_secs", *retry_interval_secs)?,
            ),
            None => fetch_retry,
        };

        let request_timeout = secs("network.timeout_secs", cfg.network.timeout_secs)?;
        let connectivity = ConnectivitySettings {
            url: cfg.network.connectivity_check_url.clone(),
            timeout: request_timeout,
            retry: RetryPolicy::new(
                cfg.network.max_retries,
                secs("network.retry_interval_secs", cfg.network.retry_interval_secs)?,
            ),
        };

        let schedule = ScheduleSettings {
            enabled: cfg.scheduler.enabled,
            window: ScheduleWindow::new(
                parse_time_of_day("scheduler.start_time", &cfg.scheduler.start_time)?,
                parse_time_of_day("scheduler.end_time", &cfg.scheduler.end_time)?,
            ),
            poll_interval: secs("scheduler.poll_interval_secs", cfg.scheduler.poll_interval_secs)?,
        };

        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            timezone,
            worker_name: cfg.worker.name.trim().to_string(),
            download_root: cfg.worker.download_path.clone(),
            fetch_retry,
            claim_retry,
            request_timeout,
            connectivity,
            schedule,
        })
    }

    /// Full download URL for a job key.
    pub fn job_url(&self, uri: &str) -> String {
        format!("{}/{}", self.base_url, uri.trim_start_matches('/'))
    }
}

/// Parse `HH:MM:SS` (or `HH:MM`) into a time of day.
pub fn parse_time_of_day(field: &'static str, value: &str) -> Result<NaiveTime, ConfigError> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .map_err(|_| ConfigError::InvalidTime {
            field,
            value: value.to_string(),
        })
}

fn secs(field: &'static str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|_| ConfigError::InvalidDuration { field, value })
}
