//! Worker configuration: a directory of TOML files merged on top of `default.toml`.
//!
//! The raw `CcdlConfig` mirrors the files on disk. `WorkerSettings` (see
//! `settings`) is the validated form handed to the worker loop.

mod merge;
mod settings;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub use merge::merge_values;
pub use settings::{ConfigError, ConnectivitySettings, DatabaseDriver, ScheduleSettings, WorkerSettings};

/// Name of the base file every config directory must contain.
pub const DEFAULT_FILE: &str = "default.toml";

/// Connection parameters for the shared backlog database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// `postgres` or `sqlite`.
    pub driver: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    /// Database name (postgres) or file path (sqlite).
    pub database: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    4
}

/// Identity and download behaviour of this worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Name recorded on every job this worker finishes.
    pub name: String,
    /// Root directory downloads are written under (uri is appended).
    pub download_path: PathBuf,
    /// Retries after the first failed fetch attempt.
    pub max_retries: u32,
    /// Fixed pause between fetch attempts, in seconds.
    pub retry_interval_secs: f64,
}

/// Retry override for job acquisition (optional section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub retry_interval_secs: f64,
}

/// Time-of-day download window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// `HH:MM:SS` or `HH:MM`, local to `CcdlConfig::timezone`.
    pub start_time: String,
    pub end_time: String,
    /// How often to re-check the clock while outside the window.
    pub poll_interval_secs: f64,
}

/// Connectivity pre-check before each job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub connectivity_check_url: String,
    /// Socket/request timeout for the ping and for downloads.
    pub timeout_secs: f64,
    pub max_retries: u32,
    pub retry_interval_secs: f64,
}

/// Full configuration as loaded from disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CcdlConfig {
    /// Prefix every job uri is appended to (`{base_url}/{uri}`).
    pub base_url: String,
    /// IANA timezone name used for timestamps' wall clock and the schedule window.
    pub timezone: String,
    pub database: DatabaseConfig,
    pub worker: WorkerConfig,
    /// Optional retry policy for claiming jobs; worker values are used if missing.
    #[serde(default)]
    pub claim_retry: Option<RetryConfig>,
    pub scheduler: SchedulerConfig,
    pub network: NetworkConfig,
}

impl Default for CcdlConfig {
    fn default() -> Self {
        Self {
            base_url: "https://data.commoncrawl.org".to_string(),
            timezone: "UTC".to_string(),
            database: DatabaseConfig {
                driver: "postgres".to_string(),
                username: "ccdl".to_string(),
                password: "ccdl".to_string(),
                host: "localhost".to_string(),
                port: 5432,
                database: "ccdl".to_string(),
                max_connections: default_max_connections(),
            },
            worker: WorkerConfig {
                name: "worker-1".to_string(),
                download_path: PathBuf::from("downloads"),
                max_retries: 5,
                retry_interval_secs: 10.0,
            },
            claim_retry: None,
            scheduler: SchedulerConfig {
                enabled: false,
                start_time: "22:00:00".to_string(),
                end_time: "06:00:00".to_string(),
                poll_interval_secs: 60.0,
            },
            network: NetworkConfig {
                connectivity_check_url: "https://data.commoncrawl.org".to_string(),
                timeout_secs: 30.0,
                max_retries: 5,
                retry_interval_secs: 10.0,
            },
        }
    }
}

/// Default config directory: `~/.config/ccdl/`.
pub fn default_config_dir() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("ccdl")?;
    Ok(xdg_dirs.get_config_home().join("ccdl"))
}

/// Load the default config directory, writing a `default.toml` if none exists.
pub fn load_or_init() -> Result<CcdlConfig> {
    let dir = default_config_dir()?;
    let path = dir.join(DEFAULT_FILE);
    if !path.exists() {
        let default_cfg = CcdlConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        fs::create_dir_all(&dir)?;
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }
    load_dir(&dir)
}

/// Load `dir/default.toml`, then merge every other `*.toml` under `dir`
/// (recursively, sorted by path) on top of it.
pub fn load_dir(dir: &Path) -> Result<CcdlConfig> {
    let base_path = dir.join(DEFAULT_FILE);
    let mut merged = read_value(&base_path)?;

    let mut overlays = Vec::new();
    collect_toml_files(dir, &mut overlays)?;
    overlays.sort();
    for path in overlays {
        if path == base_path {
            continue;
        }
        let overlay = read_value(&path)?;
        tracing::debug!("merging config overlay {}", path.display());
        merge_values(&mut merged, overlay);
    }

    let cfg = merged
        .try_into::<CcdlConfig>()
        .with_context(|| format!("invalid config in {}", dir.display()))?;
    Ok(cfg)
}

fn read_value(path: &Path) -> Result<toml::Value> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("read config {}", path.display()))?;
    let value: toml::Value =
        toml::from_str(&data).with_context(|| format!("parse config {}", path.display()))?;
    Ok(value)
}

fn collect_toml_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("read dir {}", dir.display()))? {
        let path = entry?.path();
        if path.is_dir() {
            collect_toml_files(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            out.push(path);
        }
    }
    Ok(())
}
