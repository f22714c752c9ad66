//! CLI for the ccdl crawl-download worker.

mod commands;

use anyhow::Result;
use ccdl_core::config::{self, CcdlConfig, WorkerSettings};
use ccdl_core::store;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commands::{run_check_schedule, run_import, run_reclaim, run_status, run_worker};

/// Top-level CLI for the ccdl worker.
#[derive(Debug, Parser)]
#[command(name = "ccdl")]
#[command(about = "ccdl: distributed crawl-download worker", long_about = None)]
pub struct Cli {
    /// Config directory (default.toml plus overlays). Defaults to ~/.config/ccdl.
    #[arg(long, global = true, value_name = "DIR")]
    pub config: Option<PathBuf>,

    /// Log to stderr instead of the state-dir log file.
    #[arg(long, global = true)]
    pub stderr: bool,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Claim and download jobs until the backlog is drained or interrupted.
    Run,

    /// Add pending jobs from a file with one uri per line.
    Import {
        /// Path to the uri list (`#` comments and blank lines ignored).
        file: PathBuf,
    },

    /// Show job counts per download state.
    Status,

    /// Return stale Downloading jobs to Pending.
    Reclaim {
        /// Requeue jobs whose download started more than SECS seconds ago.
        #[arg(long, value_name = "SECS")]
        older_than: u64,
    },

    /// Report whether the current time is inside the download window.
    CheckSchedule,
}

impl Cli {
    fn load_config(&self) -> Result<CcdlConfig> {
        match &self.config {
            Some(dir) => config::load_dir(dir),
            None => config::load_or_init(),
        }
    }

    pub async fn run(self) -> Result<()> {
        let cfg = self.load_config()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match self.command {
            CliCommand::Run => {
                let settings = WorkerSettings::from_config(&cfg)?;
                let db = store::open(&cfg.database).await?;
                run_worker(db.as_ref(), &settings).await?;
            }
            CliCommand::Import { file } => {
                let db = store::open(&cfg.database).await?;
                run_import(db.as_ref(), &file).await?;
            }
            CliCommand::Status => {
                let db = store::open(&cfg.database).await?;
                run_status(db.as_ref()).await?;
            }
            CliCommand::Reclaim { older_than } => {
                let db = store::open(&cfg.database).await?;
                run_reclaim(db.as_ref(), older_than).await?;
            }
            CliCommand::CheckSchedule => {
                let settings = WorkerSettings::from_config(&cfg)?;
                run_check_schedule(&settings);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
