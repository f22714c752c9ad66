//! Persistent job backlog (Postgres or SQLite via sqlx).
//!
//! The backlog is the only state shared between workers. Every method is a
//! short transaction: one claim, or one terminal-state write. Nothing here
//! holds a lock across a download.

mod postgres;
mod sqlite;
mod types;


use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgConnectOptions;
use std::path::Path;

use crate::config::{DatabaseConfig, DatabaseDriver};

pub use postgres::PgStore;
pub use sqlite::SqliteStore;
pub use types::*;

/// Operations the worker and admin commands need from the backlog.
///
/// Terminal writes (`mark_finished`, `mark_failed`, `release_to_pending`)
/// only apply to a job still in `Downloading` and return whether a row
/// changed, so a lease lost to an external requeue never regresses state.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Atomically move one `Pending` job to `Downloading`, stamping
    /// `started_at`. Concurrent callers never receive the same job.
    async fn claim_next_pending(&self, now: DateTime<Utc>) -> Result<Option<ClaimedJob>>;

    async fn find_job_by_uri(&self, uri: &str) -> Result<Job>;

    async fn get_job(&self, id: JobId) -> Result<Option<Job>>;

    /// Idempotent: concurrent calls with one name yield one row.
    async fn find_or_create_worker(&self, name: &str) -> Result<Worker>;

    async fn mark_finished(
        &self,
        id: JobId,
        worker: WorkerId,
        finished_at: DateTime<Utc>,
        size: i64,
    ) -> Result<bool>;

    async fn mark_failed(&self, id: JobId) -> Result<bool>;

    /// Return an interrupted job to the pool and clear `started_at`.
    async fn release_to_pending(&self, id: JobId) -> Result<bool>;

    /// Insert `Pending` jobs; uris already present are skipped.
    async fn add_jobs(&self, uris: &[String]) -> Result<u64>;

    async fn count_by_state(&self) -> Result<StateCounts>;

    /// Requeue `Downloading` jobs started before `older_than`.
    async fn requeue_stale(&self, older_than: DateTime<Utc>) -> Result<u64>;
}

/// Open the configured backlog and create its schema if missing.
///
/// For `sqlite`, `database` is a file path; missing parent directories are
/// created.
pub async fn open(cfg: &DatabaseConfig) -> Result<Box<dyn JobStore>> {
    let store: Box<dyn JobStore> = match DatabaseDriver::parse(&cfg.driver)? {
        DatabaseDriver::Postgres => {
            Box::new(PgStore::connect(pg_options(cfg), cfg.max_connections).await?)
        }
        DatabaseDriver::Sqlite => {
            let path = Path::new(&cfg.database);
            Box::new(SqliteStore::open_file(path, cfg.max_connections).await?)
        }
    };
    Ok(store)
}

/// Postgres connection options, field by field.
fn pg_options(cfg: &DatabaseConfig) -> PgConnectOptions {
    PgConnectOptions::new()
        .host(&cfg.host)
        .port(cfg.port)
        .username(&cfg.username)
        .password(&cfg.password)
        .database(&cfg.database)
}

fn decode_state(v: i16) -> Result<JobState> {
    JobState::from_i16(v).ok_or_else(|| anyhow::anyhow!("unknown download_state {}", v))
}
