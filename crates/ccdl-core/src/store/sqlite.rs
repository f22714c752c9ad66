//! SQLite backlog for single-host runs and tests.
//!
//! SQLite serialises writers, so the claim is a single `UPDATE .. RETURNING`
//! statement: two connections can never both flip the same row.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;
use std::str::FromStr;

use super::types::{ClaimedJob, Job, JobId, JobState, StateCounts, Worker, WorkerId, UNKNOWN_SIZE};
use super::{decode_state, JobStore};

/// SQLite-backed job store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    pub async fn connect(options: SqliteConnectOptions, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .context("connect to sqlite backlog")?;
        let store = SqliteStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Open (or create) the database file at `path`, creating parent dirs.
    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_file(path.as_ref(), 8).await
    }

    pub(super) async fn open_file(path: &Path, max_connections: u32) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        Self::connect(options, max_connections).await
    }

    /// In-memory database on a single connection (nothing touches disk).
    pub async fn open_memory() -> Result<Self> {
        Self::connect(SqliteConnectOptions::from_str("sqlite::memory:")?, 1).await
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uri TEXT NOT NULL UNIQUE,
                size INTEGER NOT NULL DEFAULT -1,
                started_at TEXT,
                finished_at TEXT,
                download_state INTEGER NOT NULL DEFAULT 0,
                worker_id INTEGER REFERENCES workers(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS jobs_download_state_idx ON jobs (download_state)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn job_from_row(row: &SqliteRow) -> Result<Job> {
    Ok(Job {
        id: row.try_get("id")?,
        uri: row.try_get("uri")?,
        size: row.try_get("size")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        state: decode_state(row.try_get("download_state")?)?,
        worker_id: row.try_get("worker_id")?,
    })
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn claim_next_pending(&self, now: DateTime<Utc>) -> Result<Option<ClaimedJob>> {
        let row = sqlx::query(
            r#"
            UPDATE jobs
            SET download_state = ?1,
                started_at = ?2
            WHERE id = (
                SELECT id FROM jobs
                WHERE download_state = ?3
                ORDER BY id ASC
                LIMIT 1
            )
            RETURNING id, uri
            "#,
        )
        .bind(JobState::Downloading.as_i16())
        .bind(now)
        .bind(JobState::Pending.as_i16())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(ClaimedJob {
            id: row.try_get("id")?,
            uri: row.try_get("uri")?,
        }))
    }

    async fn find_job_by_uri(&self, uri: &str) -> Result<Job> {
        let row = sqlx::query(
            r#"
            SELECT id, uri, size, started_at, finished_at, download_state, worker_id
            FROM jobs
            WHERE uri = ?1
            "#,
        )
        .bind(uri)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| anyhow::anyhow!("no job with uri {}", uri))?;
        job_from_row(&row)
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        let row = sqlx::query(
            r#"
            SELECT id, uri, size, started_at, finished_at, download_state, worker_id
            FROM jobs
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn find_or_create_worker(&self, name: &str) -> Result<Worker> {
        sqlx::query("INSERT INTO workers (name) VALUES (?1) ON CONFLICT (name) DO NOTHING")
            .bind(name)
            .execute(&self.pool)
            .await?;
        let row = sqlx::query("SELECT id, name FROM workers WHERE name = ?1")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(Worker {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
        })
    }

    async fn mark_finished(
        &self,
        id: JobId,
        worker: WorkerId,
        finished_at: DateTime<Utc>,
        size: i64,
    ) -> Result<bool> {
        let r = sqlx::query(
            r#"
            UPDATE jobs
            SET download_state = ?1,
                finished_at = ?2,
                size = ?3,
                worker_id = ?4
            WHERE id = ?5 AND download_state = ?6
            "#,
        )
        .bind(JobState::Finished.as_i16())
        .bind(finished_at)
        .bind(size)
        .bind(worker)
        .bind(id)
        .bind(JobState::Downloading.as_i16())
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected() == 1)
    }

    async fn mark_failed(&self, id: JobId) -> Result<bool> {
        let r = sqlx::query("UPDATE jobs SET download_state = ?1 WHERE id = ?2 AND download_state = ?3")
            .bind(JobState::Failed.as_i16())
            .bind(id)
            .bind(JobState::Downloading.as_i16())
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected() == 1)
    }

    async fn release_to_pending(&self, id: JobId) -> Result<bool> {
        let r = sqlx::query(
            r#"
            UPDATE jobs
            SET download_state = ?1,
                started_at = NULL
            WHERE id = ?2 AND download_state = ?3
            "#,
        )
        .bind(JobState::Pending.as_i16())
        .bind(id)
        .bind(JobState::Downloading.as_i16())
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected() == 1)
    }

    async fn add_jobs(&self, uris: &[String]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for uri in uris {
            let r = sqlx::query(
                r#"
                INSERT INTO jobs (uri, size, download_state)
                VALUES (?1, ?2, ?3)
                ON CONFLICT (uri) DO NOTHING
                "#,
            )
            .bind(uri)
            .bind(UNKNOWN_SIZE)
            .bind(JobState::Pending.as_i16())
            .execute(&mut *tx)
            .await?;
            inserted += r.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn count_by_state(&self) -> Result<StateCounts> {
        let rows = sqlx::query(
            "SELECT download_state, COUNT(*) AS n FROM jobs GROUP BY download_state",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut counts = StateCounts::default();
        for row in rows {
            let state = decode_state(row.try_get("download_state")?)?;
            let n: i64 = row.try_get("n")?;
            counts.add(state, n as u64);
        }
        Ok(counts)
    }

    async fn requeue_stale(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let r = sqlx::query(
            r#"
            UPDATE jobs
            SET download_state = ?1,
                started_at = NULL
            WHERE download_state = ?2
              AND julianday(started_at) < julianday(?3)
            "#,
        )
        .bind(JobState::Pending.as_i16())
        .bind(JobState::Downloading.as_i16())
        .bind(older_than)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected())
    }
}
