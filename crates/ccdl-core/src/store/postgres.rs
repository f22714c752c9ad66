//! Postgres backlog shared by every worker.
//!
//! Claims select with `FOR UPDATE SKIP LOCKED`: a row another claimer has
//! locked is invisible, so concurrent claimers never block each other and
//! never take the same job. The lock lives only for the claim transaction;
//! the `Downloading` state is what keeps the lease afterwards.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::{Pool, Postgres, Row};

use super::types::{ClaimedJob, Job, JobId, JobState, StateCounts, Worker, WorkerId, UNKNOWN_SIZE};
use super::{decode_state, JobStore};

/// Advisory lock key serialising schema creation across workers starting together.
const MIGRATION_LOCK_KEY: i64 = 0x6363_646c;

/// Postgres-backed job store.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool<Postgres>,
}

impl PgStore {
    pub async fn connect(options: PgConnectOptions, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .context("connect to postgres backlog")?;
        let store = PgStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workers (
                id BIGSERIAL PRIMARY KEY,
                name TEXT NOT NULL UNIQUE
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id BIGSERIAL PRIMARY KEY,
                uri TEXT NOT NULL UNIQUE,
                size BIGINT NOT NULL DEFAULT -1,
                started_at TIMESTAMPTZ,
                finished_at TIMESTAMPTZ,
                download_state SMALLINT NOT NULL DEFAULT 0,
                worker_id BIGINT REFERENCES workers(id)
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS jobs_download_state_idx ON jobs (download_state)")
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

fn job_from_row(row: &PgRow) -> Result<Job> {
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
impl JobStore for PgStore {
    async fn claim_next_pending(&self, now: DateTime<Utc>) -> Result<Option<ClaimedJob>> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            r#"
            SELECT id, uri FROM jobs
            WHERE download_state = $1
            ORDER BY id ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(JobState::Pending.as_i16())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };
        let job = ClaimedJob {
            id: row.try_get("id")?,
            uri: row.try_get("uri")?,
        };

        sqlx::query(
            r#"
            UPDATE jobs
            SET download_state = $1,
                started_at = $2
            WHERE id = $3
            "#,
        )
        .bind(JobState::Downloading.as_i16())
        .bind(now)
        .bind(job.id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(Some(job))
    }

    async fn find_job_by_uri(&self, uri: &str) -> Result<Job> {
        let row = sqlx::query(
            r#"
            SELECT id, uri, size, started_at, finished_at, download_state, worker_id
            FROM jobs
            WHERE uri = $1
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
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn find_or_create_worker(&self, name: &str) -> Result<Worker> {
        sqlx::query("INSERT INTO workers (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
            .bind(name)
            .execute(&self.pool)
            .await?;
        let row = sqlx::query("SELECT id, name FROM workers WHERE name = $1")
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
            SET download_state = $1,
                finished_at = $2,
                size = $3,
                worker_id = $4
            WHERE id = $5 AND download_state = $6
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
        let r = sqlx::query("UPDATE jobs SET download_state = $1 WHERE id = $2 AND download_state = $3")
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
            SET download_state = $1,
                started_at = NULL
            WHERE id = $2 AND download_state = $3
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
                VALUES ($1, $2, $3)
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
            SET download_state = $1,
                started_at = NULL
            WHERE download_state = $2
              AND started_at < $3
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
