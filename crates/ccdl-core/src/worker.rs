//! The worker loop: gates, claim, download, repeat until drained or stopped.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::config::WorkerSettings;
use crate::download::{process_job, JobOutcome};
use crate::gate::{self, GateError};
use crate::lease;
use crate::progress::ProgressStats;
use crate::retry::RetryError;
use crate::store::JobStore;
use crate::transport::Transport;

/// Collaborators and settings shared by every step of one worker.
pub struct WorkerContext<'a> {
    pub settings: &'a WorkerSettings,
    pub store: &'a dyn JobStore,
    pub transport: Arc<dyn Transport>,
    pub clock: &'a dyn Clock,
    pub cancel: CancellationToken,
    pub progress_tx: Option<mpsc::Sender<ProgressStats>>,
}

/// Escalations that end the worker with a non-zero status.
#[derive(Debug, thiserror::Error)]
pub enum FatalError {
    #[error("{url} unreachable after {attempts} attempt(s)")]
    Unreachable { url: String, attempts: u32 },
    #[error("could not claim a job after {attempts} attempt(s): {last:#}")]
    ClaimExhausted { attempts: u32, last: anyhow::Error },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// No pending job was left to claim.
    Drained,
    /// Interrupted; any held job was returned to the pool.
    Cancelled,
}

/// Summary returned when the loop ends normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerReport {
    pub exit: WorkerExit,
    pub finished: u32,
    pub failed: u32,
}

/// Run jobs until the backlog is drained or the token is cancelled.
///
/// Connectivity exhaustion and claim exhaustion come back as `FatalError`
/// inside the `anyhow::Error`; neither leaves a job held.
pub async fn run_worker(ctx: &WorkerContext<'_>) -> Result<WorkerReport> {
    let settings = ctx.settings;
    let mut report = WorkerReport {
        exit: WorkerExit::Drained,
        finished: 0,
        failed: 0,
    };
    tracing::info!(worker = %settings.worker_name, "worker started");

    loop {
        if ctx.cancel.is_cancelled() {
            return Ok(stopped(report));
        }

        match gate::ensure_reachable(&settings.connectivity, Arc::clone(&ctx.transport), &ctx.cancel)
            .await
        {
            Ok(()) => {}
            Err(GateError::Cancelled) => return Ok(stopped(report)),
            Err(GateError::Unreachable { url, attempts }) => {
                return Err(FatalError::Unreachable { url, attempts }.into());
            }
        }

        match gate::await_window(&settings.schedule, settings.timezone, ctx.clock, &ctx.cancel).await {
            Ok(()) => {}
            Err(GateError::Cancelled) => return Ok(stopped(report)),
            Err(e) => return Err(e.into()),
        }

        let job = match lease::claim_next(ctx.store, &settings.claim_retry, ctx.clock, &ctx.cancel).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tracing::info!(
                    finished = report.finished,
                    failed = report.failed,
                    "backlog drained; worker exiting"
                );
                return Ok(report);
            }
            Err(RetryError::Cancelled) => return Ok(stopped(report)),
            Err(RetryError::Exhausted { attempts, last }) => {
                return Err(FatalError::ClaimExhausted { attempts, last }.into());
            }
        };

        match process_job(ctx, &job).await? {
            JobOutcome::Finished { .. } => report.finished += 1,
            JobOutcome::Failed { .. } => report.failed += 1,
            JobOutcome::Cancelled => return Ok(stopped(report)),
        }
    }
}

fn stopped(mut report: WorkerReport) -> WorkerReport {
    tracing::info!("cancellation received; worker stopping");
    report.exit = WorkerExit::Cancelled;
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::CcdlConfig;
    use crate::retry::RetryPolicy;
    use crate::store::{JobState, SqliteStore, UNKNOWN_SIZE};
    use crate::transport::fake::FakeTransport;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::tempdir;

    fn settings(root: &Path, max_retries: u32) -> WorkerSettings {
        let mut cfg = CcdlConfig::default();
        cfg.base_url = "http://mirror.test/data/".to_string();
        cfg.worker.name = "node-a".to_string();
        cfg.worker.download_path = root.to_path_buf();
        cfg.worker.max_retries = max_retries;
        cfg.worker.retry_interval_secs = 0.01;
        cfg.network.max_retries = 1;
        cfg.network.retry_interval_secs = 0.01;
        WorkerSettings::from_config(&cfg).unwrap()
    }

    async fn store_with(uris: &[&str]) -> SqliteStore {
        let store = SqliteStore::open_memory().await.unwrap();
        let uris: Vec<String> = uris.iter().map(|s| s.to_string()).collect();
        store.add_jobs(&uris).await.unwrap();
        store
    }

    fn ctx<'a>(
        settings: &'a WorkerSettings,
        store: &'a SqliteStore,
        transport: Arc<FakeTransport>,
        cancel: CancellationToken,
    ) -> WorkerContext<'a> {
        WorkerContext {
            settings,
            store,
            transport,
            clock: &SystemClock,
            cancel,
            progress_tx: None,
        }
    }

    #[tokio::test]
    async fn single_job_finishes_end_to_end() {
        let dir = tempdir().unwrap();
        let settings = settings(dir.path(), 3);
        let store = store_with(&["x"]).await;
        let transport = Arc::new(FakeTransport::serving(b"hello world"));

        let report = run_worker(&ctx(&settings, &store, transport.clone(), CancellationToken::new()))
            .await
            .unwrap();
        assert_eq!(report.exit, WorkerExit::Drained);
        assert_eq!(report.finished, 1);

        let job = store.find_job_by_uri("x").await.unwrap();
        assert_eq!(job.state, JobState::Finished);
        assert!(job.finished_at.is_some());
        assert_eq!(job.size, 11);
        let worker = store.find_or_create_worker("node-a").await.unwrap();
        assert_eq!(job.worker_id, Some(worker.id));

        assert_eq!(std::fs::read(dir.path().join("x")).unwrap(), b"hello world");
        assert_eq!(
            transport.fetched_urls.lock().unwrap().as_slice(),
            ["http://mirror.test/data/x".to_string()]
        );
    }

    #[tokio::test]
    async fn undeclared_length_records_unknown_size() {
        let dir = tempdir().unwrap();
        let settings = settings(dir.path(), 0);
        let store = store_with(&["y"]).await;
        let mut fake = FakeTransport::serving(b"abc");
        fake.declared_len = None;

        run_worker(&ctx(&settings, &store, Arc::new(fake), CancellationToken::new()))
            .await
            .unwrap();
        let job = store.find_job_by_uri("y").await.unwrap();
        assert_eq!(job.state, JobState::Finished);
        assert_eq!(job.size, UNKNOWN_SIZE);
    }

    #[tokio::test]
    async fn exhausted_fetch_marks_failed() {
        let dir = tempdir().unwrap();
        let settings = settings(dir.path(), 3);
        let store = store_with(&["crawl/bad"]).await;
        let mut fake = FakeTransport::serving(b"never");
        fake.fail_first = u32::MAX;
        let transport = Arc::new(fake);

        let report = run_worker(&ctx(&settings, &store, transport.clone(), CancellationToken::new()))
            .await
            .unwrap();
        assert_eq!(report.exit, WorkerExit::Drained);
        assert_eq!(report.failed, 1);
        assert_eq!(report.finished, 0);
        assert_eq!(transport.fetches(), 4);

        let job = store.find_job_by_uri("crawl/bad").await.unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert!(job.worker_id.is_none());
        assert!(!dir.path().join("crawl/bad").exists());
    }

    #[tokio::test]
    async fn transient_fetch_failure_then_success() {
        let dir = tempdir().unwrap();
        let settings = settings(dir.path(), 3);
        let store = store_with(&["z"]).await;
        let mut fake = FakeTransport::serving(b"ok");
        fake.fail_first = 2;
        let transport = Arc::new(fake);

        let report = run_worker(&ctx(&settings, &store, transport.clone(), CancellationToken::new()))
            .await
            .unwrap();
        assert_eq!(report.finished, 1);
        assert_eq!(transport.fetches(), 3);
        assert_eq!(
            store.find_job_by_uri("z").await.unwrap().state,
            JobState::Finished
        );
    }

    #[tokio::test]
    async fn cancellation_mid_fetch_returns_job_to_pending() {
        let dir = tempdir().unwrap();
        let settings = settings(dir.path(), 5);
        let store = store_with(&["crawl/2021/part-001", "crawl/2021/part-002"]).await;
        let cancel = CancellationToken::new();
        let mut fake = FakeTransport::serving(b"payload");
        fake.cancel_during_fetch = Some(cancel.clone());
        let transport = Arc::new(fake);

        let report = run_worker(&ctx(&settings, &store, transport.clone(), cancel))
            .await
            .unwrap();
        assert_eq!(report.exit, WorkerExit::Cancelled);
        assert_eq!(transport.fetches(), 1);

        let job = store.find_job_by_uri("crawl/2021/part-001").await.unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert!(job.started_at.is_none());
        assert!(!dir.path().join("crawl/2021/part-001").exists());

        let untouched = store.find_job_by_uri("crawl/2021/part-002").await.unwrap();
        assert_eq!(untouched.state, JobState::Pending);
    }

    #[tokio::test]
    async fn cancellation_during_length_lookup_returns_job_to_pending() {
        let dir = tempdir().unwrap();
        let settings = settings(dir.path(), 5);
        let store = store_with(&["crawl/2021/part-003"]).await;
        let cancel = CancellationToken::new();
        let mut fake = FakeTransport::serving(b"payload");
        fake.cancel_during_head = Some(cancel.clone());
        let transport = Arc::new(fake);

        let report = run_worker(&ctx(&settings, &store, transport.clone(), cancel))
            .await
            .unwrap();
        assert_eq!(report.exit, WorkerExit::Cancelled);
        assert_eq!(report.finished, 0);
        assert_eq!(transport.fetches(), 1);

        let job = store.find_job_by_uri("crawl/2021/part-003").await.unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert!(job.started_at.is_none());
        assert!(job.finished_at.is_none());
    }

    #[tokio::test]
    async fn cancellation_during_backoff_returns_job_to_pending() {
        let dir = tempdir().unwrap();
        let mut settings = settings(dir.path(), 3);
        settings.fetch_retry = RetryPolicy::new(3, Duration::from_secs(60));
        let store = store_with(&["crawl/slow"]).await;
        let mut fake = FakeTransport::serving(b"never");
        fake.fail_first = u32::MAX;
        let transport = Arc::new(fake);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let started = std::time::Instant::now();
        let report = run_worker(&ctx(&settings, &store, transport.clone(), cancel))
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(30));
        assert_eq!(report.exit, WorkerExit::Cancelled);
        assert_eq!(report.failed, 0);
        assert_eq!(transport.fetches(), 1);

        let job = store.find_job_by_uri("crawl/slow").await.unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert!(job.started_at.is_none());
        assert!(job.worker_id.is_none());
    }

    #[tokio::test]
    async fn exhaustion_logs_one_retry_line_per_retry() {
        let dir = tempdir().unwrap();
        let settings = settings(dir.path(), 3);
        let store = store_with(&["crawl/bad"]).await;
        let mut fake = FakeTransport::serving(b"never");
        fake.fail_first = u32::MAX;

        let logs = Arc::new(std::sync::Mutex::new(Vec::<u8>::new()));
        let sink = Arc::clone(&logs);
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .with_writer(move || LogBuf(Arc::clone(&sink)))
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let report = run_worker(&ctx(&settings, &store, Arc::new(fake), CancellationToken::new()))
            .await
            .unwrap();
        assert_eq!(report.failed, 1);

        let text = String::from_utf8(logs.lock().unwrap().clone()).unwrap();
        assert_eq!(text.matches("retry download after").count(), 3);
    }

    struct LogBuf(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn cancelled_before_start_claims_nothing() {
        let dir = tempdir().unwrap();
        let settings = settings(dir.path(), 1);
        let store = store_with(&["a"]).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let transport = Arc::new(FakeTransport::serving(b""));

        let report = run_worker(&ctx(&settings, &store, transport.clone(), cancel))
            .await
            .unwrap();
        assert_eq!(report.exit, WorkerExit::Cancelled);
        assert_eq!(transport.fetches(), 0);
        assert_eq!(store.count_by_state().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn drains_backlog_then_exits() {
        let dir = tempdir().unwrap();
        let settings = settings(dir.path(), 0);
        let store = store_with(&["a/1", "a/2", "b/3"]).await;
        let transport = Arc::new(FakeTransport::serving(b"data"));

        let report = run_worker(&ctx(&settings, &store, transport.clone(), CancellationToken::new()))
            .await
            .unwrap();
        assert_eq!(
            report,
            WorkerReport {
                exit: WorkerExit::Drained,
                finished: 3,
                failed: 0
            }
        );
        // One ping before each claim, including the final empty one.
        assert_eq!(transport.ping_calls.load(std::sync::atomic::Ordering::SeqCst), 4);
        let counts = store.count_by_state().await.unwrap();
        assert_eq!(counts.finished, 3);
        assert_eq!(counts.total(), 3);
    }

    #[tokio::test]
    async fn unreachable_network_is_fatal_and_claims_nothing() {
        let dir = tempdir().unwrap();
        let settings = settings(dir.path(), 1);
        let store = store_with(&["a"]).await;
        let mut fake = FakeTransport::serving(b"");
        fake.reachable = false;

        let err = run_worker(&ctx(&settings, &store, Arc::new(fake), CancellationToken::new()))
            .await
            .unwrap_err();
        match err.downcast_ref::<FatalError>() {
            Some(FatalError::Unreachable { attempts, .. }) => assert_eq!(*attempts, 2),
            other => panic!("expected Unreachable, got {other:?}"),
        }
        assert_eq!(store.count_by_state().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn unsafe_uri_fails_without_fetching() {
        let dir = tempdir().unwrap();
        let settings = settings(dir.path(), 3);
        let store = store_with(&["../escape"]).await;
        let transport = Arc::new(FakeTransport::serving(b"x"));

        let report = run_worker(&ctx(&settings, &store, transport.clone(), CancellationToken::new()))
            .await
            .unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(transport.fetches(), 0);
        assert_eq!(
            store.find_job_by_uri("../escape").await.unwrap().state,
            JobState::Failed
        );
    }

    #[tokio::test]
    async fn requeued_lease_is_not_finished() {
        let dir = tempdir().unwrap();
        let settings = settings(dir.path(), 0);
        let store = store_with(&["x"]).await;
        let claimed = store
            .claim_next_pending(chrono::Utc::now())
            .await
            .unwrap()
            .unwrap();
        // An operator requeues the job while the download is running.
        store.requeue_stale(chrono::Utc::now() + chrono::Duration::seconds(1)).await.unwrap();

        let transport = Arc::new(FakeTransport::serving(b"late"));
        let outcome = process_job(
            &ctx(&settings, &store, transport, CancellationToken::new()),
            &claimed,
        )
        .await
        .unwrap();
        assert!(matches!(outcome, JobOutcome::Finished { .. }));
        let job = store.get_job(claimed.id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert!(job.worker_id.is_none());
    }

    #[tokio::test]
    async fn progress_snapshots_are_sent() {
        let dir = tempdir().unwrap();
        let settings = settings(dir.path(), 0);
        let store = store_with(&["p"]).await;
        let (tx, mut rx) = mpsc::channel(16);
        let mut c = ctx(
            &settings,
            &store,
            Arc::new(FakeTransport::serving(b"12345")),
            CancellationToken::new(),
        );
        c.progress_tx = Some(tx);

        run_worker(&c).await.unwrap();
        drop(c);
        let mut last = None;
        while let Some(stats) = rx.recv().await {
            last = Some(stats);
        }
        let last = last.expect("at least one snapshot");
        assert_eq!(last.bytes_done, 5);
        assert!(last.is_complete());
    }
}
