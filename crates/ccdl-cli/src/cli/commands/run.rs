//! `ccdl run` – the worker loop, with Ctrl-C/SIGTERM wired to cancellation.

use anyhow::Result;
use ccdl_core::clock::SystemClock;
use ccdl_core::config::WorkerSettings;
use ccdl_core::progress::ProgressStats;
use ccdl_core::store::JobStore;
use ccdl_core::transport::CurlTransport;
use ccdl_core::worker::{self, WorkerContext, WorkerExit};
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const PROGRESS_INTERVAL_MS: u64 = 500;

pub async fn run_worker(db: &dyn JobStore, settings: &WorkerSettings) -> Result<()> {
    let cancel = CancellationToken::new();
    spawn_signal_listener(cancel.clone());

    let (progress_tx, progress_rx) = mpsc::channel::<ProgressStats>(16);
    let progress_handle = tokio::spawn(print_progress(progress_rx));

    let ctx = WorkerContext {
        settings,
        store: db,
        transport: Arc::new(CurlTransport::new(settings.request_timeout)),
        clock: &SystemClock,
        cancel,
        progress_tx: Some(progress_tx),
    };
    let result = worker::run_worker(&ctx).await;
    drop(ctx);
    let _ = progress_handle.await;

    let report = result?;
    println!("{} finished, {} failed", report.finished, report.failed);
    match report.exit {
        WorkerExit::Drained => println!("No pending jobs left."),
        WorkerExit::Cancelled => println!("Interrupted; current job returned to the backlog."),
    }
    Ok(())
}

/// First Ctrl-C (or SIGTERM on unix) cancels; a second one exits at once.
fn spawn_signal_listener(cancel: CancellationToken) {
    let (tx, mut rx) = mpsc::channel(4);
    tokio::spawn(forward_signals(tx));
    tokio::spawn(async move {
        if escalate(&cancel, &mut rx).await {
            tracing::warn!("second interrupt; exiting without releasing the current job");
            eprintln!("Interrupted twice; exiting now.");
            std::process::exit(130);
        }
    });
}

/// Cancel on the first interrupt. Returns true when a second one arrives,
/// false if the signal source closes first.
pub(crate) async fn escalate(
    cancel: &CancellationToken,
    interrupts: &mut mpsc::Receiver<()>,
) -> bool {
    if interrupts.recv().await.is_none() {
        return false;
    }
    tracing::info!("interrupt received; cancelling (interrupt again to exit immediately)");
    cancel.cancel();
    interrupts.recv().await.is_some()
}

async fn forward_signals(tx: mpsc::Sender<()>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => Some(term),
            Err(e) => {
                tracing::warn!("cannot listen for SIGTERM: {}", e);
                None
            }
        };
        loop {
            tokio::select! {
                res = tokio::signal::ctrl_c() => {
                    if res.is_err() {
                        break;
                    }
                }
                Some(()) = async {
                    match term.as_mut() {
                        Some(term) => term.recv().await,
                        None => std::future::pending().await,
                    }
                } => {}
            }
            if tx.send(()).await.is_err() {
                break;
            }
        }
    }
    #[cfg(not(unix))]
    {
        while tokio::signal::ctrl_c().await.is_ok() {
            if tx.send(()).await.is_err() {
                break;
            }
        }
    }
}

async fn print_progress(mut rx: mpsc::Receiver<ProgressStats>) {
    let mut last_print = Instant::now();
    let mut printed = false;
    while let Some(stats) = rx.recv().await {
        let now = Instant::now();
        if now.duration_since(last_print).as_millis() as u64 >= PROGRESS_INTERVAL_MS
            || stats.is_complete()
        {
            let done_mib = stats.bytes_done as f64 / 1_048_576.0;
            let rate_mib = stats.bytes_per_sec() / 1_048_576.0;
            let total = match (stats.total_bytes, stats.fraction()) {
                (Some(total), Some(frac)) => {
                    format!("{:.1} MiB ({:.1}%)", total as f64 / 1_048_576.0, frac * 100.0)
                }
                _ => "?".to_string(),
            };
            let eta = stats
                .eta_secs()
                .map(|s| format!("{:.0}s", s))
                .unwrap_or_else(|| "?".to_string());
            print!(
                "\r  job {}: {:.1} / {}  {:.2} MiB/s  ETA {}  ",
                stats.job_id, done_mib, total, rate_mib, eta
            );
            let _ = std::io::stdout().flush();
            last_print = now;
            printed = true;
        }
    }
    if printed {
        println!();
    }
}
