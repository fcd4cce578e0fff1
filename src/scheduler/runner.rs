//! Periodic job loops.
//!
//! Each job runs on its own task at a fixed cadence. A soft timeout sets a
//! cancellation flag the job checks between sub-steps; the hard timeout
//! aborts the job outright. Partial work lives in already-committed atomic
//! store operations and the rest is retried next cycle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::ops::CoreService;
use crate::ports::{Notifier, Payments};
use crate::scheduler::jobs::JobKind;

/// Spawns one interval loop per periodic job. Returns after spawning; the
/// loops run for the life of the process.
pub fn start_jobs<P: Payments, N: Notifier>(
    service: Arc<CoreService<P, N>>,
    cfg: SchedulerConfig,
) {
    for kind in JobKind::ALL {
        let service = Arc::clone(&service);
        let cfg = cfg.clone();

        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(kind.period_secs(&cfg).max(1)));
            // The first tick fires immediately; skip it so boot stays calm.
            ticker.tick().await;

            info!(job = kind.name(), period_secs = kind.period_secs(&cfg), "job loop started");

            loop {
                ticker.tick().await;
                run_once(&service, kind, &cfg).await;
            }
        });
    }
}

/// Runs one job cycle under the soft/hard timeout contract.
pub async fn run_once<P: Payments, N: Notifier>(
    service: &Arc<CoreService<P, N>>,
    kind: JobKind,
    cfg: &SchedulerConfig,
) {
    let cancelled = Arc::new(AtomicBool::new(false));

    let watchdog = tokio::spawn({
        let cancelled = Arc::clone(&cancelled);
        let soft = Duration::from_secs(cfg.soft_timeout_secs);
        async move {
            tokio::time::sleep(soft).await;
            cancelled.store(true, Ordering::Relaxed);
        }
    });

    let hard = Duration::from_secs(cfg.hard_timeout_secs);
    let now = Utc::now();

    let result = tokio::time::timeout(hard, async {
        match kind {
            JobKind::ClusterInterests => service.run_clustering(now, &cancelled).await,
            JobKind::OptimizeGroups => service.run_optimizer(now, &cancelled).await,
            JobKind::AutoConfirmSweep => service.run_sweep(now, &cancelled).await,
            JobKind::ReapExpired => service.run_reaper(now, &cancelled).await,
        }
    })
    .await;

    watchdog.abort();

    match result {
        Ok(Ok(())) => debug!(job = kind.name(), "job cycle complete"),
        Ok(Err(e)) => error!(job = kind.name(), error = ?e, "job cycle failed; retried next cycle"),
        Err(_) => {
            service
                .counters
                .job_timeouts
                .fetch_add(1, Ordering::Relaxed);
            warn!(
                job = kind.name(),
                hard_timeout_secs = cfg.hard_timeout_secs,
                "job hit hard timeout; aborted and retried next cycle"
            );
        }
    }
}
