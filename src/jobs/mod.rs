//! Background job scheduler.
//!
//! Every [`JobKind`] gets its own tokio task ticking on its own interval. A
//! tick runs the job body under that kind's [`JobLock`]; a held lock skips the
//! tick, so two processes sharing a database never run the same job at once.
//! Failures are confined to the tick that raised them. A store outage skips
//! the rest of the cycle and the next tick tries again.
//!
//! Job bodies live on [`JobRunner::run_job`] so they can be driven directly
//! without the timers.

use crate::config::JobsConfig;
use crate::downloader::DownloadWorker;
use crate::error::Result;
use crate::job_lock::{JobKind, JobLock};
use crate::reconcile::Reconciler;
use crate::refresh::{RefreshOrchestrator, RefreshOutcome};
use crate::types::Event;
use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Reason reported when a tick finds its lock held elsewhere
pub const LOCK_HELD_REASON: &str = "lock held by another runner";

/// Result of one job tick
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobRun {
    /// The body ran and changed this many records
    Completed {
        /// Records changed (items discovered, files reset, sizes filled, ...)
        affected: u64,
    },
    /// Another holder had the lock
    Skipped,
}

/// Runs job bodies under their locks and reports the outcome as events
#[derive(Clone)]
pub struct JobRunner {
    locks: JobLock,
    refresh: RefreshOrchestrator,
    reconciler: Reconciler,
    worker: DownloadWorker,
    event_tx: broadcast::Sender<Event>,
}

impl JobRunner {
    /// Create a runner from the engine's components
    pub fn new(
        locks: JobLock,
        refresh: RefreshOrchestrator,
        reconciler: Reconciler,
        worker: DownloadWorker,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            locks,
            refresh,
            reconciler,
            worker,
            event_tx,
        }
    }

    /// Run one tick of `kind`.
    ///
    /// Emits [`Event::JobCompleted`] or [`Event::JobSkipped`]. A store outage
    /// is reported as skipped and returned as the error.
    pub async fn run_job(&self, kind: JobKind) -> Result<JobRun> {
        debug!(job = %kind, "job tick");

        let result = match kind {
            JobKind::RefreshEpisodes => self.refresh_and_download().await,
            JobKind::CheckMissingFiles => {
                self.run_locked(kind, || self.reconciler.check_missing_files())
                    .await
            }
            JobKind::DownloadMissingImages => {
                self.run_locked(kind, || self.reconciler.backfill_images())
                    .await
            }
            JobKind::BackfillFileSizes => {
                self.run_locked(kind, || self.reconciler.backfill_file_sizes())
                    .await
            }
            JobKind::SweepStaleLocks => {
                self.run_locked(kind, || async {
                    let locks = self.locks.sweep_stale().await?;
                    let downloads = self.reconciler.recover_interrupted_downloads().await?;
                    Ok(locks + downloads)
                })
                .await
            }
        };

        match &result {
            Ok(JobRun::Completed { affected }) => {
                debug!(job = %kind, affected, "job finished");
                self.emit(Event::JobCompleted {
                    job: kind.name().to_string(),
                    affected: *affected,
                });
            }
            Ok(JobRun::Skipped) => {
                debug!(job = %kind, "job skipped, lock held");
                self.emit(Event::JobSkipped {
                    job: kind.name().to_string(),
                    reason: LOCK_HELD_REASON.to_string(),
                });
            }
            Err(e) if e.is_store_outage() => {
                error!(job = %kind, error = %e, "store unavailable, skipping job cycle");
                self.emit(Event::JobSkipped {
                    job: kind.name().to_string(),
                    reason: e.to_string(),
                });
            }
            Err(e) => warn!(job = %kind, error = %e, "job failed"),
        }

        result
    }

    async fn refresh_and_download(&self) -> Result<JobRun> {
        let summary = match self.refresh.run_cycle().await? {
            RefreshOutcome::Skipped => return Ok(JobRun::Skipped),
            RefreshOutcome::Completed(summary) => summary,
        };

        // Newly queued episodes plus earlier ones whose download failed
        let mut ids = summary.queued;
        for id in self.worker.pending().await? {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }

        if !ids.is_empty() {
            let results = self.worker.download_many(ids).await;
            let failed = results.iter().filter(|(_, r)| r.is_err()).count();
            info!(
                downloaded = results.len() - failed,
                failed, "auto-download after refresh finished"
            );
        }

        Ok(JobRun::Completed {
            affected: summary.items_discovered as u64,
        })
    }

    async fn run_locked<F, Fut>(&self, kind: JobKind, body: F) -> Result<JobRun>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<u64>>,
    {
        let Some(token) = self.locks.acquire(kind).await? else {
            return Ok(JobRun::Skipped);
        };

        let result = body().await;

        if let Err(e) = self.locks.release(&token).await {
            warn!(job = %kind, error = %e, "failed to release job lock");
        }

        result.map(|affected| JobRun::Completed { affected })
    }

    fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}

/// Interval for a job kind
pub fn interval_for(config: &JobsConfig, kind: JobKind) -> Duration {
    match kind {
        JobKind::RefreshEpisodes => config.refresh_interval,
        JobKind::CheckMissingFiles => config.missing_file_interval,
        JobKind::DownloadMissingImages => config.image_backfill_interval,
        JobKind::BackfillFileSizes => config.size_backfill_interval,
        JobKind::SweepStaleLocks => config.lock_sweep_interval,
    }
}

/// Handle to the running job tasks
pub struct Scheduler {
    cancel: CancellationToken,
    handles: Vec<(JobKind, JoinHandle<()>)>,
}

impl Scheduler {
    /// Spawn one task per job kind
    pub fn start(runner: JobRunner, config: &JobsConfig) -> Self {
        let cancel = CancellationToken::new();
        let handles = JobKind::ALL
            .into_iter()
            .map(|kind| {
                let period = interval_for(config, kind).max(Duration::from_millis(1));
                let task = run_periodic(
                    runner.clone(),
                    kind,
                    period,
                    config.run_on_start,
                    cancel.child_token(),
                );
                (kind, tokio::spawn(task))
            })
            .collect();

        info!(jobs = JobKind::ALL.len(), "job scheduler started");
        Self { cancel, handles }
    }

    /// Whether shutdown has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop every task, waiting at most `timeout` for each to finish its
    /// current tick. Tasks still running after that are aborted.
    pub async fn shutdown(self, timeout: Duration) {
        self.cancel.cancel();

        for (kind, mut handle) in self.handles {
            match tokio::time::timeout(timeout, &mut handle).await {
                Ok(Ok(())) => debug!(job = %kind, "job task stopped"),
                Ok(Err(e)) => warn!(job = %kind, error = %e, "job task ended abnormally"),
                Err(_) => {
                    warn!(job = %kind, "job task did not stop in time, aborting");
                    handle.abort();
                }
            }
        }

        info!("job scheduler stopped");
    }
}

async fn run_periodic(
    runner: JobRunner,
    kind: JobKind,
    period: Duration,
    run_on_start: bool,
    cancel: CancellationToken,
) {
    let first = if run_on_start {
        Instant::now()
    } else {
        Instant::now() + period
    };
    let mut interval = tokio::time::interval_at(first, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(job = %kind, "job task cancelled");
                break;
            }
            _ = interval.tick() => {
                // Outcome already logged and announced by the runner
                runner.run_job(kind).await.ok();
            }
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
