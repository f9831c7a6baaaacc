//! Background jobs and graceful shutdown.

use super::PodKeeper;
use crate::error::{Error, Result};
use crate::jobs::Scheduler;
use crate::types::Event;
use std::sync::atomic::Ordering;
use std::time::Duration;

/// How long shutdown waits for each job task to finish its current tick
pub const JOB_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

impl PodKeeper {
    /// Start the background job tasks.
    ///
    /// Calling this again while jobs are running does nothing.
    pub async fn start_jobs(&self) -> Result<()> {
        if !self.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let mut scheduler = self.scheduler.lock().await;
        if scheduler.is_some() {
            tracing::debug!("background jobs already running");
            return Ok(());
        }

        *scheduler = Some(Scheduler::start(self.job_runner(), &self.config.jobs));
        Ok(())
    }

    /// Whether background jobs are running
    pub async fn jobs_running(&self) -> bool {
        self.scheduler.lock().await.is_some()
    }

    /// Gracefully shut down.
    ///
    /// 1. Stop accepting new feeds and downloads
    /// 2. Cancel the job tasks and wait for their current tick
    /// 3. Mark a clean shutdown in the database
    /// 4. Emit [`Event::Shutdown`]
    ///
    /// Transfers already running are not interrupted.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.accepting_new.store(false, Ordering::SeqCst);

        let scheduler = self.scheduler.lock().await.take();
        if let Some(scheduler) = scheduler {
            scheduler.shutdown(JOB_SHUTDOWN_TIMEOUT).await;
        }

        if let Err(e) = self.db.set_clean_shutdown().await {
            tracing::error!(error = %e, "Failed to mark clean shutdown in database");
        } else {
            tracing::info!("Marked clean shutdown in database");
        }

        self.event_tx.send(Event::Shutdown).ok();

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }
}
