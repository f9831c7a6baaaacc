//! The [`PodKeeper`] facade.
//!
//! Wires the store, lifecycle, refresh, download and reconciliation components
//! together and exposes the operations a presentation layer needs. Methods are
//! split by concern:
//! - [`feeds`]: subscribe, delete, pause, lookups and tags
//! - [`items`]: listing, downloads and per-item actions
//! - [`lifecycle`]: background jobs and shutdown

mod feeds;
mod items;
mod lifecycle;

use crate::config::Config;
use crate::db::Database;
use crate::downloader::DownloadWorker;
use crate::error::{Error, Result};
use crate::job_lock::{JobKind, JobLock};
use crate::jobs::{JobRun, JobRunner, Scheduler};
use crate::lifecycle::ItemLifecycle;
use crate::reconcile::Reconciler;
use crate::refresh::{FeedFetcher, HttpFeedFetcher, RefreshOrchestrator, RefreshPolicy};
use crate::types::Event;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::sync::{Mutex, broadcast};
use tokio_stream::wrappers::BroadcastStream;

/// Capacity of the event channel; slower subscribers see `Lagged`
pub const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Main engine handle (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct PodKeeper {
    /// Database instance for persistence
    /// Public for integration tests to inspect stored state
    pub db: Arc<Database>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    pub(crate) lifecycle: ItemLifecycle,
    pub(crate) worker: DownloadWorker,
    pub(crate) refresh: RefreshOrchestrator,
    pub(crate) reconciler: Reconciler,
    pub(crate) locks: JobLock,
    /// Cleared at shutdown; new feeds and downloads are refused afterwards
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Running job tasks, if started
    pub(crate) scheduler: Arc<Mutex<Option<Scheduler>>>,
}

impl PodKeeper {
    /// Create an engine that fetches feeds over HTTP.
    ///
    /// This initializes all core components:
    /// - Creates the download directory
    /// - Opens/creates the SQLite database and runs migrations
    /// - Records the start for unclean shutdown detection
    /// - Fails back downloads left `Downloading` by a process that stopped
    ///   beating; transfers still running in another process are untouched
    pub async fn new(config: Config) -> Result<Self> {
        let fetcher = Arc::new(HttpFeedFetcher::new(&config.download)?);
        Self::with_fetcher(config, fetcher).await
    }

    /// Create an engine with a custom feed source
    pub async fn with_fetcher(config: Config, fetcher: Arc<dyn FeedFetcher>) -> Result<Self> {
        config.validate()?;

        tokio::fs::create_dir_all(&config.download.download_dir)
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create download directory '{}': {}",
                        config.download.download_dir.display(),
                        e
                    ),
                ))
            })?;

        let db = Arc::new(Database::new(&config.persistence.database_path).await?);

        if db.was_unclean_shutdown().await? {
            tracing::warn!("previous run did not shut down cleanly");
        }
        db.set_clean_start().await?;

        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let lifecycle = ItemLifecycle::new(db.clone(), event_tx.clone());
        let worker = DownloadWorker::new(
            db.clone(),
            lifecycle.clone(),
            &config.download,
            config.retry.clone(),
        )?;
        let locks = JobLock::new(db.clone(), config.jobs.lock_stale_after);
        let refresh = RefreshOrchestrator::new(
            db.clone(),
            fetcher,
            locks.clone(),
            event_tx.clone(),
            RefreshPolicy {
                auto_download: config.download.auto_download,
                initial_download_count: config.download.initial_download_count,
            },
        );
        let reconciler = Reconciler::new(db.clone(), lifecycle.clone(), worker.clone());

        let keeper = Self {
            db,
            event_tx,
            config: Arc::new(config),
            lifecycle,
            worker,
            refresh,
            reconciler,
            locks,
            accepting_new: Arc::new(AtomicBool::new(true)),
            scheduler: Arc::new(Mutex::new(None)),
        };

        keeper.reconciler.recover_interrupted_downloads().await?;

        tracing::info!(
            download_dir = %keeper.config.download.download_dir.display(),
            database = %keeper.config.persistence.database_path.display(),
            "podkeep initialized"
        );
        Ok(keeper)
    }

    /// Subscribe to engine events.
    ///
    /// Each subscriber receives every event independently. One that falls more
    /// than [`EVENT_CHANNEL_CAPACITY`] events behind gets `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Events as a `Stream`, for consumers built on stream combinators
    pub fn event_stream(&self) -> BroadcastStream<Event> {
        BroadcastStream::new(self.event_tx.subscribe())
    }

    /// Current configuration
    pub fn config(&self) -> Arc<Config> {
        self.config.clone()
    }

    /// Run one tick of a background job now, under its lock
    pub async fn run_job(&self, kind: JobKind) -> Result<JobRun> {
        self.job_runner().run_job(kind).await
    }

    pub(crate) fn job_runner(&self) -> JobRunner {
        JobRunner::new(
            self.locks.clone(),
            self.refresh.clone(),
            self.reconciler.clone(),
            self.worker.clone(),
            self.event_tx.clone(),
        )
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
