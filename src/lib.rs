//! # podkeep
//!
//! Podcast subscription engine: recurring feed ingestion, reliable one-at-a-time
//! episode downloads, and a filterable, paginated episode view.
//!
//! ## Design Philosophy
//!
//! podkeep is designed to be:
//! - **Library-first** - the `podkeep` binary is a thin shell over [`PodKeeper`]
//! - **Sensible defaults** - works out of the box with zero configuration
//! - **Event-driven** - consumers subscribe to events, no polling required
//! - **Safe to run twice** - background jobs are serialized per kind through
//!   persisted locks, and item status changes are compare-and-set
//!
//! ## Quick Start
//!
//! ```no_run
//! use podkeep::{Config, EpisodeFilter, PodKeeper};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let keeper = PodKeeper::new(Config::default()).await?;
//!
//!     // Subscribe to events
//!     let mut events = keeper.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     keeper.add_feed("https://example.com/podcast.xml").await?;
//!     let page = keeper.list_items(EpisodeFilter::default()).await?;
//!     println!("{} episodes", page.meta.total_count);
//!
//!     keeper.start_jobs().await?;
//!     podkeep::run_with_shutdown(keeper).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Episode download worker
pub mod downloader;
/// Error types
pub mod error;
/// Episode filtering, sorting and pagination
pub mod filter;
/// Persisted per-job-kind locks
pub mod job_lock;
/// Background job scheduler
pub mod jobs;
/// The engine facade
pub mod keeper;
/// Item status transitions with events
pub mod lifecycle;
/// Reconciliation job bodies
pub mod reconcile;
/// Feed refresh cycle
pub mod refresh;
/// Retry logic with exponential backoff
pub mod retry;
/// Download status state machine
pub mod status;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use config::{Config, FeedDeletePolicy};
pub use db::{Database, Feed, FeedSort, Item, Tag};
pub use downloader::DownloadOutcome;
pub use error::{ApiError, DatabaseError, Error, ErrorDetail, Result, ToHttpStatus};
pub use filter::{EpisodeFilter, EpisodeSort, Page, PageMeta};
pub use job_lock::JobKind;
pub use jobs::JobRun;
pub use keeper::PodKeeper;
pub use refresh::{FeedFetcher, HttpFeedFetcher, ParsedFeed, ParsedItem};
pub use status::{DownloadStatus, StatusEvent};
pub use types::{Event, FeedId, ItemId, TagId};

/// Run the engine until a termination signal arrives, then shut it down.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn run_with_shutdown(keeper: PodKeeper) -> Result<()> {
    wait_for_signal().await;
    keeper.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register signal handlers, using ctrl_c fallback");
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
