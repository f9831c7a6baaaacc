//! Episode download worker.
//!
//! A download moves an item `NotDownloaded -> Downloading -> Downloaded`, or
//! back to `NotDownloaded` on any failure. The `Start` transition is a
//! compare-and-set, so two workers handed the same item never both transfer
//! it. Every `Start` is matched by exactly one `Succeed` or `Fail`.

mod transfer;

use crate::config::{DownloadConfig, RetryConfig};
use crate::db::{Database, Item};
use crate::error::{Error, Result};
use crate::lifecycle::ItemLifecycle;
use crate::status::StatusEvent;
use crate::types::{Event, ItemId};
use crate::utils::{episode_path, partial_path, sanitize_name};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Feed directory used for items whose feed was deleted
pub const ORPHANED_FEED_DIR: &str = "orphaned";

/// A finished download
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadOutcome {
    /// Downloaded item
    pub item_id: ItemId,
    /// Final file location
    pub path: PathBuf,
    /// Bytes written
    pub size: i64,
}

/// Transfers episodes to local storage
#[derive(Clone)]
pub struct DownloadWorker {
    db: Arc<Database>,
    lifecycle: ItemLifecycle,
    http_client: reqwest::Client,
    download_dir: PathBuf,
    retry: RetryConfig,
    concurrent_limit: Arc<Semaphore>,
    max_concurrent: usize,
    stale_after: Duration,
}

impl DownloadWorker {
    /// Create a worker; at most `max_concurrent_downloads` transfers run at once
    pub fn new(
        db: Arc<Database>,
        lifecycle: ItemLifecycle,
        config: &DownloadConfig,
        retry: RetryConfig,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.media_timeout)
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            db,
            lifecycle,
            http_client,
            download_dir: config.download_dir.clone(),
            retry,
            concurrent_limit: Arc::new(Semaphore::new(config.max_concurrent_downloads.max(1))),
            max_concurrent: config.max_concurrent_downloads,
            stale_after: config.stale_download_after,
        })
    }

    /// HTTP client shared with artwork and size lookups
    pub fn http_client(&self) -> &reqwest::Client {
        &self.http_client
    }

    /// Heartbeat age after which a `Downloading` item counts as abandoned
    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Items wanted locally but not downloaded: new episodes queued by a
    /// refresh, manual requests, and earlier attempts that failed
    pub async fn pending(&self) -> Result<Vec<ItemId>> {
        Ok(self
            .db
            .list_items_pending_download()
            .await?
            .into_iter()
            .map(|item| item.id)
            .collect())
    }

    /// Root directory for downloaded files
    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Download one item.
    ///
    /// Fails with [`Error::InvalidTransition`] without touching the network when
    /// the item is not `NotDownloaded` (already downloading, downloaded or
    /// deleted). A transfer failure reverts the item and returns
    /// [`Error::Transfer`].
    pub async fn download(&self, item_id: ItemId) -> Result<DownloadOutcome> {
        let _permit = self
            .concurrent_limit
            .acquire()
            .await
            .map_err(|_| Error::ShuttingDown)?;

        let item = self.lifecycle.load(item_id).await?;
        self.lifecycle.apply(item_id, StatusEvent::Start).await?;
        debug!(item_id = %item_id, url = %item.media_url, "download started");

        let dest = match self.destination(&item).await {
            Ok(dest) => dest,
            Err(e) => return Err(self.revert(item_id, None, e.to_string()).await),
        };

        let client = self.http_client.clone();
        let url = item.media_url.clone();
        let retry = self.retry.clone();
        let task_dest = dest.clone();
        let mut handle = tokio::spawn(async move {
            transfer::fetch_to_file(&client, &url, &task_dest, &retry).await
        });

        // Keep the row's heartbeat fresh so other processes leave it alone
        let period = (self.stale_after / 4).max(Duration::from_millis(100));
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        let joined = loop {
            tokio::select! {
                joined = &mut handle => break joined,
                _ = heartbeat.tick() => match self.db.touch_item_download(item_id).await {
                    Ok(true) => {}
                    Ok(false) => warn!(item_id = %item_id, "item left Downloading during transfer"),
                    Err(e) => warn!(item_id = %item_id, error = %e, "failed to refresh download heartbeat"),
                },
            }
        };

        let size = match joined {
            Ok(Ok(size)) => i64::try_from(size).unwrap_or(i64::MAX),
            Ok(Err(e)) => return Err(self.revert(item_id, Some(&dest), e.to_string()).await),
            Err(join_err) => {
                let reason = if join_err.is_panic() {
                    "transfer task panicked".to_string()
                } else {
                    format!("transfer task aborted: {}", join_err)
                };
                return Err(self.revert(item_id, Some(&dest), reason).await);
            }
        };

        let path_str = dest.to_string_lossy().into_owned();
        match self.lifecycle.succeed(item_id, &path_str, size).await {
            Ok(()) => {}
            Err(e @ (Error::InvalidTransition { .. } | Error::NotFound(_))) => {
                warn!(item_id = %item_id, error = %e, "item changed during transfer, discarding file");
                tokio::fs::remove_file(&dest).await.ok();
                return Err(e);
            }
            Err(e) => {
                tokio::fs::remove_file(&dest).await.ok();
                let reason = format!("failed to record download: {}", e);
                return Err(self.revert(item_id, Some(&dest), reason).await);
            }
        }

        info!(item_id = %item_id, path = %dest.display(), size, "episode downloaded");
        Ok(DownloadOutcome {
            item_id,
            path: dest,
            size,
        })
    }

    /// Download several items with bounded parallelism.
    ///
    /// One item's failure never affects the others. Results come back in
    /// completion order.
    pub async fn download_many(&self, ids: Vec<ItemId>) -> Vec<(ItemId, Result<DownloadOutcome>)> {
        let concurrency = self.max_concurrent.max(1);
        stream::iter(ids)
            .map(|id| async move { (id, self.download(id).await) })
            .buffer_unordered(concurrency)
            .collect()
            .await
    }

    /// Fetch an auxiliary file (artwork) to `dest` with the same retry policy
    pub(crate) async fn fetch_file(&self, url: &str, dest: &Path) -> Result<u64> {
        transfer::fetch_to_file(&self.http_client, url, dest, &self.retry)
            .await
            .map_err(|e| Error::Other(format!("failed to fetch {}: {}", url, e)))
    }

    /// Destination path for an item's media file
    pub async fn destination(&self, item: &Item) -> Result<PathBuf> {
        let feed_title = match item.feed_id {
            Some(feed_id) => self
                .db
                .get_feed(feed_id)
                .await?
                .map(|feed| feed.title)
                .ok_or_else(|| Error::NotFound(format!("feed {}", feed_id)))?,
            None => ORPHANED_FEED_DIR.to_string(),
        };

        let fallback = if sanitize_name(&item.guid).is_empty() {
            format!("episode-{}", item.id)
        } else {
            item.guid.clone()
        };

        Ok(episode_path(
            &self.download_dir,
            &feed_title,
            &item.title,
            &fallback,
            &item.media_url,
        ))
    }

    async fn revert(&self, item_id: ItemId, dest: Option<&Path>, reason: String) -> Error {
        warn!(item_id = %item_id, error = %reason, "download failed");

        if let Some(dest) = dest {
            tokio::fs::remove_file(partial_path(dest)).await.ok();
        }

        if let Err(e) = self.lifecycle.fail(item_id, &reason).await {
            tracing::error!(item_id = %item_id, error = %e, "failed to revert item after download failure");
        }

        self.lifecycle
            .events()
            .send(Event::DownloadFailed {
                item_id,
                error: reason.clone(),
            })
            .ok();

        Error::Transfer { item_id, reason }
    }
}
