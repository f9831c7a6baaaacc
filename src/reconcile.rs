//! Reconciliation jobs: correct drift between recorded state and reality.
//!
//! Each method is one job body. The scheduler runs them under their own job
//! locks; tests call them directly. Per-item problems are logged and skipped,
//! store failures propagate.

use crate::db::{Database, Item};
use crate::downloader::DownloadWorker;
use crate::error::Result;
use crate::lifecycle::ItemLifecycle;
use crate::status::{DownloadStatus, StatusEvent};
use crate::utils::{DEFAULT_IMAGE_EXTENSION, partial_path, url_extension};
use reqwest::header::CONTENT_LENGTH;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reason recorded on items found `Downloading` at startup
pub const INTERRUPTED_REASON: &str = "interrupted before completion";

/// Runs the reconciliation job bodies
#[derive(Clone)]
pub struct Reconciler {
    db: Arc<Database>,
    lifecycle: ItemLifecycle,
    worker: DownloadWorker,
}

impl Reconciler {
    /// Create a reconciler sharing the worker's HTTP client and layout
    pub fn new(db: Arc<Database>, lifecycle: ItemLifecycle, worker: DownloadWorker) -> Self {
        Self {
            db,
            lifecycle,
            worker,
        }
    }

    /// Return downloaded items whose file is gone to `NotDownloaded`.
    ///
    /// The item goes `Downloaded -> Deleted -> NotDownloaded`, so it becomes
    /// eligible for download again. Returns the number of items reset.
    pub async fn check_missing_files(&self) -> Result<u64> {
        let mut reset = 0;

        for item in self.db.list_items_with_status(DownloadStatus::Downloaded).await? {
            if file_present(item.file_path.as_deref()).await {
                continue;
            }

            debug!(item_id = %item.id, path = ?item.file_path, "downloaded file is missing");
            match self.reset_missing(&item).await {
                Ok(()) => reset += 1,
                Err(e) if e.is_store_outage() => return Err(e),
                Err(e) => warn!(item_id = %item.id, error = %e, "could not reset missing file"),
            }
        }

        if reset > 0 {
            info!(reset, "reset items with missing files");
        }
        Ok(reset)
    }

    async fn reset_missing(&self, item: &Item) -> Result<()> {
        self.lifecycle.apply(item.id, StatusEvent::Remove).await?;
        self.lifecycle.apply(item.id, StatusEvent::Restore).await?;
        Ok(())
    }

    /// Fill in unknown file sizes.
    ///
    /// Downloaded items are measured on disk; others ask the media server with
    /// a HEAD request. Returns the number of sizes recorded.
    pub async fn backfill_file_sizes(&self) -> Result<u64> {
        let mut filled = 0;

        for item in self.db.list_items_without_size().await? {
            let size = match (item.status, item.file_path.as_deref()) {
                (DownloadStatus::Downloaded, Some(path)) => match tokio::fs::metadata(path).await {
                    Ok(meta) => Some(i64::try_from(meta.len()).unwrap_or(i64::MAX)),
                    Err(e) => {
                        debug!(item_id = %item.id, error = %e, "cannot stat downloaded file");
                        None
                    }
                },
                _ => self.remote_size(&item).await,
            };

            if let Some(size) = size.filter(|s| *s > 0) {
                self.db.set_item_file_size(item.id, size).await?;
                filled += 1;
            }
        }

        if filled > 0 {
            info!(filled, "backfilled file sizes");
        }
        Ok(filled)
    }

    async fn remote_size(&self, item: &Item) -> Option<i64> {
        let response = match self.worker.http_client().head(&item.media_url).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                debug!(item_id = %item.id, status = response.status().as_u16(), "size lookup rejected");
                return None;
            }
            Err(e) => {
                debug!(item_id = %item.id, error = %e, "size lookup failed");
                return None;
            }
        };

        response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
    }

    /// Save artwork for downloaded items that have none locally.
    ///
    /// Images land in an `images` directory beside the media file, named after
    /// it. Returns the number of images saved.
    pub async fn backfill_images(&self) -> Result<u64> {
        let mut saved = 0;

        for item in self.db.list_items_missing_artwork().await? {
            let (Some(image_url), Some(file_path)) = (item.image_url.as_deref(), item.file_path.as_deref())
            else {
                continue;
            };

            let dest = artwork_path(Path::new(file_path), image_url);
            match self.worker.fetch_file(image_url, &dest).await {
                Ok(_) => {
                    self.db
                        .set_item_local_image(item.id, &dest.to_string_lossy())
                        .await?;
                    saved += 1;
                }
                Err(e) => warn!(item_id = %item.id, error = %e, "artwork download failed"),
            }
        }

        if saved > 0 {
            info!(saved, "backfilled episode artwork");
        }
        Ok(saved)
    }

    /// Fail items left `Downloading` by a process that is gone.
    ///
    /// An item counts as abandoned once its transfer heartbeat is older than
    /// the worker's stale window; transfers still running in this or another
    /// process keep their rows. Partial files of recovered items are removed.
    /// Returns the number of items recovered.
    pub async fn recover_interrupted_downloads(&self) -> Result<u64> {
        let stale_secs = i64::try_from(self.worker.stale_after().as_secs()).unwrap_or(i64::MAX);
        let cutoff = chrono::Utc::now().timestamp().saturating_sub(stale_secs);
        let mut recovered = 0;

        for item in self.db.list_stale_downloads(cutoff).await? {
            match self.lifecycle.fail_if_stale(item.id, cutoff, INTERRUPTED_REASON).await {
                Ok(true) => {
                    recovered += 1;
                    if let Ok(dest) = self.worker.destination(&item).await {
                        tokio::fs::remove_file(partial_path(&dest)).await.ok();
                    }
                }
                Ok(false) => debug!(item_id = %item.id, "download came back to life"),
                Err(e) if e.is_store_outage() => return Err(e),
                Err(e) => warn!(item_id = %item.id, error = %e, "could not recover interrupted download"),
            }
        }

        if recovered > 0 {
            warn!(recovered, "recovered downloads abandoned by a stopped process");
        }
        Ok(recovered)
    }
}

async fn file_present(path: Option<&str>) -> bool {
    match path {
        Some(path) => tokio::fs::metadata(path)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false),
        None => false,
    }
}

/// Local artwork location for a media file
pub fn artwork_path(media_file: &Path, image_url: &str) -> PathBuf {
    let stem = media_file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artwork".to_string());
    let ext = url_extension(image_url, DEFAULT_IMAGE_EXTENSION);
    let dir = media_file.parent().unwrap_or_else(|| Path::new("."));
    dir.join("images").join(format!("{}.{}", stem, ext))
}
