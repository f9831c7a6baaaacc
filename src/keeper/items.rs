//! Episode listing, downloads and per-item actions.

use super::PodKeeper;
use crate::db::Item;
use crate::downloader::DownloadOutcome;
use crate::error::{Error, Result};
use crate::filter::{EpisodeFilter, Page, PageMeta};
use crate::status::{DownloadStatus, StatusEvent};
use crate::types::ItemId;
use std::sync::atomic::Ordering;
use tracing::{debug, info};

impl PodKeeper {
    /// One page of episodes matching `filter`.
    ///
    /// The filter is normalized first, so any input yields a page. A page past
    /// the end is empty, not an error.
    pub async fn list_items(&self, filter: EpisodeFilter) -> Result<Page<Item>> {
        let filter = filter.normalize();
        let (items, total_count) = self.db.query_items(&filter).await?;
        let meta = PageMeta::compute(filter.page, filter.page_size, total_count);
        Ok(Page { items, meta })
    }

    /// One episode; [`Error::NotFound`] when absent
    pub async fn get_item(&self, id: ItemId) -> Result<Item> {
        self.lifecycle.load(id).await
    }

    /// Download one episode now.
    ///
    /// Refused with [`Error::ShuttingDown`] once shutdown has begun. An item
    /// that is not `NotDownloaded` yields [`Error::InvalidTransition`]. If the
    /// transfer fails the episode stays wanted and later refresh cycles retry it.
    pub async fn trigger_download(&self, id: ItemId) -> Result<DownloadOutcome> {
        if !self.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }
        self.db.mark_items_for_download(&[id]).await?;
        self.worker.download(id).await
    }

    /// Remove a downloaded episode's file and mark it deleted.
    ///
    /// The file is kept on disk when `delete_files_on_remove` is off.
    pub async fn delete_item_file(&self, id: ItemId) -> Result<()> {
        let item = self.lifecycle.load(id).await?;
        // Validate before touching the filesystem
        item.status.apply(StatusEvent::Remove)?;

        if self.config.delete_files_on_remove
            && let Some(path) = item.file_path.as_deref()
        {
            match tokio::fs::remove_file(path).await {
                Ok(()) => debug!(item_id = %id, path, "episode file deleted"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(item_id = %id, path, "episode file already gone");
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }

        self.lifecycle.apply(id, StatusEvent::Remove).await?;
        // A restored episode waits for an explicit download
        self.db.unmark_item_for_download(id).await?;
        info!(item_id = %id, "episode removed");
        Ok(())
    }

    /// Make a deleted episode eligible for download again
    pub async fn restore_item(&self, id: ItemId) -> Result<DownloadStatus> {
        self.lifecycle.apply(id, StatusEvent::Restore).await
    }

    /// Set the played flag
    pub async fn set_played(&self, id: ItemId, played: bool) -> Result<()> {
        if !self.db.set_item_played(id, played).await? {
            return Err(Error::NotFound(format!("item {}", id)));
        }
        Ok(())
    }

    /// Record the playback position in seconds (negative values become 0)
    pub async fn set_play_position(&self, id: ItemId, secs: i64) -> Result<()> {
        if !self.db.set_item_play_position(id, secs).await? {
            return Err(Error::NotFound(format!("item {}", id)));
        }
        Ok(())
    }
}
