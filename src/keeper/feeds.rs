//! Feed subscription, lookup and tagging.

use super::PodKeeper;
use crate::config::FeedDeletePolicy;
use crate::db::{Feed, FeedSort, InsertFeedParams, Tag};
use crate::error::{Error, Result};
use crate::refresh::RefreshOutcome;
use crate::status::DownloadStatus;
use crate::types::{Event, FeedId, TagId};
use std::sync::atomic::Ordering;
use tracing::{debug, info, warn};

impl PodKeeper {
    /// Subscribe to a feed.
    ///
    /// The document is fetched first, so an unreachable or unparsable URL is
    /// never stored. The new feed then gets one refresh of its own, and with
    /// auto-download on, its newest episodes are downloaded before this
    /// returns. Fails with [`Error::Duplicate`] if the URL is already
    /// subscribed and with [`Error::ShuttingDown`] once shutdown has begun.
    pub async fn add_feed(&self, url: &str) -> Result<Feed> {
        if !self.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let url = url.trim();
        if url.is_empty() {
            return Err(Error::Config {
                message: "feed URL is empty".to_string(),
                key: None,
            });
        }

        match self.db.find_feed_by_url(url).await {
            Ok(_) => return Err(Error::Duplicate(format!("feed {}", url))),
            Err(Error::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let parsed = self.refresh.fetcher().fetch(url).await?;
        let title = if parsed.title.trim().is_empty() {
            url
        } else {
            parsed.title.as_str()
        };

        let feed_id = self
            .db
            .insert_feed(&InsertFeedParams {
                url,
                title,
                author: parsed.author.as_deref(),
                summary: parsed.summary.as_deref(),
                image_url: parsed.image_url.as_deref(),
                explicit: parsed.explicit,
            })
            .await?;

        info!(feed_id = %feed_id, url, "feed added");
        self.event_tx
            .send(Event::FeedAdded {
                feed_id,
                url: url.to_string(),
            })
            .ok();

        match self.refresh.run_for_feed(feed_id).await? {
            RefreshOutcome::Completed(summary) => {
                if !summary.queued.is_empty() {
                    self.worker.download_many(summary.queued).await;
                }
            }
            RefreshOutcome::Skipped => {
                debug!(feed_id = %feed_id, "refresh running elsewhere, new feed waits for the next cycle");
            }
        }

        self.db
            .get_feed(feed_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("feed {}", feed_id)))
    }

    /// Unsubscribe from a feed.
    ///
    /// With [`FeedDeletePolicy::RemoveItems`] its items are deleted and, when
    /// `delete_files_on_remove` is set, their files too. With
    /// [`FeedDeletePolicy::OrphanItems`] the items stay, without a feed.
    pub async fn delete_feed(&self, id: FeedId) -> Result<()> {
        match self.config.feed_delete_policy {
            FeedDeletePolicy::OrphanItems => {
                let orphaned = self
                    .db
                    .delete_feed_orphaning_items(id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("feed {}", id)))?;
                info!(feed_id = %id, orphaned, "feed deleted, items kept");
            }
            FeedDeletePolicy::RemoveItems => {
                let items = self.db.list_feed_items(id).await?;
                if !self.db.delete_feed(id).await? {
                    return Err(Error::NotFound(format!("feed {}", id)));
                }

                if self.config.delete_files_on_remove {
                    for item in items.iter().filter(|i| i.status == DownloadStatus::Downloaded) {
                        let files = item.file_path.iter().chain(item.local_image_path.iter());
                        for path in files {
                            if let Err(e) = tokio::fs::remove_file(path).await
                                && e.kind() != std::io::ErrorKind::NotFound
                            {
                                warn!(item_id = %item.id, path = %path, error = %e, "failed to delete episode file");
                            }
                        }
                    }
                }
                info!(feed_id = %id, items = items.len(), "feed deleted with its items");
            }
        }
        Ok(())
    }

    /// Pause or resume refreshing a feed
    pub async fn set_feed_paused(&self, id: FeedId, paused: bool) -> Result<()> {
        if !self.db.set_feed_paused(id, paused).await? {
            return Err(Error::NotFound(format!("feed {}", id)));
        }
        debug!(feed_id = %id, paused, "feed pause state changed");
        Ok(())
    }

    /// Every subscribed feed
    pub async fn list_feeds(&self, sort: FeedSort) -> Result<Vec<Feed>> {
        self.db.list_feeds(sort).await
    }

    /// The feed with this exact URL; [`Error::NotFound`] when absent
    pub async fn find_feed_by_url(&self, url: &str) -> Result<Feed> {
        self.db.find_feed_by_url(url).await
    }

    /// Every feed whose URL is in `urls`; unknown URLs are left out
    pub async fn find_feeds_by_urls(&self, urls: &[String]) -> Result<Vec<Feed>> {
        self.db.find_feeds_by_urls(urls).await
    }

    /// Create a tag; [`Error::Duplicate`] if the label exists
    pub async fn create_tag(&self, label: &str) -> Result<TagId> {
        let label = label.trim();
        if label.is_empty() {
            return Err(Error::Config {
                message: "tag label is empty".to_string(),
                key: None,
            });
        }
        self.db.insert_tag(label).await
    }

    /// Attach a tag to a feed (no-op if already attached)
    pub async fn tag_feed(&self, feed_id: FeedId, tag_id: TagId) -> Result<()> {
        self.db.tag_feed(feed_id, tag_id).await
    }

    /// Detach a tag from a feed
    pub async fn untag_feed(&self, feed_id: FeedId, tag_id: TagId) -> Result<()> {
        if !self.db.untag_feed(feed_id, tag_id).await? {
            return Err(Error::NotFound(format!("tag {} on feed {}", tag_id, feed_id)));
        }
        Ok(())
    }

    /// Every tag, by label
    pub async fn list_tags(&self) -> Result<Vec<Tag>> {
        self.db.list_tags().await
    }

    /// Tags attached to one feed
    pub async fn feed_tags(&self, feed_id: FeedId) -> Result<Vec<Tag>> {
        self.db.list_feed_tags(feed_id).await
    }
}
