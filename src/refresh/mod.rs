//! Feed refresh cycle.
//!
//! One cycle runs under the `refresh-episodes` job lock and visits every
//! unpaused feed in turn:
//! 1. fetch and parse the document through a [`FeedFetcher`]
//! 2. insert episodes not seen before (keyed by feed and GUID)
//! 3. advance the feed's newest-episode time and refresh its metadata
//!
//! A feed that cannot be fetched is logged, announced and skipped; only a
//! store outage aborts the cycle. New episodes are returned for download
//! rather than transferred here.

mod fetch;

pub use fetch::{FeedFetcher, HttpFeedFetcher, ParsedFeed, ParsedItem, parse_document, parse_duration};

use crate::db::{Database, Feed, InsertItemParams, UpdateFeedMetadataParams};
use crate::error::{Error, Result};
use crate::job_lock::{JobKind, JobLock, LockToken};
use crate::types::{Event, FeedId, ItemId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info, warn};

/// Where a feed is within a refresh cycle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RefreshPhase {
    /// Not being refreshed
    #[default]
    Idle,
    /// Waiting on the feed document
    Fetching,
    /// Writing discovered episodes
    Reconciling,
}

/// Result of asking for a refresh cycle
#[derive(Clone, Debug, PartialEq)]
pub enum RefreshOutcome {
    /// The cycle ran
    Completed(RefreshSummary),
    /// Another holder had the refresh lock; nothing was done
    Skipped,
}

/// What a completed cycle did
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RefreshSummary {
    /// Feeds fetched and reconciled
    pub feeds_refreshed: usize,
    /// Feeds that failed to fetch or reconcile
    pub feeds_failed: usize,
    /// Episodes inserted
    pub items_discovered: usize,
    /// New episodes that should be downloaded now
    pub queued: Vec<ItemId>,
}

/// Settings that decide which new episodes get queued
#[derive(Clone, Copy, Debug)]
pub struct RefreshPolicy {
    /// Queue new episodes for download at all
    pub auto_download: bool,
    /// On a feed's first refresh, queue only this many of the newest episodes
    pub initial_download_count: usize,
}

struct FeedRefresh {
    discovered: usize,
    queued: Vec<ItemId>,
}

/// Runs refresh cycles against the store
#[derive(Clone)]
pub struct RefreshOrchestrator {
    db: Arc<Database>,
    fetcher: Arc<dyn FeedFetcher>,
    locks: JobLock,
    event_tx: broadcast::Sender<Event>,
    policy: RefreshPolicy,
    phases: Arc<RwLock<HashMap<FeedId, RefreshPhase>>>,
}

impl RefreshOrchestrator {
    /// Create an orchestrator over an explicit store and fetcher
    pub fn new(
        db: Arc<Database>,
        fetcher: Arc<dyn FeedFetcher>,
        locks: JobLock,
        event_tx: broadcast::Sender<Event>,
        policy: RefreshPolicy,
    ) -> Self {
        Self {
            db,
            fetcher,
            locks,
            event_tx,
            policy,
            phases: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Fetcher used for feed documents
    pub fn fetcher(&self) -> &Arc<dyn FeedFetcher> {
        &self.fetcher
    }

    /// Current phase of a feed
    pub async fn phase(&self, feed_id: FeedId) -> RefreshPhase {
        self.phases
            .read()
            .await
            .get(&feed_id)
            .copied()
            .unwrap_or_default()
    }

    /// Refresh every unpaused feed under the refresh lock
    pub async fn run_cycle(&self) -> Result<RefreshOutcome> {
        self.locked(None).await
    }

    /// Refresh one feed under the refresh lock, paused or not
    pub async fn run_for_feed(&self, feed_id: FeedId) -> Result<RefreshOutcome> {
        self.locked(Some(feed_id)).await
    }

    async fn locked(&self, only: Option<FeedId>) -> Result<RefreshOutcome> {
        let Some(token) = self.locks.acquire(JobKind::RefreshEpisodes).await? else {
            debug!("refresh already running elsewhere, skipping cycle");
            return Ok(RefreshOutcome::Skipped);
        };

        let result = self.refresh_feeds(&token, only).await;

        if let Err(e) = self.locks.release(&token).await {
            warn!(error = %e, "failed to release refresh lock");
        }

        result.map(RefreshOutcome::Completed)
    }

    async fn refresh_feeds(&self, token: &LockToken, only: Option<FeedId>) -> Result<RefreshSummary> {
        let feeds = match only {
            Some(id) => vec![
                self.db
                    .get_feed(id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("feed {}", id)))?,
            ],
            None => self.db.list_active_feeds().await?,
        };

        info!(feeds = feeds.len(), "refresh cycle started");
        let mut summary = RefreshSummary::default();

        for (index, feed) in feeds.iter().enumerate() {
            if index > 0 && !self.locks.heartbeat(token).await? {
                warn!("refresh lock lost mid-cycle, stopping");
                break;
            }

            match self.refresh_one(feed).await {
                Ok(done) => {
                    summary.feeds_refreshed += 1;
                    summary.items_discovered += done.discovered;
                    summary.queued.extend(done.queued);
                }
                Err(e) if e.is_store_outage() => {
                    tracing::error!(feed_id = %feed.id, error = %e, "store unavailable, aborting refresh cycle");
                    return Err(e);
                }
                Err(e) => {
                    summary.feeds_failed += 1;
                    warn!(feed_id = %feed.id, url = %feed.url, error = %e, "feed refresh failed");
                    self.event_tx
                        .send(Event::FeedRefreshFailed {
                            feed_id: feed.id,
                            url: feed.url.clone(),
                            error: e.to_string(),
                        })
                        .ok();
                }
            }
        }

        info!(
            refreshed = summary.feeds_refreshed,
            failed = summary.feeds_failed,
            discovered = summary.items_discovered,
            queued = summary.queued.len(),
            "refresh cycle finished"
        );
        Ok(summary)
    }

    async fn refresh_one(&self, feed: &Feed) -> Result<FeedRefresh> {
        let result = self.fetch_and_reconcile(feed).await;
        self.set_phase(feed.id, RefreshPhase::Idle).await;
        result
    }

    async fn fetch_and_reconcile(&self, feed: &Feed) -> Result<FeedRefresh> {
        self.set_phase(feed.id, RefreshPhase::Fetching).await;
        let parsed = self.fetcher.fetch(&feed.url).await?;

        self.set_phase(feed.id, RefreshPhase::Reconciling).await;
        let first_refresh = self.db.count_feed_items(feed.id).await? == 0;

        let mut new_items: Vec<(ItemId, i64)> = Vec::new();
        let mut newest: Option<i64> = None;

        for item in &parsed.items {
            newest = newest.max(Some(item.pub_date));

            let inserted = self
                .db
                .insert_item_if_absent(&InsertItemParams {
                    feed_id: feed.id,
                    guid: &item.guid,
                    title: &item.title,
                    summary: &item.summary,
                    pub_date: item.pub_date,
                    duration: item.duration_secs,
                    media_url: &item.media_url,
                    image_url: item.image_url.as_deref(),
                    file_size: item.size.unwrap_or(0),
                })
                .await?;

            if let Some(item_id) = inserted {
                debug!(feed_id = %feed.id, item_id = %item_id, guid = %item.guid, "new episode");
                self.event_tx
                    .send(Event::ItemDiscovered {
                        item_id,
                        feed_id: feed.id,
                        title: item.title.clone(),
                    })
                    .ok();
                new_items.push((item_id, item.pub_date));
            }
        }

        if let Some(newest) = newest {
            self.db.advance_last_episode(feed.id, newest).await?;
        }

        let title = if parsed.title.trim().is_empty() {
            feed.title.as_str()
        } else {
            parsed.title.as_str()
        };
        self.db
            .update_feed_metadata(
                feed.id,
                &UpdateFeedMetadataParams {
                    title,
                    author: parsed.author.as_deref(),
                    summary: parsed.summary.as_deref(),
                    image_url: parsed.image_url.as_deref(),
                    explicit: parsed.explicit,
                },
            )
            .await?;

        let discovered = new_items.len();
        let queued = self.select_for_download(new_items, first_refresh);
        self.db.mark_items_for_download(&queued).await?;

        debug!(feed_id = %feed.id, discovered, queued = queued.len(), "feed reconciled");
        Ok(FeedRefresh { discovered, queued })
    }

    fn select_for_download(&self, mut new_items: Vec<(ItemId, i64)>, first_refresh: bool) -> Vec<ItemId> {
        if !self.policy.auto_download {
            return Vec::new();
        }

        if first_refresh {
            new_items.sort_by(|a, b| b.1.cmp(&a.1).then(b.0.cmp(&a.0)));
            new_items.truncate(self.policy.initial_download_count);
        }

        new_items.into_iter().map(|(id, _)| id).collect()
    }

    async fn set_phase(&self, feed_id: FeedId, phase: RefreshPhase) {
        let mut phases = self.phases.write().await;
        if phase == RefreshPhase::Idle {
            phases.remove(&feed_id);
        } else {
            phases.insert(feed_id, phase);
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
