//! Database layer for podkeep
//!
//! Handles SQLite persistence for feeds, episodes, tags and job locks.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`]: Database lifecycle, schema migrations
//! - [`feeds`]: Feed CRUD and URL lookups
//! - [`items`]: Episode inserts and conditional status updates
//! - [`query`]: Filtered, sorted, paginated episode queries
//! - [`job_locks`]: Persisted job-kind mutual exclusion records
//! - [`tags`]: Tags and feed/tag membership
//! - [`state`]: Runtime state (shutdown tracking)

use crate::status::DownloadStatus;
use crate::types::{FeedId, ItemId, TagId};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, sqlite::SqlitePool};

mod feeds;
mod items;
mod job_locks;
mod migrations;
mod query;
mod state;
mod tags;

pub use feeds::FeedSort;

/// Subscribed feed record
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Feed {
    /// Unique database ID
    pub id: FeedId,
    /// Canonical source URL (unique)
    pub url: String,
    /// Feed title
    pub title: String,
    /// Author or owner
    pub author: Option<String>,
    /// Plain-text description
    pub summary: Option<String>,
    /// Artwork URL
    pub image_url: Option<String>,
    /// Publish time of the newest episode seen (unix seconds)
    pub last_episode_at: Option<i64>,
    /// Feed is marked explicit
    pub explicit: bool,
    /// Paused feeds are skipped by refresh
    pub paused: bool,
    /// Unix timestamp when the feed was subscribed
    pub created_at: i64,
    /// Unix timestamp of the last metadata change
    pub updated_at: i64,
}

/// Episode record
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Item {
    /// Unique database ID
    pub id: ItemId,
    /// Owning feed; `None` once orphaned by feed deletion
    pub feed_id: Option<FeedId>,
    /// Feed-supplied identifier, unique within the feed
    pub guid: String,
    /// Episode title
    pub title: String,
    /// Plain-text summary
    pub summary: String,
    /// Publish time (unix seconds)
    pub pub_date: i64,
    /// Duration in seconds (0 when unknown)
    pub duration: i64,
    /// Media enclosure URL
    pub media_url: String,
    /// Episode artwork URL
    pub image_url: Option<String>,
    /// Local copy of the artwork
    pub local_image_path: Option<String>,
    /// Download status
    pub status: DownloadStatus,
    /// Local file, set only while downloaded
    pub file_path: Option<String>,
    /// File size in bytes (0 until known)
    pub file_size: i64,
    /// Played flag
    pub played: bool,
    /// Playback position in seconds
    pub play_position: i64,
    /// Last transfer failure
    pub last_error: Option<String>,
    /// Unix timestamp of the last successful download
    pub downloaded_at: Option<i64>,
    /// Unix timestamp when the item was discovered
    pub created_at: i64,
}

/// Tag record
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Tag {
    /// Unique database ID
    pub id: TagId,
    /// Label (unique)
    pub label: String,
    /// Unix timestamp when the tag was created
    pub created_at: i64,
}

/// Persisted job lock
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct JobLockRecord {
    /// Job kind name (unique)
    pub name: String,
    /// Token of the current holder
    pub owner_token: String,
    /// Unix timestamp of acquisition
    pub acquired_at: i64,
    /// Unix timestamp of the last heartbeat
    pub heartbeat_at: i64,
    /// Seconds without heartbeat after which the lock is abandoned
    pub stale_after_secs: i64,
}

/// Parameters for inserting a new feed
#[derive(Debug, Clone, Default)]
pub struct InsertFeedParams<'a> {
    /// Canonical source URL
    pub url: &'a str,
    /// Feed title
    pub title: &'a str,
    /// Author or owner
    pub author: Option<&'a str>,
    /// Plain-text description
    pub summary: Option<&'a str>,
    /// Artwork URL
    pub image_url: Option<&'a str>,
    /// Explicit flag
    pub explicit: bool,
}

/// Parameters for refreshing feed metadata from a fetched document
#[derive(Debug, Clone, Default)]
pub struct UpdateFeedMetadataParams<'a> {
    /// Feed title
    pub title: &'a str,
    /// Author or owner
    pub author: Option<&'a str>,
    /// Plain-text description
    pub summary: Option<&'a str>,
    /// Artwork URL
    pub image_url: Option<&'a str>,
    /// Explicit flag
    pub explicit: bool,
}

/// Parameters for inserting a discovered episode
#[derive(Debug, Clone, Default)]
pub struct InsertItemParams<'a> {
    /// Owning feed
    pub feed_id: FeedId,
    /// Feed-supplied identifier
    pub guid: &'a str,
    /// Episode title
    pub title: &'a str,
    /// Plain-text summary
    pub summary: &'a str,
    /// Publish time (unix seconds)
    pub pub_date: i64,
    /// Duration in seconds
    pub duration: i64,
    /// Media enclosure URL
    pub media_url: &'a str,
    /// Episode artwork URL
    pub image_url: Option<&'a str>,
    /// Enclosure length advertised by the feed (0 when absent)
    pub file_size: i64,
}

/// Database handle for podkeep
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
