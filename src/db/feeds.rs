//! Feed CRUD and URL lookups.

use crate::error::DatabaseError;
use crate::types::FeedId;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite};

use super::{Database, Feed, InsertFeedParams, UpdateFeedMetadataParams};

const FEED_COLUMNS: &str = r#"
    id, url, title, author, summary, image_url, last_episode_at,
    explicit, paused, created_at, updated_at
"#;

/// Feed list ordering
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedSort {
    /// Oldest subscription first
    #[default]
    CreatedAt,
    /// Alphabetical by title
    Title,
    /// Most recently published episode first
    LastEpisode,
}

impl FeedSort {
    /// Parse a sort key; empty or unknown keys give [`FeedSort::CreatedAt`]
    pub fn parse_or_default(key: &str) -> Self {
        match key.trim().to_ascii_lowercase().as_str() {
            "title" => FeedSort::Title,
            "last_episode" | "last_episode_at" => FeedSort::LastEpisode,
            _ => FeedSort::CreatedAt,
        }
    }

    fn order_by(self) -> &'static str {
        match self {
            FeedSort::CreatedAt => "created_at ASC, id ASC",
            FeedSort::Title => "title COLLATE NOCASE ASC, id ASC",
            FeedSort::LastEpisode => "last_episode_at IS NULL, last_episode_at DESC, id ASC",
        }
    }
}

impl Database {
    /// Insert a new feed.
    ///
    /// Fails with [`Error::Duplicate`] when the URL is already subscribed.
    pub async fn insert_feed(&self, params: &InsertFeedParams<'_>) -> Result<FeedId> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO feeds (
                url, title, author, summary, image_url, explicit, paused,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(params.url)
        .bind(params.title)
        .bind(params.author)
        .bind(params.summary)
        .bind(params.image_url)
        .bind(params.explicit)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| match Error::from_sqlx("Failed to insert feed", e) {
            Error::Database(DatabaseError::ConstraintViolation(_)) => {
                Error::Duplicate(format!("feed {}", params.url))
            }
            other => other,
        })?;

        Ok(FeedId(result.last_insert_rowid()))
    }

    /// Get a feed by ID
    pub async fn get_feed(&self, id: FeedId) -> Result<Option<Feed>> {
        let sql = format!("SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?");
        sqlx::query_as::<_, Feed>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::from_sqlx("Failed to get feed", e))
    }

    /// Look up a feed by its canonical URL
    pub async fn find_feed_by_url(&self, url: &str) -> Result<Feed> {
        let sql = format!("SELECT {FEED_COLUMNS} FROM feeds WHERE url = ?");
        sqlx::query_as::<_, Feed>(&sql)
            .bind(url)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::from_sqlx("Failed to find feed by url", e))?
            .ok_or_else(|| Error::NotFound(format!("feed {}", url)))
    }

    /// Every feed whose URL appears in `urls`, one per distinct URL, ordered by id
    pub async fn find_feeds_by_urls(&self, urls: &[String]) -> Result<Vec<Feed>> {
        let mut distinct: Vec<&str> = urls.iter().map(String::as_str).collect();
        distinct.sort_unstable();
        distinct.dedup();

        if distinct.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!("SELECT {FEED_COLUMNS} FROM feeds WHERE url IN ("));
        let mut separated = builder.separated(", ");
        for url in distinct {
            separated.push_bind(url);
        }
        separated.push_unseparated(") ORDER BY id ASC");

        builder
            .build_query_as::<Feed>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::from_sqlx("Failed to find feeds by urls", e))
    }

    /// List all feeds
    pub async fn list_feeds(&self, sort: FeedSort) -> Result<Vec<Feed>> {
        let sql = format!("SELECT {FEED_COLUMNS} FROM feeds ORDER BY {}", sort.order_by());
        sqlx::query_as::<_, Feed>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::from_sqlx("Failed to list feeds", e))
    }

    /// Feeds that refresh should visit (not paused)
    pub async fn list_active_feeds(&self) -> Result<Vec<Feed>> {
        let sql = format!("SELECT {FEED_COLUMNS} FROM feeds WHERE paused = 0 ORDER BY id ASC");
        sqlx::query_as::<_, Feed>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::from_sqlx("Failed to list active feeds", e))
    }

    /// Overwrite feed metadata with values from a freshly fetched document
    pub async fn update_feed_metadata(
        &self,
        id: FeedId,
        params: &UpdateFeedMetadataParams<'_>,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            UPDATE feeds
            SET title = ?, author = ?, summary = ?, image_url = ?, explicit = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(params.title)
        .bind(params.author)
        .bind(params.summary)
        .bind(params.image_url)
        .bind(params.explicit)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::from_sqlx("Failed to update feed metadata", e))?;

        Ok(())
    }

    /// Move `last_episode_at` forward to `observed`; an older value is ignored
    pub async fn advance_last_episode(&self, id: FeedId, observed: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE feeds
            SET last_episode_at = ?
            WHERE id = ? AND (last_episode_at IS NULL OR last_episode_at < ?)
            "#,
        )
        .bind(observed)
        .bind(id)
        .bind(observed)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::from_sqlx("Failed to advance last episode time", e))?;

        Ok(())
    }

    /// Pause or resume a feed. Returns false if the feed doesn't exist.
    pub async fn set_feed_paused(&self, id: FeedId, paused: bool) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query("UPDATE feeds SET paused = ?, updated_at = ? WHERE id = ?")
            .bind(paused)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::from_sqlx("Failed to set feed paused", e))?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a feed; its items go with it (cascade).
    ///
    /// Returns false if the feed doesn't exist.
    pub async fn delete_feed(&self, id: FeedId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM feeds WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::from_sqlx("Failed to delete feed", e))?;

        Ok(result.rows_affected() > 0)
    }

    /// Detach every item from the feed, then delete the feed, in one transaction.
    ///
    /// Returns the number of orphaned items, or `None` if the feed doesn't exist.
    pub async fn delete_feed_orphaning_items(&self, id: FeedId) -> Result<Option<u64>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::from_sqlx("Failed to begin transaction", e))?;

        let orphaned = sqlx::query("UPDATE items SET feed_id = NULL WHERE feed_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::from_sqlx("Failed to orphan feed items", e))?
            .rows_affected();

        let deleted = sqlx::query("DELETE FROM feeds WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::from_sqlx("Failed to delete feed", e))?
            .rows_affected();

        if deleted == 0 {
            // Dropping the transaction rolls back the orphaning (nothing matched anyway)
            return Ok(None);
        }

        tx.commit()
            .await
            .map_err(|e| Error::from_sqlx("Failed to commit feed deletion", e))?;

        Ok(Some(orphaned))
    }

    /// Number of items stored for a feed
    pub async fn count_feed_items(&self, id: FeedId) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM items WHERE feed_id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::from_sqlx("Failed to count feed items", e))
    }
}
