//! Tags and feed/tag membership.

use crate::error::DatabaseError;
use crate::types::{FeedId, TagId};
use crate::{Error, Result};

use super::{Database, Tag};

impl Database {
    /// Create a tag. Fails with [`Error::Duplicate`] if the label exists.
    pub async fn insert_tag(&self, label: &str) -> Result<TagId> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query("INSERT INTO tags (label, created_at) VALUES (?, ?)")
            .bind(label)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| match Error::from_sqlx("Failed to insert tag", e) {
                Error::Database(DatabaseError::ConstraintViolation(_)) => {
                    Error::Duplicate(format!("tag {}", label))
                }
                other => other,
            })?;

        Ok(TagId(result.last_insert_rowid()))
    }

    /// All tags, alphabetical
    pub async fn list_tags(&self) -> Result<Vec<Tag>> {
        sqlx::query_as::<_, Tag>(
            "SELECT id, label, created_at FROM tags ORDER BY label COLLATE NOCASE ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::from_sqlx("Failed to list tags", e))
    }

    /// Tags attached to one feed
    pub async fn list_feed_tags(&self, feed_id: FeedId) -> Result<Vec<Tag>> {
        sqlx::query_as::<_, Tag>(
            r#"
            SELECT t.id, t.label, t.created_at
            FROM tags t
            JOIN feed_tags ft ON ft.tag_id = t.id
            WHERE ft.feed_id = ?
            ORDER BY t.label COLLATE NOCASE ASC
            "#,
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::from_sqlx("Failed to list feed tags", e))
    }

    /// Attach a tag to a feed. Attaching twice is a no-op.
    pub async fn tag_feed(&self, feed_id: FeedId, tag_id: TagId) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO feed_tags (feed_id, tag_id) VALUES (?, ?)")
            .bind(feed_id)
            .bind(tag_id)
            .execute(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_foreign_key_violation() => {
                    Error::NotFound(format!("feed {} or tag {}", feed_id, tag_id))
                }
                other => Error::from_sqlx("Failed to tag feed", other),
            })?;

        Ok(())
    }

    /// Detach a tag from a feed. Returns false if it wasn't attached.
    pub async fn untag_feed(&self, feed_id: FeedId, tag_id: TagId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM feed_tags WHERE feed_id = ? AND tag_id = ?")
            .bind(feed_id)
            .bind(tag_id)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::from_sqlx("Failed to untag feed", e))?;

        Ok(result.rows_affected() > 0)
    }
}
