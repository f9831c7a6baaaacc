//! Episode inserts, conditional status updates and per-item attributes.
//!
//! Status columns are only ever written through compare-and-set updates
//! (`WHERE id = ? AND status = ?`). A `false` return means another writer
//! moved the item first.

use crate::status::DownloadStatus;
use crate::types::{FeedId, ItemId};
use crate::{Error, Result};

use super::{Database, InsertItemParams, Item};

pub(super) const ITEM_COLUMNS: &str = r#"
    id, feed_id, guid, title, summary, pub_date, duration, media_url,
    image_url, local_image_path, status, file_path, file_size, played,
    play_position, last_error, downloaded_at, created_at
"#;

/// Lowercased title and summary, matched by text queries.
///
/// SQLite's `LIKE` only folds ASCII case, so folding happens here.
pub(crate) fn search_text(title: &str, summary: &str) -> String {
    format!("{}\u{1f}{}", title.to_lowercase(), summary.to_lowercase())
}

impl Database {
    /// Insert a discovered item unless (feed, guid) already exists.
    ///
    /// Returns the new id, or `None` when the item was already known. Existing
    /// rows are never modified.
    pub async fn insert_item_if_absent(
        &self,
        params: &InsertItemParams<'_>,
    ) -> Result<Option<ItemId>> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO items (
                feed_id, guid, title, summary, pub_date, duration, media_url,
                image_url, status, file_size, search_text, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(feed_id, guid) DO NOTHING
            "#,
        )
        .bind(params.feed_id)
        .bind(params.guid)
        .bind(params.title)
        .bind(params.summary)
        .bind(params.pub_date)
        .bind(params.duration)
        .bind(params.media_url)
        .bind(params.image_url)
        .bind(DownloadStatus::NotDownloaded)
        .bind(params.file_size.max(0))
        .bind(search_text(params.title, params.summary))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::from_sqlx("Failed to insert item", e))?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(ItemId(result.last_insert_rowid())))
    }

    /// Get an item by ID
    pub async fn get_item(&self, id: ItemId) -> Result<Option<Item>> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?");
        sqlx::query_as::<_, Item>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::from_sqlx("Failed to get item", e))
    }

    /// Move an item from `from` to `to` if it is still in `from`.
    ///
    /// Leaving `Downloaded` clears the file path. Entering `Downloading` stamps
    /// the transfer heartbeat. Returns false when the item doesn't exist or is
    /// no longer in `from`.
    pub async fn transition_item_status(
        &self,
        id: ItemId,
        from: DownloadStatus,
        to: DownloadStatus,
    ) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            UPDATE items
            SET status = ?,
                file_path = CASE WHEN ? = 2 THEN file_path ELSE NULL END,
                download_heartbeat_at = CASE WHEN ? = 1 THEN ? ELSE NULL END,
                updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(to)
        .bind(to.to_i32())
        .bind(to.to_i32())
        .bind(now)
        .bind(now)
        .bind(id)
        .bind(from)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::from_sqlx("Failed to update item status", e))?;

        Ok(result.rows_affected() > 0)
    }

    /// `Downloading -> Downloaded`, recording the file in the same update
    pub async fn complete_item_download(
        &self,
        id: ItemId,
        file_path: &str,
        file_size: i64,
    ) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            UPDATE items
            SET status = ?, file_path = ?, file_size = ?, downloaded_at = ?,
                last_error = NULL, download_heartbeat_at = NULL, updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(DownloadStatus::Downloaded)
        .bind(file_path)
        .bind(file_size)
        .bind(now)
        .bind(now)
        .bind(id)
        .bind(DownloadStatus::Downloading)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::from_sqlx("Failed to complete item download", e))?;

        Ok(result.rows_affected() > 0)
    }

    /// `Downloading -> NotDownloaded`, recording why
    pub async fn fail_item_download(&self, id: ItemId, error: &str) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            UPDATE items
            SET status = ?, file_path = NULL, last_error = ?,
                download_heartbeat_at = NULL, updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(DownloadStatus::NotDownloaded)
        .bind(error)
        .bind(now)
        .bind(id)
        .bind(DownloadStatus::Downloading)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::from_sqlx("Failed to record download failure", e))?;

        Ok(result.rows_affected() > 0)
    }

    /// `Downloading -> NotDownloaded` only if the transfer heartbeat is older
    /// than `cutoff` (or was never written). A live transfer keeps its row.
    pub async fn fail_stale_item_download(
        &self,
        id: ItemId,
        cutoff: i64,
        error: &str,
    ) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            UPDATE items
            SET status = ?, file_path = NULL, last_error = ?,
                download_heartbeat_at = NULL, updated_at = ?
            WHERE id = ? AND status = ?
              AND (download_heartbeat_at IS NULL OR download_heartbeat_at < ?)
            "#,
        )
        .bind(DownloadStatus::NotDownloaded)
        .bind(error)
        .bind(now)
        .bind(id)
        .bind(DownloadStatus::Downloading)
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::from_sqlx("Failed to reclaim stale download", e))?;

        Ok(result.rows_affected() > 0)
    }

    /// Refresh the heartbeat of a running transfer. Returns false once the
    /// item is no longer `Downloading`.
    pub async fn touch_item_download(&self, id: ItemId) -> Result<bool> {
        self.touch_item_download_at(id, chrono::Utc::now().timestamp())
            .await
    }

    /// [`Database::touch_item_download`] with an explicit clock
    pub async fn touch_item_download_at(&self, id: ItemId, now: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE items SET download_heartbeat_at = ? WHERE id = ? AND status = ?",
        )
        .bind(now)
        .bind(id)
        .bind(DownloadStatus::Downloading)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::from_sqlx("Failed to touch download heartbeat", e))?;

        Ok(result.rows_affected() > 0)
    }

    /// `Downloading` items whose heartbeat is older than `cutoff` or missing
    pub async fn list_stale_downloads(&self, cutoff: i64) -> Result<Vec<Item>> {
        let sql = format!(
            r#"
            SELECT {ITEM_COLUMNS} FROM items
            WHERE status = ?
              AND (download_heartbeat_at IS NULL OR download_heartbeat_at < ?)
            ORDER BY id ASC
            "#
        );
        sqlx::query_as::<_, Item>(&sql)
            .bind(DownloadStatus::Downloading)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::from_sqlx("Failed to list stale downloads", e))
    }

    /// Mark items as wanted locally, so failed transfers are retried
    pub async fn mark_items_for_download(&self, ids: &[ItemId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut builder: sqlx::QueryBuilder<'_, sqlx::Sqlite> =
            sqlx::QueryBuilder::new("UPDATE items SET auto_download = 1 WHERE id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| Error::from_sqlx("Failed to mark items for download", e))?;

        Ok(())
    }

    /// Stop retrying an item the user removed
    pub async fn unmark_item_for_download(&self, id: ItemId) -> Result<()> {
        sqlx::query("UPDATE items SET auto_download = 0 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::from_sqlx("Failed to unmark item for download", e))?;

        Ok(())
    }

    /// Wanted items still `NotDownloaded`, skipping paused feeds, oldest first
    pub async fn list_items_pending_download(&self) -> Result<Vec<Item>> {
        let sql = format!(
            r#"
            SELECT {ITEM_COLUMNS} FROM items
            WHERE status = ? AND auto_download = 1
              AND (feed_id IS NULL
                   OR feed_id IN (SELECT id FROM feeds WHERE paused = 0))
            ORDER BY pub_date ASC, id ASC
            "#
        );
        sqlx::query_as::<_, Item>(&sql)
            .bind(DownloadStatus::NotDownloaded)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::from_sqlx("Failed to list items pending download", e))
    }

    /// Every item currently in `status`, oldest id first
    pub async fn list_items_with_status(&self, status: DownloadStatus) -> Result<Vec<Item>> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE status = ? ORDER BY id ASC");
        sqlx::query_as::<_, Item>(&sql)
            .bind(status)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::from_sqlx("Failed to list items by status", e))
    }

    /// Items whose size is still unknown
    pub async fn list_items_without_size(&self) -> Result<Vec<Item>> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE file_size <= 0 ORDER BY id ASC");
        sqlx::query_as::<_, Item>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::from_sqlx("Failed to list items without size", e))
    }

    /// Downloaded items with remote artwork but no local copy
    pub async fn list_items_missing_artwork(&self) -> Result<Vec<Item>> {
        let sql = format!(
            r#"
            SELECT {ITEM_COLUMNS} FROM items
            WHERE status = ? AND image_url IS NOT NULL AND image_url != ''
              AND local_image_path IS NULL
            ORDER BY id ASC
            "#
        );
        sqlx::query_as::<_, Item>(&sql)
            .bind(DownloadStatus::Downloaded)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::from_sqlx("Failed to list items missing artwork", e))
    }

    /// Items of one feed, newest first
    pub async fn list_feed_items(&self, feed_id: FeedId) -> Result<Vec<Item>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE feed_id = ? ORDER BY pub_date DESC, id DESC"
        );
        sqlx::query_as::<_, Item>(&sql)
            .bind(feed_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::from_sqlx("Failed to list feed items", e))
    }

    /// Every item, newest first
    pub async fn list_all_items(&self) -> Result<Vec<Item>> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM items ORDER BY pub_date DESC, id DESC");
        sqlx::query_as::<_, Item>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::from_sqlx("Failed to list items", e))
    }

    /// Record a known file size
    pub async fn set_item_file_size(&self, id: ItemId, size: i64) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("UPDATE items SET file_size = ?, updated_at = ? WHERE id = ?")
            .bind(size)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::from_sqlx("Failed to set item file size", e))?;

        Ok(())
    }

    /// Record where the artwork was saved
    pub async fn set_item_local_image(&self, id: ItemId, path: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("UPDATE items SET local_image_path = ?, updated_at = ? WHERE id = ?")
            .bind(path)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::from_sqlx("Failed to set item image", e))?;

        Ok(())
    }

    /// Set the played flag. Returns false if the item doesn't exist.
    pub async fn set_item_played(&self, id: ItemId, played: bool) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query("UPDATE items SET played = ?, updated_at = ? WHERE id = ?")
            .bind(played)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::from_sqlx("Failed to set item played", e))?;

        Ok(result.rows_affected() > 0)
    }

    /// Set the playback position. Returns false if the item doesn't exist.
    pub async fn set_item_play_position(&self, id: ItemId, position: i64) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let result =
            sqlx::query("UPDATE items SET play_position = ?, updated_at = ? WHERE id = ?")
                .bind(position.max(0))
                .bind(now)
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| Error::from_sqlx("Failed to set play position", e))?;

        Ok(result.rows_affected() > 0)
    }
}
