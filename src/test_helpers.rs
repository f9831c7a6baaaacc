//! Shared fixtures for unit tests.

use crate::config::Config;
use crate::db::{Database, InsertFeedParams, InsertItemParams};
use crate::status::DownloadStatus;
use crate::types::{FeedId, ItemId};
use std::sync::Arc;
use tempfile::TempDir;

/// Fresh migrated database in a temp dir. Keep the `TempDir` alive.
pub(crate) async fn create_test_db() -> (Arc<Database>, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let db = Database::new(&temp_dir.path().join("test.db")).await.unwrap();
    (Arc::new(db), temp_dir)
}

/// Config pointing every path into `temp_dir`, with fast retries
pub(crate) fn test_config(temp_dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = temp_dir.path().join("test.db");
    config.download.download_dir = temp_dir.path().join("podcasts");
    config.retry.max_attempts = 1;
    config.retry.initial_delay = std::time::Duration::from_millis(5);
    config.retry.max_delay = std::time::Duration::from_millis(20);
    config.retry.jitter = false;
    config
}

pub(crate) async fn insert_test_feed(db: &Database, url: &str, title: &str) -> FeedId {
    db.insert_feed(&InsertFeedParams {
        url,
        title,
        ..Default::default()
    })
    .await
    .unwrap()
}

pub(crate) async fn insert_test_item(
    db: &Database,
    feed_id: FeedId,
    guid: &str,
    title: &str,
    pub_date: i64,
    duration: i64,
) -> ItemId {
    let media_url = format!("https://cdn.example.com/{guid}.mp3");
    db.insert_item_if_absent(&InsertItemParams {
        feed_id,
        guid,
        title,
        summary: "",
        pub_date,
        duration,
        media_url: &media_url,
        image_url: None,
        file_size: 0,
    })
    .await
    .unwrap()
    .unwrap()
}

/// Force a status without going through the state machine, for scenario setup
pub(crate) async fn force_status(
    db: &Database,
    id: ItemId,
    status: DownloadStatus,
    file_path: Option<&str>,
) {
    sqlx::query("UPDATE items SET status = ?, file_path = ? WHERE id = ?")
        .bind(status)
        .bind(file_path)
        .bind(id)
        .execute(db.pool())
        .await
        .unwrap();
}
