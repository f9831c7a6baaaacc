//! Item status transitions against the store.
//!
//! Every status change goes through [`ItemLifecycle`]: the legal next status is
//! computed by [`DownloadStatus::apply`], written with a compare-and-set update,
//! and announced as [`Event::ItemStatusChanged`] once the update has committed.

use crate::db::{Database, Item};
use crate::status::{DownloadStatus, StatusEvent};
use crate::types::{Event, ItemId};
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Applies status events to stored items
#[derive(Clone)]
pub struct ItemLifecycle {
    db: Arc<Database>,
    event_tx: broadcast::Sender<Event>,
}

impl ItemLifecycle {
    /// Create a lifecycle handle emitting on `event_tx`
    pub fn new(db: Arc<Database>, event_tx: broadcast::Sender<Event>) -> Self {
        Self { db, event_tx }
    }

    /// Load an item or fail with [`Error::NotFound`]
    pub async fn load(&self, id: ItemId) -> Result<Item> {
        self.db
            .get_item(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("item {}", id)))
    }

    /// Apply `event` to the item's current status.
    ///
    /// Fails with [`Error::InvalidTransition`] when the event is not legal from
    /// the stored status, including when another writer changed it between the
    /// read and the conditional update.
    pub async fn apply(&self, id: ItemId, event: StatusEvent) -> Result<DownloadStatus> {
        let item = self.load(id).await?;
        let from = item.status;
        let to = self.checked(id, from, event)?;

        if !self.db.transition_item_status(id, from, to).await? {
            return Err(self.lost_race(id, event).await);
        }

        self.emit(id, from, to);
        Ok(to)
    }

    /// `Downloading --Succeed--> Downloaded`, recording the file
    pub async fn succeed(&self, id: ItemId, file_path: &str, file_size: i64) -> Result<()> {
        let from = DownloadStatus::Downloading;
        let to = self.checked(id, from, StatusEvent::Succeed)?;

        if !self
            .db
            .complete_item_download(id, file_path, file_size)
            .await?
        {
            return Err(self.lost_race(id, StatusEvent::Succeed).await);
        }

        self.emit(id, from, to);
        Ok(())
    }

    /// `Downloading --Fail--> NotDownloaded`, recording the reason
    pub async fn fail(&self, id: ItemId, reason: &str) -> Result<()> {
        let from = DownloadStatus::Downloading;
        let to = self.checked(id, from, StatusEvent::Fail)?;

        if !self.db.fail_item_download(id, reason).await? {
            return Err(self.lost_race(id, StatusEvent::Fail).await);
        }

        self.emit(id, from, to);
        Ok(())
    }

    /// `Downloading --Fail--> NotDownloaded` for a transfer whose heartbeat is
    /// older than `cutoff`. Returns false, without emitting, when the item is
    /// still being worked on or has left `Downloading`.
    pub async fn fail_if_stale(&self, id: ItemId, cutoff: i64, reason: &str) -> Result<bool> {
        let from = DownloadStatus::Downloading;
        let to = self.checked(id, from, StatusEvent::Fail)?;

        if !self.db.fail_stale_item_download(id, cutoff, reason).await? {
            return Ok(false);
        }

        self.emit(id, from, to);
        Ok(true)
    }

    /// Event sender shared with the facade
    pub fn events(&self) -> &broadcast::Sender<Event> {
        &self.event_tx
    }

    fn checked(&self, id: ItemId, from: DownloadStatus, event: StatusEvent) -> Result<DownloadStatus> {
        from.apply(event).inspect_err(|e| {
            tracing::error!(item_id = %id, error = %e, "rejected status transition");
        })
    }

    async fn lost_race(&self, id: ItemId, event: StatusEvent) -> Error {
        match self.db.get_item(id).await {
            Ok(Some(current)) => {
                let err = Error::InvalidTransition {
                    from: current.status,
                    event,
                };
                tracing::error!(item_id = %id, error = %err, "status changed concurrently");
                err
            }
            Ok(None) => Error::NotFound(format!("item {}", id)),
            Err(e) => e,
        }
    }

    fn emit(&self, item_id: ItemId, old_status: DownloadStatus, new_status: DownloadStatus) {
        tracing::debug!(item_id = %item_id, from = %old_status, to = %new_status, "item status changed");
        self.event_tx
            .send(Event::ItemStatusChanged {
                item_id,
                old_status,
                new_status,
            })
            .ok();
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{create_test_db, insert_test_feed, insert_test_item};

    async fn setup() -> (ItemLifecycle, broadcast::Receiver<Event>, ItemId, tempfile::TempDir) {
        let (db, dir) = create_test_db().await;
        let feed = insert_test_feed(&db, "https://a.example/rss", "A").await;
        let item = insert_test_item(&db, feed, "g", "Ep", 1, 1).await;
        let (tx, rx) = broadcast::channel(64);
        (ItemLifecycle::new(db, tx), rx, item, dir)
    }

    #[tokio::test]
    async fn full_cycle_emits_one_event_per_transition() {
        let (lifecycle, mut rx, id, _dir) = setup().await;

        assert_eq!(
            lifecycle.apply(id, StatusEvent::Start).await.unwrap(),
            DownloadStatus::Downloading
        );
        lifecycle.succeed(id, "/p/ep.mp3", 100).await.unwrap();
        assert_eq!(
            lifecycle.apply(id, StatusEvent::Remove).await.unwrap(),
            DownloadStatus::Deleted
        );
        assert_eq!(
            lifecycle.apply(id, StatusEvent::Restore).await.unwrap(),
            DownloadStatus::NotDownloaded
        );

        let expected = [
            (DownloadStatus::NotDownloaded, DownloadStatus::Downloading),
            (DownloadStatus::Downloading, DownloadStatus::Downloaded),
            (DownloadStatus::Downloaded, DownloadStatus::Deleted),
            (DownloadStatus::Deleted, DownloadStatus::NotDownloaded),
        ];
        for (old, new) in expected {
            assert_eq!(
                rx.try_recv().unwrap(),
                Event::ItemStatusChanged {
                    item_id: id,
                    old_status: old,
                    new_status: new
                }
            );
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn illegal_event_is_rejected_without_writing() {
        let (lifecycle, mut rx, id, _dir) = setup().await;

        let result = lifecycle.apply(id, StatusEvent::Remove).await;
        assert!(matches!(
            result,
            Err(Error::InvalidTransition {
                from: DownloadStatus::NotDownloaded,
                event: StatusEvent::Remove
            })
        ));
        assert_eq!(lifecycle.load(id).await.unwrap().status, DownloadStatus::NotDownloaded);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn succeed_requires_downloading() {
        let (lifecycle, _rx, id, _dir) = setup().await;

        let result = lifecycle.succeed(id, "/p/x.mp3", 1).await;
        assert!(matches!(
            result,
            Err(Error::InvalidTransition {
                from: DownloadStatus::NotDownloaded,
                event: StatusEvent::Succeed
            })
        ));
    }

    #[tokio::test]
    async fn concurrent_starts_yield_one_winner() {
        let (lifecycle, _rx, id, _dir) = setup().await;

        let a = lifecycle.clone();
        let b = lifecycle.clone();
        let (ra, rb) = tokio::join!(
            tokio::spawn(async move { a.apply(id, StatusEvent::Start).await }),
            tokio::spawn(async move { b.apply(id, StatusEvent::Start).await }),
        );
        let results = [ra.unwrap(), rb.unwrap()];

        let wins = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| {
                matches!(
                    r,
                    Err(Error::InvalidTransition {
                        from: DownloadStatus::Downloading,
                        event: StatusEvent::Start
                    })
                )
            })
            .count();
        assert_eq!(wins, 1);
        assert_eq!(conflicts, 1);
    }

    #[tokio::test]
    async fn missing_item_is_not_found() {
        let (lifecycle, _rx, _id, _dir) = setup().await;

        let result = lifecycle.apply(ItemId(12345), StatusEvent::Start).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
