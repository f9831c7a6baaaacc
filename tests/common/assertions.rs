//! Event and state assertions for integration tests

use podkeep::{DownloadStatus, Event, ItemId};
use std::time::Duration;
use tokio::sync::broadcast;

/// Drain every event already buffered
pub fn drain_events(events: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    std::iter::from_fn(|| events.try_recv().ok()).collect()
}

/// Status transitions reported for one item, in order
pub fn transitions_for(events: &[Event], item: ItemId) -> Vec<(DownloadStatus, DownloadStatus)> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::ItemStatusChanged {
                item_id,
                old_status,
                new_status,
            } if *item_id == item => Some((*old_status, *new_status)),
            _ => None,
        })
        .collect()
}

/// Wait until `item` is reported in `status`. Returns false on timeout.
pub async fn wait_for_status(
    events: &mut broadcast::Receiver<Event>,
    item: ItemId,
    status: DownloadStatus,
    timeout: Duration,
) -> bool {
    tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(Event::ItemStatusChanged {
                    item_id,
                    new_status,
                    ..
                }) if item_id == item && new_status == status => return true,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return false,
            }
        }
    })
    .await
    .unwrap_or(false)
}
