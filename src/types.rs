//! Core types for podkeep

use crate::status::DownloadStatus;
use serde::{Deserialize, Serialize};

/// Defines an i64-backed row identifier with sqlx support.
macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Wrap a raw row id
            pub fn new(id: i64) -> Self {
                Self(id)
            }

            /// Get the inner i64 value
            pub fn get(&self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl PartialEq<i64> for $name {
            fn eq(&self, other: &i64) -> bool {
                self.0 == *other
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }

        impl sqlx::Type<sqlx::Sqlite> for $name {
            fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
                <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
            }

            fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
                <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
            ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
                sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for $name {
            fn decode(
                value: sqlx::sqlite::SqliteValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
                Ok(Self(id))
            }
        }
    };
}

row_id!(
    /// Unique identifier for a subscribed feed
    FeedId
);

row_id!(
    /// Unique identifier for an episode
    ItemId
);

row_id!(
    /// Unique identifier for a tag
    TagId
);

/// Events emitted by the engine
///
/// Subscribe via [`PodKeeper::subscribe`](crate::PodKeeper::subscribe).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// An item changed download status (emitted right after the update commits)
    ItemStatusChanged {
        /// Item that changed
        item_id: ItemId,
        /// Status before the transition
        old_status: DownloadStatus,
        /// Status after the transition
        new_status: DownloadStatus,
    },

    /// Refresh discovered and stored a new item
    ItemDiscovered {
        /// New item
        item_id: ItemId,
        /// Owning feed
        feed_id: FeedId,
        /// Item title
        title: String,
    },

    /// A transfer failed and the item was reverted to not-downloaded
    DownloadFailed {
        /// Item whose transfer failed
        item_id: ItemId,
        /// Failure description
        error: String,
    },

    /// A feed was subscribed
    FeedAdded {
        /// New feed
        feed_id: FeedId,
        /// Feed URL
        url: String,
    },

    /// A feed could not be fetched or parsed during refresh
    FeedRefreshFailed {
        /// Feed that failed
        feed_id: FeedId,
        /// Feed URL
        url: String,
        /// Failure description
        error: String,
    },

    /// A job cycle was skipped (lock held or store unavailable)
    JobSkipped {
        /// Job lock name
        job: String,
        /// Why the cycle was skipped
        reason: String,
    },

    /// A job cycle finished
    JobCompleted {
        /// Job lock name
        job: String,
        /// Number of records the job changed
        affected: u64,
    },

    /// Engine is shutting down
    Shutdown,
}
