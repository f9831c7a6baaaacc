//! Episode download status and its transition rules.
//!
//! ```text
//! NotDownloaded --start--> Downloading --succeed--> Downloaded --remove--> Deleted
//!       ^                      |                                             |
//!       +--------fail----------+                                             |
//!       +------------------------------restore-------------------------------+
//! ```
//!
//! Anything not drawn above is rejected with [`Error::InvalidTransition`].
//! This module does no I/O; item-level exclusion comes from the conditional
//! update in [`Database::transition_item_status`](crate::db::Database::transition_item_status).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Download state attached to each item
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    /// Known but not on disk; eligible for download
    NotDownloaded,
    /// A worker owns the transfer
    Downloading,
    /// File on disk, path and size recorded
    Downloaded,
    /// File removed by the user
    Deleted,
}

/// Event requesting a status change
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusEvent {
    /// Worker begins a transfer
    Start,
    /// Transfer finished and the file is in place
    Succeed,
    /// Transfer failed; item becomes retryable
    Fail,
    /// User removed the file
    Remove,
    /// Deleted item becomes eligible again
    Restore,
}

impl DownloadStatus {
    /// Every status, in storage order
    pub const ALL: [DownloadStatus; 4] = [
        DownloadStatus::NotDownloaded,
        DownloadStatus::Downloading,
        DownloadStatus::Downloaded,
        DownloadStatus::Deleted,
    ];

    /// Resulting status after `event`, or `InvalidTransition`
    pub fn apply(self, event: StatusEvent) -> Result<DownloadStatus> {
        use DownloadStatus::*;
        use StatusEvent::*;

        match (self, event) {
            (NotDownloaded, Start) => Ok(Downloading),
            (Downloading, Succeed) => Ok(Downloaded),
            (Downloading, Fail) => Ok(NotDownloaded),
            (Downloaded, Remove) => Ok(Deleted),
            (Deleted, Restore) => Ok(NotDownloaded),
            (from, event) => Err(Error::InvalidTransition { from, event }),
        }
    }

    /// Convert DownloadStatus to its integer storage code
    pub fn to_i32(self) -> i32 {
        match self {
            DownloadStatus::NotDownloaded => 0,
            DownloadStatus::Downloading => 1,
            DownloadStatus::Downloaded => 2,
            DownloadStatus::Deleted => 3,
        }
    }

    /// Snake-case name used in events and filters
    pub fn as_str(self) -> &'static str {
        match self {
            DownloadStatus::NotDownloaded => "not_downloaded",
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Downloaded => "downloaded",
            DownloadStatus::Deleted => "deleted",
        }
    }
}

impl TryFrom<i32> for DownloadStatus {
    type Error = Error;

    fn try_from(code: i32) -> Result<Self> {
        match code {
            0 => Ok(DownloadStatus::NotDownloaded),
            1 => Ok(DownloadStatus::Downloading),
            2 => Ok(DownloadStatus::Downloaded),
            3 => Ok(DownloadStatus::Deleted),
            other => Err(Error::Database(
                crate::error::DatabaseError::CorruptRecord(format!(
                    "unknown download status code {}",
                    other
                )),
            )),
        }
    }
}

impl std::str::FromStr for DownloadStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        DownloadStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::Config {
                message: format!("unknown download status '{}'", s),
                key: Some("status".to_string()),
            })
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusEvent::Start => "start",
            StatusEvent::Succeed => "succeed",
            StatusEvent::Fail => "fail",
            StatusEvent::Remove => "remove",
            StatusEvent::Restore => "restore",
        };
        f.write_str(name)
    }
}

impl sqlx::Type<sqlx::Sqlite> for DownloadStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i32 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i32 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for DownloadStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> std::result::Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.to_i32(), buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for DownloadStatus {
    fn decode(
        value: sqlx::sqlite::SqliteValueRef<'r>,
    ) -> std::result::Result<Self, sqlx::error::BoxDynError> {
        let code = <i32 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(DownloadStatus::try_from(code)?)
    }
}
