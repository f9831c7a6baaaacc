//! Error types for podkeep
//!
//! This module provides error handling for the library, including:
//! - The lifecycle taxonomy (fetch, transition, store, not-found, transfer)
//! - HTTP status code mapping for a presentation layer
//! - Structured error responses with machine-readable error codes

use crate::status::{DownloadStatus, StatusEvent};
use crate::types::ItemId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for podkeep operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for podkeep
///
/// Per-feed (`Fetch`) and per-item (`Transfer`) failures are isolated by their callers.
/// Only `StoreUnavailable` aborts a whole job cycle.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "download_dir")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// The backing store cannot be reached (pool closed, timed out, I/O failure)
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Feed could not be fetched or parsed
    #[error("failed to fetch feed {url}: {reason}")]
    Fetch {
        /// Feed URL
        url: String,
        /// What went wrong
        reason: String,
    },

    /// Requested status transition is not legal from the current status
    #[error("invalid transition: cannot apply {event} to {from} item")]
    InvalidTransition {
        /// Status the item was in
        from: DownloadStatus,
        /// Event that was rejected
        event: StatusEvent,
    },

    /// Media transfer failed for one item
    #[error("transfer failed for item {item_id}: {reason}")]
    Transfer {
        /// Item whose download failed
        item_id: ItemId,
        /// What went wrong
        reason: String,
    },

    /// Record not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Feed is already subscribed
    #[error("duplicate: {0}")]
    Duplicate(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Shutdown in progress - not accepting new downloads
    #[error("shutdown in progress: not accepting new downloads")]
    ShuttingDown,

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Stored value could not be decoded into a domain type
    #[error("corrupt record: {0}")]
    CorruptRecord(String),

    /// Constraint violation (e.g., duplicate key)
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
}

impl Error {
    /// Classify a sqlx error raised while running `context`.
    ///
    /// Connectivity failures become [`Error::StoreUnavailable`] so job cycles can
    /// tell an outage apart from a bad query.
    pub(crate) fn from_sqlx(context: &str, e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolClosed
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::Io(_)
            | sqlx::Error::WorkerCrashed => {
                Error::StoreUnavailable(format!("{}: {}", context, e))
            }
            sqlx::Error::Database(ref db) if db.is_unique_violation() => Error::Database(
                DatabaseError::ConstraintViolation(format!("{}: {}", context, e)),
            ),
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                Error::Database(DatabaseError::CorruptRecord(format!("{}: {}", context, e)))
            }
            other => Error::Database(DatabaseError::QueryFailed(format!(
                "{}: {}",
                context, other
            ))),
        }
    }

    /// Whether this error should abort the current job cycle
    pub fn is_store_outage(&self) -> bool {
        matches!(self, Error::StoreUnavailable(_))
    }
}

/// API error response format
///
/// ```json
/// {
///   "error": {
///     "code": "not_found",
///     "message": "not found: feed https://example.com/feed.xml",
///     "details": { "item_id": 123 }
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// Error details
    pub error: ErrorDetail,
}

/// Detailed error information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "not_found", "invalid_transition")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create an API error with additional details
    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: Some(details),
            },
        }
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            Error::Config { .. } => 400,
            Error::NotFound(_) => 404,
            Error::InvalidTransition { .. } | Error::Duplicate(_) => 409,
            Error::Fetch { .. } | Error::Transfer { .. } | Error::Network(_) => 502,
            Error::StoreUnavailable(_) | Error::ShuttingDown => 503,
            Error::Database(_) | Error::Io(_) | Error::Serialization(_) | Error::Other(_) => 500,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Database(_) => "database_error",
            Error::StoreUnavailable(_) => "store_unavailable",
            Error::Fetch { .. } => "fetch_error",
            Error::InvalidTransition { .. } => "invalid_transition",
            Error::Transfer { .. } => "transfer_error",
            Error::NotFound(_) => "not_found",
            Error::Duplicate(_) => "duplicate",
            Error::Io(_) => "io_error",
            Error::ShuttingDown => "shutting_down",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        match &error {
            Error::InvalidTransition { from, event } => ApiError::with_details(
                code,
                message,
                serde_json::json!({ "current_status": from, "event": event }),
            ),
            Error::Transfer { item_id, .. } => ApiError::with_details(
                code,
                message,
                serde_json::json!({ "item_id": item_id }),
            ),
            Error::Fetch { url, .. } => {
                ApiError::with_details(code, message, serde_json::json!({ "url": url }))
            }
            Error::Config { key: Some(key), .. } => {
                ApiError::with_details(code, message, serde_json::json!({ "key": key }))
            }
            _ => ApiError::new(code, message),
        }
    }
}
