//! HTTP-to-file transfer with retry.

use crate::config::RetryConfig;
use crate::retry::{IsRetryable, io_error_is_transient, with_retry};
use crate::utils::partial_path;
use std::path::Path;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Why one transfer attempt failed
#[derive(Debug, Error)]
pub(crate) enum TransferError {
    /// Server answered with a non-success status
    #[error("HTTP {status}")]
    Http {
        /// Response status code
        status: u16,
    },

    /// Request or body read failed
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Writing the file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IsRetryable for TransferError {
    fn is_retryable(&self) -> bool {
        match self {
            TransferError::Http { status } => *status == 429 || (500..600).contains(status),
            TransferError::Network(e) => e.is_timeout() || e.is_connect() || e.is_body(),
            TransferError::Io(e) => io_error_is_transient(e),
        }
    }
}

/// Download `url` to `dest`, retrying transient failures.
///
/// Bytes go to `<dest>.part` and are renamed into place only once complete,
/// so `dest` never holds a truncated file. Returns the byte count.
pub(crate) async fn fetch_to_file(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    retry: &RetryConfig,
) -> Result<u64, TransferError> {
    with_retry(retry, || attempt(client, url, dest)).await
}

async fn attempt(client: &reqwest::Client, url: &str, dest: &Path) -> Result<u64, TransferError> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(TransferError::Http {
            status: status.as_u16(),
        });
    }

    let part = partial_path(dest);
    let mut file = tokio::fs::File::create(&part).await?;
    let mut written: u64 = 0;

    let streamed: Result<(), TransferError> = async {
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }
    .await;
    drop(file);

    if let Err(e) = streamed {
        tokio::fs::remove_file(&part).await.ok();
        return Err(e);
    }

    tokio::fs::rename(&part, dest).await?;
    Ok(written)
}
