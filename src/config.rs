//! Configuration types for podkeep

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Download behavior configuration (directories, concurrency, auto-download)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Root directory for episode files (default: "./podcasts")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Maximum concurrent transfers (default: 3)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,

    /// User-Agent header for feed and media requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Timeout for a single media transfer (default: 30 minutes)
    #[serde(default = "default_media_timeout", with = "duration_serde")]
    pub media_timeout: Duration,

    /// Timeout for fetching a feed document (default: 30 seconds)
    #[serde(default = "default_feed_timeout", with = "duration_serde")]
    pub feed_timeout: Duration,

    /// Download newly discovered items automatically (default: true)
    #[serde(default = "default_true")]
    pub auto_download: bool,

    /// On a feed's first refresh, how many of the newest items to download (default: 5)
    #[serde(default = "default_initial_download_count")]
    pub initial_download_count: usize,

    /// A `Downloading` item whose transfer heartbeat is older than this is
    /// treated as abandoned and failed back (default: 5 minutes)
    #[serde(default = "default_stale_download_after", with = "duration_serde")]
    pub stale_download_after: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            max_concurrent_downloads: default_max_concurrent(),
            user_agent: default_user_agent(),
            media_timeout: default_media_timeout(),
            feed_timeout: default_feed_timeout(),
            auto_download: true,
            initial_download_count: default_initial_download_count(),
            stale_download_after: default_stale_download_after(),
        }
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./podkeep.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Background job schedule
///
/// Every job kind runs on its own interval under its own lock.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Feed refresh interval (default: 30 minutes)
    #[serde(default = "default_refresh_interval", with = "duration_serde")]
    pub refresh_interval: Duration,

    /// Missing-file check interval (default: 1 hour)
    #[serde(default = "default_hourly", with = "duration_serde")]
    pub missing_file_interval: Duration,

    /// Artwork backfill interval (default: 1 hour)
    #[serde(default = "default_hourly", with = "duration_serde")]
    pub image_backfill_interval: Duration,

    /// File size backfill interval (default: 1 hour)
    #[serde(default = "default_hourly", with = "duration_serde")]
    pub size_backfill_interval: Duration,

    /// Stale lock sweep interval (default: 10 minutes)
    #[serde(default = "default_lock_sweep_interval", with = "duration_serde")]
    pub lock_sweep_interval: Duration,

    /// A lock without heartbeat for this long is considered abandoned (default: 30 minutes)
    #[serde(default = "default_lock_stale_after", with = "duration_serde")]
    pub lock_stale_after: Duration,

    /// Run every job once right after start instead of waiting a full interval (default: true)
    #[serde(default = "default_true")]
    pub run_on_start: bool,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            refresh_interval: default_refresh_interval(),
            missing_file_interval: default_hourly(),
            image_backfill_interval: default_hourly(),
            size_backfill_interval: default_hourly(),
            lock_sweep_interval: default_lock_sweep_interval(),
            lock_stale_after: default_lock_stale_after(),
            run_on_start: true,
        }
    }
}

/// Retry configuration for transient transfer failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// What happens to a feed's items when the feed is deleted
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedDeletePolicy {
    /// Delete the items and their downloaded files
    #[default]
    RemoveItems,
    /// Keep the items (and files) with no owning feed
    OrphanItems,
}

/// Main configuration for podkeep
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Download behavior settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Data storage
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Background job schedule
    #[serde(default)]
    pub jobs: JobsConfig,

    /// Retry behavior for media transfers
    #[serde(default)]
    pub retry: RetryConfig,

    /// Feed deletion behavior
    #[serde(default)]
    pub feed_delete_policy: FeedDeletePolicy,

    /// Delete the backing file when an item is removed (default: true)
    #[serde(default = "default_true")]
    pub delete_files_on_remove: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            download: DownloadConfig::default(),
            persistence: PersistenceConfig::default(),
            jobs: JobsConfig::default(),
            retry: RetryConfig::default(),
            feed_delete_policy: FeedDeletePolicy::default(),
            delete_files_on_remove: true,
        }
    }
}

impl Config {
    /// Download directory
    pub fn download_dir(&self) -> &PathBuf {
        &self.download.download_dir
    }

    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(|e| Error::Config {
            message: format!("invalid config: {}", e),
            key: None,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML config file
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| Error::Config {
            message: format!("failed to read {}: {}", path.display(), e),
            key: None,
        })?;
        Self::from_toml_str(&content)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.download.max_concurrent_downloads == 0 {
            return Err(Error::Config {
                message: "max_concurrent_downloads must be at least 1".to_string(),
                key: Some("download.max_concurrent_downloads".to_string()),
            });
        }

        let intervals = [
            ("download.stale_download_after", self.download.stale_download_after),
            ("jobs.refresh_interval", self.jobs.refresh_interval),
            ("jobs.missing_file_interval", self.jobs.missing_file_interval),
            ("jobs.image_backfill_interval", self.jobs.image_backfill_interval),
            ("jobs.size_backfill_interval", self.jobs.size_backfill_interval),
            ("jobs.lock_sweep_interval", self.jobs.lock_sweep_interval),
            ("jobs.lock_stale_after", self.jobs.lock_stale_after),
        ];
        if let Some((key, _)) = intervals.iter().find(|(_, d)| d.is_zero()) {
            return Err(Error::Config {
                message: format!("{} must be greater than zero", key),
                key: Some((*key).to_string()),
            });
        }

        Ok(())
    }
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./podcasts")
}

fn default_max_concurrent() -> usize {
    3
}

fn default_user_agent() -> String {
    format!("podkeep/{}", env!("CARGO_PKG_VERSION"))
}

fn default_media_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_feed_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_initial_download_count() -> usize {
    5
}

fn default_stale_download_after() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./podkeep.db")
}

fn default_refresh_interval() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_hourly() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_lock_sweep_interval() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_lock_stale_after() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// Duration serialization helper (seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config = Config::from_toml_str("").unwrap();

        assert_eq!(config.download.download_dir, PathBuf::from("./podcasts"));
        assert_eq!(config.download.max_concurrent_downloads, 3);
        assert!(config.download.auto_download);
        assert_eq!(config.download.initial_download_count, 5);
        assert_eq!(config.download.stale_download_after, Duration::from_secs(300));
        assert_eq!(config.jobs.refresh_interval, Duration::from_secs(1800));
        assert_eq!(config.jobs.lock_stale_after, Duration::from_secs(1800));
        assert_eq!(config.feed_delete_policy, FeedDeletePolicy::RemoveItems);
        assert!(config.delete_files_on_remove);
    }

    #[test]
    fn toml_overrides_nested_sections_with_durations_in_seconds() {
        let config = Config::from_toml_str(
            r#"
            feed_delete_policy = "orphan_items"

            [download]
            download_dir = "/srv/podcasts"
            max_concurrent_downloads = 6

            [jobs]
            refresh_interval = 600
            run_on_start = false
            "#,
        )
        .unwrap();

        assert_eq!(config.download_dir(), &PathBuf::from("/srv/podcasts"));
        assert_eq!(config.download.max_concurrent_downloads, 6);
        assert_eq!(config.jobs.refresh_interval, Duration::from_secs(600));
        assert_eq!(config.jobs.missing_file_interval, Duration::from_secs(3600));
        assert!(!config.jobs.run_on_start);
        assert_eq!(config.feed_delete_policy, FeedDeletePolicy::OrphanItems);
    }

    #[test]
    fn zero_concurrency_is_rejected_with_key() {
        let err = Config::from_toml_str("[download]\nmax_concurrent_downloads = 0").unwrap_err();
        match err {
            Error::Config { key, .. } => {
                assert_eq!(key.as_deref(), Some("download.max_concurrent_downloads"))
            }
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn zero_interval_is_rejected() {
        let err = Config::from_toml_str("[jobs]\nlock_sweep_interval = 0").unwrap_err();
        assert!(err.to_string().contains("jobs.lock_sweep_interval"));
    }

    #[test]
    fn json_round_trip_preserves_durations() {
        let mut config = Config::default();
        config.retry.initial_delay = Duration::from_secs(5);

        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();

        assert_eq!(back.retry.initial_delay, Duration::from_secs(5));
        assert_eq!(back.download.media_timeout, config.download.media_timeout);
    }
}
