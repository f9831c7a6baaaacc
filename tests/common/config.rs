//! Test configuration: everything under one temp dir, fast retries, no timers

use podkeep::{Config, PodKeeper};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

/// Config whose database and download dir live in `root`
pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = root.join("podkeep.db");
    config.download.download_dir = root.join("podcasts");
    config.retry.max_attempts = 1;
    config.retry.initial_delay = Duration::from_millis(5);
    config.retry.max_delay = Duration::from_millis(20);
    config.retry.jitter = false;
    config.jobs.run_on_start = false;
    config
}

/// A fresh engine in its own temp dir
pub async fn create_test_keeper() -> (PodKeeper, TempDir) {
    let temp_dir = tempfile::tempdir().expect("temp dir");
    let keeper = PodKeeper::new(test_config(temp_dir.path()))
        .await
        .expect("engine starts");
    (keeper, temp_dir)
}
