//! Runtime state key/value store (shutdown tracking).

use crate::{Error, Result};

use super::Database;

const CLEAN_SHUTDOWN_KEY: &str = "clean_shutdown";

impl Database {
    /// Read a runtime state value
    pub async fn get_state(&self, key: &str) -> Result<Option<String>> {
        sqlx::query_scalar("SELECT value FROM runtime_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::from_sqlx("Failed to read runtime state", e))
    }

    /// Insert or replace a runtime state value
    pub async fn set_state(&self, key: &str, value: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO runtime_state (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::from_sqlx("Failed to write runtime state", e))?;

        Ok(())
    }

    /// Whether the previous process started but never reached a clean shutdown.
    ///
    /// A fresh database (no previous run) reports `false`.
    pub async fn was_unclean_shutdown(&self) -> Result<bool> {
        Ok(self.get_state(CLEAN_SHUTDOWN_KEY).await?.as_deref() == Some("false"))
    }

    /// Record that the process is running
    pub async fn set_clean_start(&self) -> Result<()> {
        self.set_state(CLEAN_SHUTDOWN_KEY, "false").await
    }

    /// Record a graceful shutdown
    pub async fn set_clean_shutdown(&self) -> Result<()> {
        self.set_state(CLEAN_SHUTDOWN_KEY, "true").await
    }
}
