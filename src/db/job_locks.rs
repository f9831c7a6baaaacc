//! Persisted job-kind mutual exclusion records.
//!
//! A lock row is owned by whoever holds its `owner_token`. A row whose
//! heartbeat is older than its `stale_after_secs` is abandoned and may be
//! taken over by the next acquirer.

use crate::{Error, Result};

use super::{Database, JobLockRecord};

impl Database {
    /// Try to take the lock `name` for `token` at time `now`.
    ///
    /// Succeeds when no row exists or the existing row's heartbeat is older
    /// than `now - stale_after_secs`. The check and the write are one statement,
    /// so two acquirers can never both succeed.
    pub async fn try_acquire_job_lock(
        &self,
        name: &str,
        token: &str,
        stale_after_secs: i64,
        now: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO job_locks (name, owner_token, acquired_at, heartbeat_at, stale_after_secs)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                owner_token = excluded.owner_token,
                acquired_at = excluded.acquired_at,
                heartbeat_at = excluded.heartbeat_at,
                stale_after_secs = excluded.stale_after_secs
            WHERE job_locks.heartbeat_at < ?
            "#,
        )
        .bind(name)
        .bind(token)
        .bind(now)
        .bind(now)
        .bind(stale_after_secs)
        .bind(now.saturating_sub(stale_after_secs))
        .execute(&self.pool)
        .await
        .map_err(|e| Error::from_sqlx("Failed to acquire job lock", e))?;

        Ok(result.rows_affected() == 1)
    }

    /// Refresh the heartbeat if `token` still owns the lock
    pub async fn heartbeat_job_lock(&self, name: &str, token: &str, now: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE job_locks SET heartbeat_at = ? WHERE name = ? AND owner_token = ?",
        )
        .bind(now)
        .bind(name)
        .bind(token)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::from_sqlx("Failed to heartbeat job lock", e))?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete the lock if `token` still owns it
    pub async fn release_job_lock(&self, name: &str, token: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM job_locks WHERE name = ? AND owner_token = ?")
            .bind(name)
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::from_sqlx("Failed to release job lock", e))?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete every lock whose heartbeat is older than its own threshold
    pub async fn delete_stale_job_locks(&self, now: i64) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM job_locks WHERE heartbeat_at < ? - stale_after_secs")
                .bind(now)
                .execute(&self.pool)
                .await
                .map_err(|e| Error::from_sqlx("Failed to sweep job locks", e))?;

        Ok(result.rows_affected())
    }

    /// Current lock row, if any
    pub async fn get_job_lock(&self, name: &str) -> Result<Option<JobLockRecord>> {
        sqlx::query_as::<_, JobLockRecord>(
            r#"
            SELECT name, owner_token, acquired_at, heartbeat_at, stale_after_secs
            FROM job_locks
            WHERE name = ?
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::from_sqlx("Failed to get job lock", e))
    }
}
