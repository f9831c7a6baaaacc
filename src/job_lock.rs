//! Persisted, named, time-bounded mutual exclusion for background jobs.
//!
//! Each [`JobKind`] has its own lock row. A holder proves ownership with the
//! [`LockToken`] it was granted; a lock whose heartbeat is older than its
//! stale threshold is treated as abandoned and can be reclaimed.

use crate::Result;
use crate::db::Database;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// Background job kinds, one lock each
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JobKind {
    /// Fetch feeds and record new episodes
    RefreshEpisodes,
    /// Reconcile downloaded items against the filesystem
    CheckMissingFiles,
    /// Save artwork for downloaded items
    DownloadMissingImages,
    /// Fill in unknown file sizes
    BackfillFileSizes,
    /// Remove abandoned lock records
    SweepStaleLocks,
}

impl JobKind {
    /// Every job kind
    pub const ALL: [JobKind; 5] = [
        JobKind::RefreshEpisodes,
        JobKind::CheckMissingFiles,
        JobKind::DownloadMissingImages,
        JobKind::BackfillFileSizes,
        JobKind::SweepStaleLocks,
    ];

    /// Lock record name
    pub fn name(self) -> &'static str {
        match self {
            JobKind::RefreshEpisodes => "refresh-episodes",
            JobKind::CheckMissingFiles => "check-missing-files",
            JobKind::DownloadMissingImages => "download-missing-images",
            JobKind::BackfillFileSizes => "backfill-file-sizes",
            JobKind::SweepStaleLocks => "sweep-stale-locks",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Proof of lock ownership
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockToken {
    kind: JobKind,
    token: String,
}

impl LockToken {
    fn generate(kind: JobKind) -> Self {
        let nonce: u64 = rand::thread_rng().r#gen();
        Self {
            kind,
            token: format!("{}-{:016x}", std::process::id(), nonce),
        }
    }

    /// Job kind this token holds
    pub fn kind(&self) -> JobKind {
        self.kind
    }

    /// Opaque owner string stored in the lock row
    pub fn as_str(&self) -> &str {
        &self.token
    }
}

/// Job lock manager over the shared store
#[derive(Clone)]
pub struct JobLock {
    db: Arc<Database>,
    stale_after: Duration,
}

impl JobLock {
    /// Create a lock manager; locks older than `stale_after` without heartbeat are reclaimable
    pub fn new(db: Arc<Database>, stale_after: Duration) -> Self {
        Self { db, stale_after }
    }

    /// Configured stale threshold
    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Try to take the lock for `kind`.
    ///
    /// `Ok(None)` means another holder has it. Store failures surface as
    /// [`Error::StoreUnavailable`](crate::Error::StoreUnavailable).
    pub async fn acquire(&self, kind: JobKind) -> Result<Option<LockToken>> {
        self.acquire_at(kind, now()).await
    }

    /// [`acquire`](Self::acquire) with an explicit clock
    pub async fn acquire_at(&self, kind: JobKind, now: i64) -> Result<Option<LockToken>> {
        let token = LockToken::generate(kind);
        let granted = self
            .db
            .try_acquire_job_lock(kind.name(), token.as_str(), self.stale_secs(), now)
            .await?;

        if granted {
            tracing::debug!(job = %kind, token = token.as_str(), "job lock acquired");
            Ok(Some(token))
        } else {
            tracing::debug!(job = %kind, "job lock held elsewhere");
            Ok(None)
        }
    }

    /// Refresh the heartbeat. Returns false if the lock was lost.
    pub async fn heartbeat(&self, token: &LockToken) -> Result<bool> {
        self.heartbeat_at(token, now()).await
    }

    /// [`heartbeat`](Self::heartbeat) with an explicit clock
    pub async fn heartbeat_at(&self, token: &LockToken, now: i64) -> Result<bool> {
        let held = self
            .db
            .heartbeat_job_lock(token.kind.name(), token.as_str(), now)
            .await?;
        if !held {
            tracing::warn!(job = %token.kind, "job lock was reclaimed while held");
        }
        Ok(held)
    }

    /// Release the lock. Returns false if it was no longer ours.
    pub async fn release(&self, token: &LockToken) -> Result<bool> {
        self.db
            .release_job_lock(token.kind.name(), token.as_str())
            .await
    }

    /// Delete every lock whose heartbeat exceeded its threshold
    pub async fn sweep_stale(&self) -> Result<u64> {
        self.sweep_stale_at(now()).await
    }

    /// [`sweep_stale`](Self::sweep_stale) with an explicit clock
    pub async fn sweep_stale_at(&self, now: i64) -> Result<u64> {
        let removed = self.db.delete_stale_job_locks(now).await?;
        if removed > 0 {
            tracing::info!(removed, "swept stale job locks");
        }
        Ok(removed)
    }

    fn stale_secs(&self) -> i64 {
        i64::try_from(self.stale_after.as_secs()).unwrap_or(i64::MAX)
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
