//! Database lifecycle and schema migrations.

use crate::error::DatabaseError;
use crate::{Error, Result};
use sqlx::SqliteConnection;
use sqlx::sqlite::SqlitePool;
use std::path::Path;

use super::Database;
use super::items::search_text;

impl Database {
    /// Create a new database connection
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to create database directory: {}",
                    e
                )))
            })?;
        }

        // Foreign keys drive feed -> item cascades; WAL lets readers run beside job writers
        use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
        use std::str::FromStr;

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to parse database path: {}",
                    e
                )))
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to connect to database: {}",
                e
            )))
        })?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Close the connection pool. Later queries fail with `StoreUnavailable`.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Underlying pool, for callers that need raw queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn run_migrations(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to acquire connection: {}",
                e
            )))
        })?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to create schema_version table: {}",
                e
            )))
        })?;

        let current_version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
                .fetch_one(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to query schema version: {}",
                        e
                    )))
                })?;

        let current_version = current_version.unwrap_or(0);

        if current_version < 1 {
            Self::migrate_v1(&mut conn).await?;
        }
        if current_version < 2 {
            Self::migrate_v2(&mut conn).await?;
        }
        if current_version < 3 {
            Self::migrate_v3(&mut conn).await?;
        }

        Ok(())
    }

    async fn begin_migration(conn: &mut SqliteConnection, version: i32) -> Result<()> {
        tracing::info!("Applying database migration v{}", version);

        // A failed step rolls back so a partial schema is never left behind
        sqlx::query("BEGIN").execute(&mut *conn).await.map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to begin transaction: {}",
                e
            )))
        })?;
        Ok(())
    }

    async fn finish_migration(
        conn: &mut SqliteConnection,
        version: i32,
        result: Result<()>,
    ) -> Result<()> {
        match result {
            Ok(()) => {
                sqlx::query("COMMIT")
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| {
                        Error::Database(DatabaseError::MigrationFailed(format!(
                            "Failed to commit migration v{}: {}",
                            version, e
                        )))
                    })?;
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                return Err(e);
            }
        }

        tracing::info!("Database migration v{} complete", version);
        Ok(())
    }

    /// Migration v1: feeds, items, tags
    async fn migrate_v1(conn: &mut SqliteConnection) -> Result<()> {
        Self::begin_migration(conn, 1).await?;

        let result = async {
            Self::execute_ddl(
                conn,
                "feeds table",
                r#"
                CREATE TABLE feeds (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    url TEXT NOT NULL UNIQUE,
                    title TEXT NOT NULL,
                    author TEXT,
                    summary TEXT,
                    image_url TEXT,
                    last_episode_at INTEGER,
                    explicit INTEGER NOT NULL DEFAULT 0,
                    paused INTEGER NOT NULL DEFAULT 0,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                )
                "#,
            )
            .await?;

            Self::execute_ddl(
                conn,
                "items table",
                r#"
                CREATE TABLE items (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    feed_id INTEGER REFERENCES feeds(id) ON DELETE CASCADE,
                    guid TEXT NOT NULL,
                    title TEXT NOT NULL,
                    summary TEXT NOT NULL DEFAULT '',
                    pub_date INTEGER NOT NULL,
                    duration INTEGER NOT NULL DEFAULT 0,
                    media_url TEXT NOT NULL,
                    image_url TEXT,
                    local_image_path TEXT,
                    status INTEGER NOT NULL DEFAULT 0,
                    file_path TEXT,
                    file_size INTEGER NOT NULL DEFAULT 0,
                    played INTEGER NOT NULL DEFAULT 0,
                    play_position INTEGER NOT NULL DEFAULT 0,
                    last_error TEXT,
                    downloaded_at INTEGER,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    UNIQUE(feed_id, guid)
                )
                "#,
            )
            .await?;

            for (what, ddl) in [
                (
                    "items status index",
                    "CREATE INDEX idx_items_status ON items(status)",
                ),
                (
                    "items pub_date index",
                    "CREATE INDEX idx_items_pub_date ON items(pub_date)",
                ),
                (
                    "items feed index",
                    "CREATE INDEX idx_items_feed_id ON items(feed_id)",
                ),
            ] {
                Self::execute_ddl(conn, what, ddl).await?;
            }

            Self::execute_ddl(
                conn,
                "tags table",
                r#"
                CREATE TABLE tags (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    label TEXT NOT NULL UNIQUE,
                    created_at INTEGER NOT NULL
                )
                "#,
            )
            .await?;

            Self::execute_ddl(
                conn,
                "feed_tags table",
                r#"
                CREATE TABLE feed_tags (
                    feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                    tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
                    PRIMARY KEY (feed_id, tag_id)
                )
                "#,
            )
            .await?;

            Self::record_migration(conn, 1).await
        }
        .await;

        Self::finish_migration(conn, 1, result).await
    }

    /// Migration v2: job locks and runtime state
    async fn migrate_v2(conn: &mut SqliteConnection) -> Result<()> {
        Self::begin_migration(conn, 2).await?;

        let result = async {
            Self::execute_ddl(
                conn,
                "job_locks table",
                r#"
                CREATE TABLE job_locks (
                    name TEXT PRIMARY KEY,
                    owner_token TEXT NOT NULL,
                    acquired_at INTEGER NOT NULL,
                    heartbeat_at INTEGER NOT NULL,
                    stale_after_secs INTEGER NOT NULL
                )
                "#,
            )
            .await?;

            Self::execute_ddl(
                conn,
                "runtime_state table",
                r#"
                CREATE TABLE runtime_state (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at INTEGER NOT NULL
                )
                "#,
            )
            .await?;

            Self::record_migration(conn, 2).await
        }
        .await;

        Self::finish_migration(conn, 2, result).await
    }

    /// Migration v3: search text, download eligibility, transfer heartbeats
    async fn migrate_v3(conn: &mut SqliteConnection) -> Result<()> {
        Self::begin_migration(conn, 3).await?;

        let result = async {
            for (what, ddl) in [
                (
                    "items search_text column",
                    "ALTER TABLE items ADD COLUMN search_text TEXT NOT NULL DEFAULT ''",
                ),
                (
                    "items auto_download column",
                    "ALTER TABLE items ADD COLUMN auto_download INTEGER NOT NULL DEFAULT 0",
                ),
                (
                    "items download_heartbeat_at column",
                    "ALTER TABLE items ADD COLUMN download_heartbeat_at INTEGER",
                ),
            ] {
                Self::execute_ddl(conn, what, ddl).await?;
            }

            // SQLite's lower() only folds ASCII, so existing rows are folded here
            let rows: Vec<(i64, String, String)> =
                sqlx::query_as("SELECT id, title, summary FROM items")
                    .fetch_all(&mut *conn)
                    .await
                    .map_err(|e| {
                        Error::Database(DatabaseError::MigrationFailed(format!(
                            "Failed to read items for search text: {}",
                            e
                        )))
                    })?;
            for (id, title, summary) in rows {
                sqlx::query("UPDATE items SET search_text = ? WHERE id = ?")
                    .bind(search_text(&title, &summary))
                    .bind(id)
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| {
                        Error::Database(DatabaseError::MigrationFailed(format!(
                            "Failed to fill search text: {}",
                            e
                        )))
                    })?;
            }

            Self::record_migration(conn, 3).await
        }
        .await;

        Self::finish_migration(conn, 3, result).await
    }

    async fn execute_ddl(conn: &mut SqliteConnection, what: &str, ddl: &str) -> Result<()> {
        sqlx::query(ddl).execute(&mut *conn).await.map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to create {}: {}",
                what, e
            )))
        })?;
        Ok(())
    }

    async fn record_migration(conn: &mut SqliteConnection, version: i32) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
            .bind(version)
            .bind(now)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to record migration: {}",
                    e
                )))
            })?;
        Ok(())
    }
}
