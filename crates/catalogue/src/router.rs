//! The directory database: hosts, mount entries, identity time shards,
//! storage elements, bookings and the physical-purge queue all live here.

use crate::error::CatalogueResult;
use crate::models::{MountRow, TimeShardRow};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Handle to the directory database.
pub struct RouterDb {
    pool: Pool<Sqlite>,
}

impl RouterDb {
    /// Open (creating if necessary) the directory database.
    pub async fn open(path: impl AsRef<Path>) -> CatalogueResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| crate::error::CatalogueError::Internal(e.to_string()))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; a single connection
            // avoids persistent "database is locked" failures under test load.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Apply the directory schema.
    pub async fn migrate(&self) -> CatalogueResult<()> {
        sqlx::query(ROUTER_SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Check database connectivity.
    pub async fn health_check(&self) -> CatalogueResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// All mount entries, longest prefix first.
    pub async fn load_mounts(&self) -> CatalogueResult<Vec<MountRow>> {
        let rows = sqlx::query_as::<_, MountRow>(
            "SELECT * FROM mounts ORDER BY length(path_prefix) DESC, path_prefix DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// All identity time-shard entries, range start ascending.
    pub async fn load_time_shards(&self) -> CatalogueResult<Vec<TimeShardRow>> {
        let rows =
            sqlx::query_as::<_, TimeShardRow>("SELECT * FROM guid_shards ORDER BY guid_time ASC")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }

    /// Read the mount-table modification timestamp (Unix seconds). This is
    /// the cheap staleness probe: one row, one column.
    pub async fn probe_mounts_updated(&self) -> CatalogueResult<i64> {
        let updated: i64 =
            sqlx::query_scalar("SELECT last_updated FROM mounts_updated WHERE id = 1")
                .fetch_one(&self.pool)
                .await?;
        Ok(updated)
    }

    /// Record that the mount table was modified, for other processes'
    /// staleness probes to pick up.
    pub async fn touch_mounts_updated(&self, now_unix: i64) -> CatalogueResult<()> {
        sqlx::query("UPDATE mounts_updated SET last_updated = ? WHERE id = 1")
            .bind(now_unix)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Directory database schema (embedded).
const ROUTER_SCHEMA_SQL: &str = r#"
-- Backing database shards
CREATE TABLE IF NOT EXISTS hosts (
    host_index INTEGER PRIMARY KEY,
    address TEXT NOT NULL,
    db_name TEXT NOT NULL,
    driver TEXT NOT NULL DEFAULT 'sqlite'
);

-- Namespace prefix -> (host, table)
CREATE TABLE IF NOT EXISTS mounts (
    mount_id INTEGER PRIMARY KEY AUTOINCREMENT,
    host_index INTEGER NOT NULL REFERENCES hosts(host_index),
    table_id INTEGER NOT NULL,
    path_prefix TEXT NOT NULL UNIQUE
);

-- Single-row staleness probe for the mount table
CREATE TABLE IF NOT EXISTS mounts_updated (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    last_updated INTEGER NOT NULL
);
INSERT OR IGNORE INTO mounts_updated (id, last_updated) VALUES (1, 0);

-- Identity index-time range start -> (host, table)
CREATE TABLE IF NOT EXISTS guid_shards (
    shard_id INTEGER PRIMARY KEY AUTOINCREMENT,
    host_index INTEGER NOT NULL REFERENCES hosts(host_index),
    table_id INTEGER NOT NULL,
    guid_time INTEGER NOT NULL UNIQUE
);

-- Storage element directory with aggregate usage counters
CREATE TABLE IF NOT EXISTS storage_elements (
    se_number INTEGER PRIMARY KEY,
    se_name TEXT NOT NULL UNIQUE COLLATE NOCASE,
    storage_prefix TEXT NOT NULL,
    writable INTEGER NOT NULL DEFAULT 1,
    physical INTEGER NOT NULL DEFAULT 1,
    qos TEXT NOT NULL DEFAULT '[]',
    used_files INTEGER NOT NULL DEFAULT 0,
    used_bytes INTEGER NOT NULL DEFAULT 0
);

-- Write-booking reservations; expires_at is a signed lease
CREATE TABLE IF NOT EXISTS bookings (
    lfn TEXT NOT NULL,
    owner TEXT NOT NULL,
    gowner TEXT NOT NULL,
    expires_at INTEGER NOT NULL,
    size INTEGER NOT NULL,
    checksum TEXT,
    pfn TEXT NOT NULL,
    se_name TEXT NOT NULL COLLATE NOCASE,
    guid BLOB NOT NULL,
    job_id INTEGER,
    retain INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_bookings_key ON bookings(guid, se_name, pfn);
CREATE INDEX IF NOT EXISTS idx_bookings_job ON bookings(job_id);
CREATE INDEX IF NOT EXISTS idx_bookings_pfn ON bookings(pfn);

-- Physical purge queue consumed by the transfer layer
CREATE TABLE IF NOT EXISTS orphan_pfns (
    guid BLOB NOT NULL,
    se_number INTEGER,
    checksum TEXT,
    size INTEGER,
    pfn TEXT,
    UNIQUE (guid, se_number)
);
"#;
