//! Administrative bootstrap: hosts, mount entries, identity time shards and
//! storage elements. Mount and shard creation also provisions the backing
//! tables on the owning host and signals the resolvers.

use crate::clock::Clock;
use crate::error::{CatalogueError, CatalogueResult};
use crate::hosts::HostRegistry;
use crate::models::ShardTableRef;
use crate::mounts::MountResolver;
use crate::router::RouterDb;
use crate::ses::SeDirectory;
use crate::timeshards::TimeShardResolver;
use std::sync::Arc;
use tessella_core::{LogicalPath, Principal};

/// Administrative surface over the directory database.
pub struct Provisioner {
    pub(crate) router: Arc<RouterDb>,
    pub(crate) hosts: Arc<HostRegistry>,
    pub(crate) mounts: Arc<MountResolver>,
    pub(crate) timeshards: Arc<TimeShardResolver>,
    pub(crate) ses: Arc<SeDirectory>,
    pub(crate) clock: Arc<dyn Clock>,
}

impl Provisioner {
    /// Register a backing database shard.
    pub async fn add_host(
        &self,
        host_index: i64,
        address: &str,
        db_name: &str,
    ) -> CatalogueResult<()> {
        sqlx::query(
            "INSERT INTO hosts (host_index, address, db_name, driver) VALUES (?, ?, ?, 'sqlite')",
        )
        .bind(host_index)
        .bind(address)
        .bind(db_name)
        .execute(self.router.pool())
        .await
        .map_err(unique_to_exists(format!("host {host_index}")))?;
        Ok(())
    }

    /// Mount a namespace prefix onto `(host, table)`: creates the namespace
    /// table, its mount-point row, the mount entry, and signals the change.
    pub async fn add_mount(
        &self,
        host_index: i64,
        table_id: i64,
        prefix: &LogicalPath,
        owner: &Principal,
    ) -> CatalogueResult<()> {
        let host = self.hosts.host(host_index).await?;
        let shard = ShardTableRef {
            host_index,
            table_id,
        };

        let table = shard.lfn_table();
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {table} (\n\
                 entry_id INTEGER PRIMARY KEY AUTOINCREMENT,\n\
                 parent_id INTEGER,\n\
                 lfn TEXT NOT NULL UNIQUE,\n\
                 owner TEXT NOT NULL,\n\
                 gowner TEXT NOT NULL,\n\
                 perm TEXT NOT NULL DEFAULT '755',\n\
                 size INTEGER NOT NULL DEFAULT 0,\n\
                 kind TEXT NOT NULL DEFAULT 'f',\n\
                 guid BLOB,\n\
                 guid_time INTEGER,\n\
                 checksum TEXT,\n\
                 ctime TEXT NOT NULL,\n\
                 expires_at TEXT,\n\
                 job_id INTEGER\n\
             );\n\
             CREATE INDEX IF NOT EXISTS idx_{table}_parent ON {table}(parent_id);"
        );
        sqlx::query(&ddl).execute(host.pool()).await?;

        // The mount point itself lives in its own table as the empty
        // relative path.
        let insert_root = format!(
            "INSERT OR IGNORE INTO {table} (parent_id, lfn, owner, gowner, perm, kind, ctime) \
             VALUES (NULL, '', ?, ?, '755', 'd', ?)"
        );
        sqlx::query(&insert_root)
            .bind(owner.account())
            .bind(owner.default_group())
            .bind(self.clock.now())
            .execute(host.pool())
            .await?;

        sqlx::query("INSERT INTO mounts (host_index, table_id, path_prefix) VALUES (?, ?, ?)")
            .bind(host_index)
            .bind(table_id)
            .bind(prefix.dir_form())
            .execute(self.router.pool())
            .await
            .map_err(unique_to_exists(format!("mount {prefix}")))?;

        self.mounts.touch_updated().await?;
        Ok(())
    }

    /// Add an identity time-shard range starting at `guid_time`: creates the
    /// identity, replica and reference tables and invalidates the resolver.
    ///
    /// Placement is permanent: identities already written near `guid_time`
    /// keep their shard, so new ranges should start after the newest
    /// existing boundary.
    pub async fn add_time_shard(
        &self,
        host_index: i64,
        table_id: i64,
        guid_time: i64,
    ) -> CatalogueResult<()> {
        let host = self.hosts.host(host_index).await?;
        let shard = ShardTableRef {
            host_index,
            table_id,
        };

        let guid_table = shard.guid_table();
        let replica_table = shard.replica_table();
        let ref_table = shard.ref_table();
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {guid_table} (\n\
                 guid_id INTEGER PRIMARY KEY AUTOINCREMENT,\n\
                 guid BLOB NOT NULL UNIQUE,\n\
                 owner TEXT NOT NULL,\n\
                 gowner TEXT NOT NULL,\n\
                 perm TEXT NOT NULL DEFAULT '755',\n\
                 size INTEGER NOT NULL DEFAULT 0,\n\
                 checksum TEXT,\n\
                 kind TEXT NOT NULL DEFAULT 'f',\n\
                 se_list TEXT NOT NULL DEFAULT '',\n\
                 ctime TEXT NOT NULL,\n\
                 expires_at TEXT\n\
             );\n\
             CREATE TABLE IF NOT EXISTS {replica_table} (\n\
                 guid_id INTEGER NOT NULL,\n\
                 se_number INTEGER NOT NULL,\n\
                 pfn TEXT NOT NULL,\n\
                 PRIMARY KEY (guid_id, se_number)\n\
             );\n\
             CREATE INDEX IF NOT EXISTS idx_{replica_table}_pfn ON {replica_table}(pfn);\n\
             CREATE TABLE IF NOT EXISTS {ref_table} (\n\
                 guid_id INTEGER NOT NULL,\n\
                 lfn TEXT NOT NULL\n\
             );\n\
             CREATE INDEX IF NOT EXISTS idx_{ref_table}_guid ON {ref_table}(guid_id);"
        );
        sqlx::query(&ddl).execute(host.pool()).await?;

        sqlx::query("INSERT INTO guid_shards (host_index, table_id, guid_time) VALUES (?, ?, ?)")
            .bind(host_index)
            .bind(table_id)
            .bind(guid_time)
            .execute(self.router.pool())
            .await
            .map_err(unique_to_exists(format!("time shard at {guid_time}")))?;

        self.timeshards.invalidate();
        Ok(())
    }

    /// Register a storage element.
    pub async fn add_storage_element(
        &self,
        se_number: i64,
        se_name: &str,
        storage_prefix: &str,
        writable: bool,
        physical: bool,
        qos: &[&str],
    ) -> CatalogueResult<()> {
        let qos_json = serde_json::to_string(qos)
            .map_err(|e| CatalogueError::Internal(e.to_string()))?;
        sqlx::query(
            "INSERT INTO storage_elements \
             (se_number, se_name, storage_prefix, writable, physical, qos) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(se_number)
        .bind(se_name)
        .bind(storage_prefix)
        .bind(writable)
        .bind(physical)
        .bind(qos_json)
        .execute(self.router.pool())
        .await
        .map_err(unique_to_exists(format!("storage element {se_name}")))?;

        self.ses.invalidate();
        Ok(())
    }
}

fn unique_to_exists(what: String) -> impl FnOnce(sqlx::Error) -> CatalogueError {
    move |e| {
        if e.as_database_error()
            .is_some_and(|d| d.is_unique_violation())
        {
            CatalogueError::AlreadyExists(what)
        } else {
            CatalogueError::ShardUnavailable(e)
        }
    }
}
