//! Shard registry: one entry per backing database, each handing out a
//! lazily-created connection pool. Hosts are immutable and cached for the
//! life of the registry.

use crate::error::{CatalogueError, CatalogueResult};
use crate::models::HostRow;
use crate::router::RouterDb;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// One backing database shard with its live connection pool.
pub struct Host {
    row: HostRow,
    pool: Pool<Sqlite>,
}

impl Host {
    pub fn host_index(&self) -> i64 {
        self.row.host_index
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    async fn connect(row: HostRow, shard_root: &std::path::Path) -> CatalogueResult<Self> {
        if row.driver != "sqlite" {
            return Err(CatalogueError::Internal(format!(
                "unsupported shard driver '{}' for host {}",
                row.driver, row.host_index
            )));
        }

        let path = shard_root.join(&row.address).join(&row.db_name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CatalogueError::Internal(e.to_string()))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        Ok(Self { row, pool })
    }
}

/// Process-wide host registry. Loaded rows never change, so entries are
/// cached indefinitely keyed by host index.
pub struct HostRegistry {
    router: Arc<RouterDb>,
    shard_root: PathBuf,
    hosts: RwLock<HashMap<i64, Arc<Host>>>,
}

impl HostRegistry {
    pub fn new(router: Arc<RouterDb>, shard_root: PathBuf) -> Self {
        Self {
            router,
            shard_root,
            hosts: RwLock::new(HashMap::new()),
        }
    }

    /// Get the host for this index, connecting on first use.
    pub async fn host(&self, host_index: i64) -> CatalogueResult<Arc<Host>> {
        {
            let hosts = self.hosts.read().await;
            if let Some(host) = hosts.get(&host_index) {
                return Ok(host.clone());
            }
        }

        let mut hosts = self.hosts.write().await;
        if let Some(host) = hosts.get(&host_index) {
            return Ok(host.clone());
        }

        let row = sqlx::query_as::<_, HostRow>("SELECT * FROM hosts WHERE host_index = ?")
            .bind(host_index)
            .fetch_optional(self.router.pool())
            .await?
            .ok_or_else(|| CatalogueError::NotFound(format!("host {host_index}")))?;

        let host = Arc::new(Host::connect(row, &self.shard_root).await?);
        hosts.insert(host_index, host.clone());
        Ok(host)
    }

    /// All configured hosts.
    pub async fn all_hosts(&self) -> CatalogueResult<Vec<Arc<Host>>> {
        let indexes: Vec<i64> = sqlx::query_scalar("SELECT host_index FROM hosts")
            .fetch_all(self.router.pool())
            .await?;

        let mut out = Vec::with_capacity(indexes.len());
        for idx in indexes {
            out.push(self.host(idx).await?);
        }
        Ok(out)
    }
}
