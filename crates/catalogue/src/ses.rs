//! Storage element directory: capability lookup, default physical-location
//! generation, and aggregate usage counters.

use crate::clock::Clock;
use crate::error::{CatalogueError, CatalogueResult};
use crate::models::SeRow;
use crate::router::RouterDb;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tessella_core::Guid;
use tokio::sync::RwLock;

/// One storage element with its capabilities.
#[derive(Debug, Clone)]
pub struct StorageElement {
    pub se_number: i64,
    pub se_name: String,
    pub storage_prefix: String,
    pub writable: bool,
    /// Placeholder elements (archive containers, zero-cost locations) are
    /// not physical: their replicas never produce purge records and never
    /// count towards storage usage.
    pub physical: bool,
    pub qos: Vec<String>,
}

impl StorageElement {
    fn from_row(row: SeRow) -> Self {
        let qos = serde_json::from_str(&row.qos).unwrap_or_default();
        Self {
            se_number: row.se_number,
            se_name: row.se_name,
            storage_prefix: row.storage_prefix,
            writable: row.writable,
            physical: row.physical,
            qos,
        }
    }

    /// The element's default physical location for an identity: two levels
    /// of time-derived fan-out directories under the storage prefix.
    pub fn generate_pfn(&self, guid: Guid) -> String {
        let t = guid.epoch_time_ms() / 1000;
        format!(
            "{}/{:02}/{:05}/{}",
            self.storage_prefix.trim_end_matches('/'),
            t % 100,
            (t / 100) % 100_000,
            guid
        )
    }
}

struct SeCache {
    by_number: HashMap<i64, Arc<StorageElement>>,
    by_name: HashMap<String, Arc<StorageElement>>,
}

impl SeCache {
    fn empty() -> Self {
        Self {
            by_number: HashMap::new(),
            by_name: HashMap::new(),
        }
    }
}

/// Cached directory of storage elements.
pub struct SeDirectory {
    router: Arc<RouterDb>,
    clock: Arc<dyn Clock>,
    ttl_ms: i64,
    cache: RwLock<Arc<SeCache>>,
    loaded_at: AtomicI64,
}

impl SeDirectory {
    pub fn new(router: Arc<RouterDb>, clock: Arc<dyn Clock>, ttl_secs: u64) -> Self {
        Self {
            router,
            clock,
            ttl_ms: ttl_secs as i64 * 1000,
            cache: RwLock::new(Arc::new(SeCache::empty())),
            loaded_at: AtomicI64::new(0),
        }
    }

    /// Look up a storage element by name (case-insensitive).
    pub async fn by_name(&self, name: &str) -> CatalogueResult<Option<Arc<StorageElement>>> {
        let cache = self.current().await;
        Ok(cache.by_name.get(&name.to_lowercase()).cloned())
    }

    /// Look up a storage element by number.
    pub async fn by_number(&self, se_number: i64) -> CatalogueResult<Option<Arc<StorageElement>>> {
        let cache = self.current().await;
        Ok(cache.by_number.get(&se_number).cloned())
    }

    /// Look up by name, failing with `NotFound` when absent.
    pub async fn require(&self, name: &str) -> CatalogueResult<Arc<StorageElement>> {
        self.by_name(name)
            .await?
            .ok_or_else(|| CatalogueError::NotFound(format!("storage element {name}")))
    }

    /// Force the next access to reload.
    pub fn invalidate(&self) {
        self.loaded_at.store(0, Ordering::SeqCst);
    }

    /// Adjust a storage element's aggregate usage counters. Zero rows
    /// affected (unknown element) is a benign no-op.
    pub async fn increment_counters(
        &self,
        se_number: i64,
        file_delta: i64,
        byte_delta: i64,
    ) -> CatalogueResult<()> {
        sqlx::query(
            "UPDATE storage_elements \
             SET used_files = MAX(used_files + ?, 0), used_bytes = MAX(used_bytes + ?, 0) \
             WHERE se_number = ?",
        )
        .bind(file_delta)
        .bind(byte_delta)
        .bind(se_number)
        .execute(self.router.pool())
        .await?;
        Ok(())
    }

    /// Current usage counters, read fresh from the directory database.
    pub async fn usage(&self, se_number: i64) -> CatalogueResult<(i64, i64)> {
        let row: Option<(i64, i64)> = sqlx::query_as(
            "SELECT used_files, used_bytes FROM storage_elements WHERE se_number = ?",
        )
        .bind(se_number)
        .fetch_optional(self.router.pool())
        .await?;
        row.ok_or_else(|| CatalogueError::NotFound(format!("storage element {se_number}")))
    }

    async fn current(&self) -> Arc<SeCache> {
        if self.is_stale() {
            let mut cache = self.cache.write().await;
            if self.is_stale() {
                self.reload(&mut cache).await;
            }
        }

        self.cache.read().await.clone()
    }

    fn is_stale(&self) -> bool {
        let loaded = self.loaded_at.load(Ordering::SeqCst);
        loaded == 0 || self.clock.now_unix_ms() - loaded > self.ttl_ms
    }

    async fn reload(&self, cache: &mut Arc<SeCache>) {
        let rows = match sqlx::query_as::<_, SeRow>("SELECT * FROM storage_elements")
            .fetch_all(self.router.pool())
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(error = %e, "storage element reload failed, keeping previous cache");
                return;
            }
        };

        let mut by_number = HashMap::new();
        let mut by_name = HashMap::new();
        for row in rows {
            let se = Arc::new(StorageElement::from_row(row));
            by_name.insert(se.se_name.to_lowercase(), se.clone());
            by_number.insert(se.se_number, se);
        }

        *cache = Arc::new(SeCache { by_number, by_name });
        self.loaded_at
            .store(self.clock.now_unix_ms(), Ordering::SeqCst);
    }
}
