//! Identity Time-Shard Resolver: maps a GUID's embedded creation time to
//! the `(host, table)` pair holding its identity row.
//!
//! Same caching discipline as the mount resolver, keyed by index-time
//! ranges instead of path prefixes. No modification-timestamp row exists
//! for this table, so refresh is TTL-only.

use crate::clock::Clock;
use crate::error::CatalogueResult;
use crate::models::ShardTableRef;
use crate::router::RouterDb;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// One cached time-shard entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeShardEntry {
    pub host_index: i64,
    pub table_id: i64,
    /// Start of this entry's index-time range. Ranges are contiguous when
    /// sorted ascending; each extends to the next entry's start.
    pub guid_time: i64,
}

impl TimeShardEntry {
    pub fn shard(&self) -> ShardTableRef {
        ShardTableRef {
            host_index: self.host_index,
            table_id: self.table_id,
        }
    }
}

/// Resolves identity index times to their shard tables.
pub struct TimeShardResolver {
    router: Arc<RouterDb>,
    clock: Arc<dyn Clock>,
    ttl_ms: i64,
    /// Sorted ascending by `guid_time`.
    entries: RwLock<Arc<Vec<TimeShardEntry>>>,
    loaded_at: AtomicI64,
}

impl TimeShardResolver {
    pub fn new(router: Arc<RouterDb>, clock: Arc<dyn Clock>, ttl_secs: u64) -> Self {
        Self {
            router,
            clock,
            ttl_ms: ttl_secs as i64 * 1000,
            entries: RwLock::new(Arc::new(Vec::new())),
            loaded_at: AtomicI64::new(0),
        }
    }

    /// The shard holding identities whose index time is `index_time`: the
    /// last entry whose range start is <= the query.
    pub async fn shard_for(&self, index_time: i64) -> CatalogueResult<Option<TimeShardEntry>> {
        let entries = self.current().await;

        let mut best = None;
        for entry in entries.iter() {
            if entry.guid_time > index_time {
                break;
            }
            best = Some(entry.clone());
        }
        Ok(best)
    }

    /// All time-shard entries, range start ascending.
    pub async fn all(&self) -> CatalogueResult<Vec<TimeShardEntry>> {
        Ok(self.current().await.as_ref().clone())
    }

    /// Force the next access to reload.
    pub fn invalidate(&self) {
        self.loaded_at.store(0, Ordering::SeqCst);
    }

    async fn current(&self) -> Arc<Vec<TimeShardEntry>> {
        if self.is_stale() {
            let mut entries = self.entries.write().await;
            if self.is_stale() {
                self.reload(&mut entries).await;
            }
        }

        self.entries.read().await.clone()
    }

    fn is_stale(&self) -> bool {
        let loaded = self.loaded_at.load(Ordering::SeqCst);
        loaded == 0 || self.clock.now_unix_ms() - loaded > self.ttl_ms
    }

    async fn reload(&self, entries: &mut Arc<Vec<TimeShardEntry>>) {
        match self.router.load_time_shards().await {
            Ok(rows) if !rows.is_empty() => {
                *entries = Arc::new(
                    rows.into_iter()
                        .map(|r| TimeShardEntry {
                            host_index: r.host_index,
                            table_id: r.table_id,
                            guid_time: r.guid_time,
                        })
                        .collect(),
                );
                self.loaded_at
                    .store(self.clock.now_unix_ms(), Ordering::SeqCst);
                tracing::debug!(entries = entries.len(), "identity time-shard cache reloaded");
            }
            Ok(_) => {
                tracing::warn!("identity time-shard reload returned no entries");
            }
            Err(e) => {
                tracing::warn!(error = %e, "identity time-shard reload failed, keeping previous cache");
            }
        }
    }
}
