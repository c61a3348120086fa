//! Mount Table Resolver: maps a namespace path prefix to the `(host, table)`
//! pair holding it.
//!
//! The full mount table is cached process-wide, sorted longest prefix first.
//! Staleness is bounded by a TTL plus a cheap single-row probe of the
//! directory database's modification timestamp, itself throttled so probing
//! stays negligible. Reload uses the double-checked pattern under a
//! reader/writer lock: readers keep resolving against the current table
//! while one writer reloads.

use crate::clock::Clock;
use crate::error::CatalogueResult;
use crate::models::ShardTableRef;
use crate::router::RouterDb;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tessella_core::LogicalPath;
use tokio::sync::RwLock;

/// One cached mount entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub host_index: i64,
    pub table_id: i64,
    /// `/`-terminated namespace prefix.
    pub path_prefix: String,
}

impl MountEntry {
    pub fn shard(&self) -> ShardTableRef {
        ShardTableRef {
            host_index: self.host_index,
            table_id: self.table_id,
        }
    }

    /// Namespace table name on this mount's shard.
    pub fn lfn_table(&self) -> String {
        self.shard().lfn_table()
    }

    /// The path of a row in this mount's table, relative to the prefix.
    pub fn relative_path<'a>(&self, path: &'a LogicalPath) -> Option<&'a str> {
        path.strip_mount_prefix(&self.path_prefix)
    }
}

#[derive(Default)]
struct MountTable {
    entries: Vec<MountEntry>,
    by_prefix: HashMap<String, usize>,
}

/// Resolves namespace paths to their shard tables.
pub struct MountResolver {
    router: Arc<RouterDb>,
    clock: Arc<dyn Clock>,
    ttl_ms: i64,
    probe_interval_ms: i64,
    table: RwLock<Arc<MountTable>>,
    /// Unix millis of the last confirmed-fresh load; 0 means never loaded
    /// or explicitly invalidated.
    loaded_at: AtomicI64,
    /// Unix millis of the last staleness probe.
    last_probe: AtomicI64,
}

impl MountResolver {
    pub fn new(
        router: Arc<RouterDb>,
        clock: Arc<dyn Clock>,
        ttl_secs: u64,
        probe_interval_secs: u64,
    ) -> Self {
        Self {
            router,
            clock,
            ttl_ms: ttl_secs as i64 * 1000,
            probe_interval_ms: probe_interval_secs as i64 * 1000,
            table: RwLock::new(Arc::new(MountTable::default())),
            loaded_at: AtomicI64::new(0),
            last_probe: AtomicI64::new(0),
        }
    }

    /// Resolve the mount entry holding `path`: the longest cached prefix
    /// that is an ancestor of (or equal to) the path.
    ///
    /// Returns `Ok(None)` when no prefix matches, including the degraded
    /// case where the mount table has never been loadable.
    pub async fn resolve(&self, path: &LogicalPath) -> CatalogueResult<Option<MountEntry>> {
        let table = self.current().await;

        let mut search = path.dir_form();
        loop {
            if let Some(&idx) = table.by_prefix.get(&search) {
                return Ok(Some(table.entries[idx].clone()));
            }
            if search == "/" {
                return Ok(None);
            }
            // Strip the last segment, keeping the trailing slash:
            // "/a/b/" -> "/a/".
            let without_slash = &search[..search.len() - 1];
            match without_slash.rfind('/') {
                Some(idx) => search.truncate(idx + 1),
                None => return Ok(None),
            }
        }
    }

    /// Every mount entry covering the subtree rooted at `prefix`: the
    /// closest match for the prefix itself, plus all entries mounted below
    /// it. Used by operations that span a subtree carved into its own shard.
    pub async fn resolve_all_under(
        &self,
        prefix: &LogicalPath,
    ) -> CatalogueResult<Vec<MountEntry>> {
        let table = self.current().await;

        let mut out = Vec::new();
        if let Some(best) = self.resolve(prefix).await? {
            out.push(best);
        }

        let dir = prefix.dir_form();
        for entry in &table.entries {
            if entry.path_prefix.starts_with(&dir) && !out.contains(entry) {
                out.push(entry.clone());
            }
        }
        Ok(out)
    }

    /// Force the next access to reload, without waiting for the TTL or the
    /// probe. Call after an operation known to have changed the mount table.
    pub fn invalidate(&self) {
        self.loaded_at.store(0, Ordering::SeqCst);
    }

    /// Record a mount-table modification in the directory database (so other
    /// processes' probes see it) and invalidate the local cache.
    pub async fn touch_updated(&self) -> CatalogueResult<()> {
        self.router
            .touch_mounts_updated(self.clock.now_unix())
            .await?;
        self.invalidate();
        Ok(())
    }

    async fn current(&self) -> Arc<MountTable> {
        if self.is_stale().await {
            let mut table = self.table.write().await;
            if self.is_stale().await {
                self.reload(&mut table).await;
            }
        }

        self.table.read().await.clone()
    }

    async fn is_stale(&self) -> bool {
        let loaded = self.loaded_at.load(Ordering::SeqCst);
        if loaded == 0 {
            return true;
        }

        let now = self.clock.now_unix_ms();

        // The probe is throttled; whoever wins the CAS pays for the read.
        let probed = self.last_probe.load(Ordering::SeqCst);
        if now - probed >= self.probe_interval_ms
            && self
                .last_probe
                .compare_exchange(probed, now, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            match self.router.probe_mounts_updated().await {
                Ok(updated) if updated > loaded / 1000 => {
                    self.loaded_at.store(0, Ordering::SeqCst);
                    return true;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(error = %e, "mount table staleness probe failed");
                }
            }
        }

        now - loaded > self.ttl_ms
    }

    async fn reload(&self, table: &mut Arc<MountTable>) {
        match self.router.load_mounts().await {
            Ok(rows) if !rows.is_empty() => {
                let entries: Vec<MountEntry> = rows
                    .into_iter()
                    .map(|r| MountEntry {
                        host_index: r.host_index,
                        table_id: r.table_id,
                        path_prefix: r.path_prefix,
                    })
                    .collect();
                let by_prefix = entries
                    .iter()
                    .enumerate()
                    .map(|(i, e)| (e.path_prefix.clone(), i))
                    .collect();

                *table = Arc::new(MountTable { entries, by_prefix });

                let now = self.clock.now_unix_ms();
                self.loaded_at.store(now, Ordering::SeqCst);
                self.last_probe.store(now, Ordering::SeqCst);
                tracing::debug!(entries = table.entries.len(), "mount table cache reloaded");
            }
            Ok(_) => {
                // An empty mount table is never installed; the previous
                // contents (possibly none) stay and the next access retries.
                tracing::warn!("mount table reload returned no entries");
            }
            Err(e) => {
                tracing::warn!(error = %e, "mount table reload failed, keeping previous cache");
            }
        }
    }
}
