//! Deferred cleanup queues for dependent rows of deleted identities.
//!
//! Identity deletion removes the identity row inline, but the fan-out of
//! dependent reference and replica rows is drained asynchronously: each
//! `(host, table)` pair gets a bounded FIFO of pending identity ids, and one
//! background task per row kind batches them into chunked `DELETE ... WHERE
//! guid_id IN (...)` statements. The drainer retires itself after a bounded
//! number of idle iterations and is respawned lazily by the next enqueue.

use crate::error::CatalogueResult;
use crate::hosts::HostRegistry;
use crate::models::ShardTableRef;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tessella_core::CleanupConfig;
use tokio::sync::Notify;

/// Which dependent-row table a queue drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowKind {
    /// Namespace reference rows (`g<N>_ref`).
    Reference,
    /// Replica rows (`g<N>_pfn`).
    Replica,
}

impl RowKind {
    fn table(&self, shard: &ShardTableRef) -> String {
        match self {
            Self::Reference => shard.ref_table(),
            Self::Replica => shard.replica_table(),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Reference => "ref",
            Self::Replica => "replica",
        }
    }
}

struct QueueMap {
    queues: HashMap<ShardTableRef, VecDeque<i64>>,
    /// Whether a drainer task currently owns this kind. Guarded by the same
    /// lock as the queues so enqueue-vs-retire cannot strand items.
    worker_running: bool,
}

struct KindState {
    map: Mutex<QueueMap>,
    notify: Notify,
}

impl KindState {
    fn new() -> Self {
        Self {
            map: Mutex::new(QueueMap {
                queues: HashMap::new(),
                worker_running: false,
            }),
            notify: Notify::new(),
        }
    }
}

struct Inner {
    hosts: Arc<HostRegistry>,
    config: CleanupConfig,
    reference: KindState,
    replica: KindState,
}

impl Inner {
    fn state(&self, kind: RowKind) -> &KindState {
        match kind {
            RowKind::Reference => &self.reference,
            RowKind::Replica => &self.replica,
        }
    }
}

/// The deferred cleanup queues.
#[derive(Clone)]
pub struct CleanupQueues {
    inner: Arc<Inner>,
}

impl CleanupQueues {
    pub fn new(hosts: Arc<HostRegistry>, config: CleanupConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                hosts,
                config,
                reference: KindState::new(),
                replica: KindState::new(),
            }),
        }
    }

    /// Queue one identity id for dependent-row deletion, starting a drainer
    /// for this kind if none is running. A full queue drops the id with a
    /// warning; the row then waits for an offline sweep.
    pub fn enqueue(&self, kind: RowKind, shard: ShardTableRef, guid_id: i64) {
        let state = self.inner.state(kind);
        let spawn = {
            let mut map = state.map.lock().unwrap_or_else(|e| e.into_inner());

            let queue = map.queues.entry(shard).or_default();
            if queue.len() >= self.inner.config.queue_capacity {
                tracing::warn!(
                    kind = kind.label(),
                    host = shard.host_index,
                    table = shard.table_id,
                    guid_id,
                    "cleanup queue full, dropping entry"
                );
                return;
            }
            queue.push_back(guid_id);

            if map.worker_running {
                false
            } else {
                map.worker_running = true;
                true
            }
        };

        if spawn {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                drain_loop(inner, kind).await;
            });
        }

        state.notify.notify_one();
    }

    /// Drain every non-empty queue of this kind once. Returns whether any
    /// work was attempted. Exposed so callers (and tests) can flush
    /// deterministically without waiting for the background drainer.
    pub async fn flush(&self, kind: RowKind) -> bool {
        drain_once(&self.inner, kind).await
    }

    /// Total queued ids for a kind.
    pub fn pending(&self, kind: RowKind) -> usize {
        let map = self
            .inner
            .state(kind)
            .map
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        map.queues.values().map(VecDeque::len).sum()
    }

    /// Whether a drainer task currently owns this kind.
    pub fn worker_running(&self, kind: RowKind) -> bool {
        self.inner
            .state(kind)
            .map
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .worker_running
    }
}

async fn drain_loop(inner: Arc<Inner>, kind: RowKind) {
    let state = inner.state(kind);
    let poll = std::time::Duration::from_millis(inner.config.poll_interval_ms);
    let mut idle = 0u32;

    loop {
        if drain_once(&inner, kind).await {
            idle = 0;
            continue;
        }

        idle += 1;
        if idle > inner.config.max_idle_iterations {
            let mut map = state.map.lock().unwrap_or_else(|e| e.into_inner());
            if map.queues.values().all(VecDeque::is_empty) {
                map.worker_running = false;
                tracing::debug!(kind = kind.label(), "cleanup drainer retiring after idle limit");
                return;
            }
            // Something arrived between the drain and the retirement check.
            idle = 0;
            continue;
        }

        tokio::select! {
            _ = state.notify.notified() => {}
            _ = tokio::time::sleep(poll) => {}
        }
    }
}

async fn drain_once(inner: &Inner, kind: RowKind) -> bool {
    let batches: Vec<(ShardTableRef, Vec<i64>)> = {
        let mut map = inner
            .state(kind)
            .map
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        map.queues
            .iter_mut()
            .filter(|(_, q)| !q.is_empty())
            .map(|(shard, q)| (*shard, q.drain(..).collect()))
            .collect()
    };

    if batches.is_empty() {
        return false;
    }

    for (shard, ids) in batches {
        if let Err(e) = delete_batch(inner, kind, shard, &ids).await {
            tracing::warn!(
                kind = kind.label(),
                host = shard.host_index,
                table = shard.table_id,
                pending = ids.len(),
                error = %e,
                "cleanup batch failed, re-queueing for next cycle"
            );
            let mut map = inner
                .state(kind)
                .map
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            let queue = map.queues.entry(shard).or_default();
            for id in ids.into_iter().rev() {
                if queue.len() >= inner.config.queue_capacity {
                    break;
                }
                queue.push_front(id);
            }
        }
    }

    true
}

async fn delete_batch(
    inner: &Inner,
    kind: RowKind,
    shard: ShardTableRef,
    ids: &[i64],
) -> CatalogueResult<()> {
    let host = inner.hosts.host(shard.host_index).await?;
    let table = kind.table(&shard);

    for chunk in ids.chunks(inner.config.max_in_list.max(1)) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let sql = format!("DELETE FROM {table} WHERE guid_id IN ({placeholders})");
        let mut query = sqlx::query(&sql);
        for id in chunk {
            query = query.bind(id);
        }
        query.execute(host.pool()).await?;
    }

    tracing::debug!(
        kind = kind.label(),
        host = shard.host_index,
        table = shard.table_id,
        deleted = ids.len(),
        "cleanup batch flushed"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::RouterDb;
    use std::time::Duration;

    async fn setup(config: CleanupConfig) -> (tempfile::TempDir, Arc<HostRegistry>, CleanupQueues) {
        let dir = tempfile::tempdir().unwrap();
        let router = Arc::new(RouterDb::open(dir.path().join("router.db")).await.unwrap());
        sqlx::query("INSERT INTO hosts (host_index, address, db_name, driver) VALUES (1, 'h1', 'cat.db', 'sqlite')")
            .execute(router.pool())
            .await
            .unwrap();
        let hosts = Arc::new(HostRegistry::new(router, dir.path().join("shards")));

        let host = hosts.host(1).await.unwrap();
        sqlx::query("CREATE TABLE g5_ref (guid_id INTEGER NOT NULL, lfn TEXT NOT NULL)")
            .execute(host.pool())
            .await
            .unwrap();
        sqlx::query(
            "CREATE TABLE g5_pfn (guid_id INTEGER NOT NULL, se_number INTEGER NOT NULL, pfn TEXT NOT NULL)",
        )
        .execute(host.pool())
        .await
        .unwrap();

        let queues = CleanupQueues::new(hosts.clone(), config);
        (dir, hosts, queues)
    }

    fn shard() -> ShardTableRef {
        ShardTableRef {
            host_index: 1,
            table_id: 5,
        }
    }

    #[tokio::test]
    async fn flush_deletes_queued_rows_in_one_batch() {
        let (_dir, hosts, queues) = setup(CleanupConfig::default()).await;
        let host = hosts.host(1).await.unwrap();

        for id in 1..=10 {
            sqlx::query("INSERT INTO g5_ref (guid_id, lfn) VALUES (?, 'x')")
                .bind(id)
                .execute(host.pool())
                .await
                .unwrap();
        }

        for id in [2_i64, 4, 6] {
            queues.enqueue(RowKind::Reference, shard(), id);
        }
        assert_eq!(queues.pending(RowKind::Reference), 3);

        assert!(queues.flush(RowKind::Reference).await);
        assert_eq!(queues.pending(RowKind::Reference), 0);

        let left: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM g5_ref")
            .fetch_one(host.pool())
            .await
            .unwrap();
        assert_eq!(left, 7);
    }

    #[tokio::test]
    async fn chunking_respects_max_in_list() {
        let config = CleanupConfig {
            max_in_list: 2,
            ..CleanupConfig::default()
        };
        let (_dir, hosts, queues) = setup(config).await;
        let host = hosts.host(1).await.unwrap();

        for id in 1..=7 {
            sqlx::query("INSERT INTO g5_pfn (guid_id, se_number, pfn) VALUES (?, 1, 'p')")
                .bind(id)
                .execute(host.pool())
                .await
                .unwrap();
            queues.enqueue(RowKind::Replica, shard(), id);
        }

        queues.flush(RowKind::Replica).await;
        let left: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM g5_pfn")
            .fetch_one(host.pool())
            .await
            .unwrap();
        assert_eq!(left, 0);
    }

    #[tokio::test]
    async fn failed_batch_is_requeued() {
        let config = CleanupConfig {
            // Keep the background drainer parked between cycles so the
            // steady state is observable.
            poll_interval_ms: 60_000,
            ..CleanupConfig::default()
        };
        let (_dir, _hosts, queues) = setup(config).await;

        // No such table on this shard: the delete fails and the id stays.
        let missing = ShardTableRef {
            host_index: 1,
            table_id: 99,
        };
        queues.enqueue(RowKind::Reference, missing, 42);
        queues.flush(RowKind::Reference).await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(queues.pending(RowKind::Reference), 1);
    }

    #[tokio::test]
    async fn full_queue_drops_overflow() {
        let config = CleanupConfig {
            queue_capacity: 2,
            poll_interval_ms: 60_000,
            ..CleanupConfig::default()
        };
        let (_dir, _hosts, queues) = setup(config).await;

        // Park ids on a shard with no backing table; they can never drain,
        // so the capacity bound is the steady state.
        let missing = ShardTableRef {
            host_index: 1,
            table_id: 99,
        };
        for id in 0..5 {
            queues.enqueue(RowKind::Replica, missing, id);
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(queues.pending(RowKind::Replica) <= 2);
    }

    #[tokio::test]
    async fn drainer_retires_when_idle_and_respawns_on_enqueue() {
        let config = CleanupConfig {
            poll_interval_ms: 5,
            max_idle_iterations: 2,
            ..CleanupConfig::default()
        };
        let (_dir, hosts, queues) = setup(config).await;
        let host = hosts.host(1).await.unwrap();

        sqlx::query("INSERT INTO g5_ref (guid_id, lfn) VALUES (1, 'x')")
            .execute(host.pool())
            .await
            .unwrap();
        queues.enqueue(RowKind::Reference, shard(), 1);
        assert!(queues.worker_running(RowKind::Reference));

        // The drainer empties the queue, idles out, and retires itself.
        let mut retired = false;
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            if !queues.worker_running(RowKind::Reference) {
                retired = true;
                break;
            }
        }
        assert!(retired, "drainer should retire after its idle limit");
        assert_eq!(queues.pending(RowKind::Reference), 0);

        // A later enqueue starts a fresh drainer.
        sqlx::query("INSERT INTO g5_ref (guid_id, lfn) VALUES (2, 'x')")
            .execute(host.pool())
            .await
            .unwrap();
        queues.enqueue(RowKind::Reference, shard(), 2);
        assert!(queues.worker_running(RowKind::Reference));

        let mut drained = false;
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            if queues.pending(RowKind::Reference) == 0 {
                drained = true;
                break;
            }
        }
        assert!(drained);
    }
}
