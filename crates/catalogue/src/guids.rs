//! GUID identity & replica registry.
//!
//! An identity's shard is derived from the time embedded in its identifier
//! at creation and never moves. Replica mutation is two-step: the identity
//! row's storage-element membership set is updated first, then the replica
//! row is written; a failed second step rolls back the first. Deleting an
//! identity removes its row inline and hands the dependent reference and
//! replica rows to the deferred cleanup queues.

use crate::cleanup::{CleanupQueues, RowKind};
use crate::clock::Clock;
use crate::error::{CatalogueError, CatalogueResult};
use crate::hosts::HostRegistry;
use crate::models::{GuidRow, ReplicaRow, ShardTableRef, encode_se_list};
use crate::router::RouterDb;
use crate::ses::{SeDirectory, StorageElement};
use crate::timeshards::TimeShardResolver;
use std::collections::BTreeSet;
use std::sync::Arc;
use tessella_core::{CatalogEntity, EntryKind, Guid, GuidFactory, Permissions, Principal};
use time::OffsetDateTime;

/// An identity record, persisted or not yet.
#[derive(Debug, Clone)]
pub struct GuidRecord {
    pub guid: Guid,
    pub shard: ShardTableRef,
    /// Row id on the shard; `None` until the record is persisted.
    pub guid_id: Option<i64>,
    pub owner: String,
    pub gowner: String,
    pub perm: Permissions,
    pub size: i64,
    pub checksum: Option<String>,
    pub kind: EntryKind,
    /// Storage elements currently holding a replica.
    pub se_numbers: BTreeSet<i64>,
    pub ctime: OffsetDateTime,
    pub expires_at: Option<OffsetDateTime>,
}

impl GuidRecord {
    pub fn exists(&self) -> bool {
        self.guid_id.is_some()
    }

    fn require_id(&self) -> CatalogueResult<i64> {
        self.guid_id
            .ok_or_else(|| CatalogueError::Internal(format!("identity {} not persisted", self.guid)))
    }
}

impl CatalogEntity for GuidRecord {
    fn owner(&self) -> &str {
        &self.owner
    }

    fn group(&self) -> &str {
        &self.gowner
    }

    fn permissions(&self) -> Permissions {
        self.perm
    }
}

/// One physical replica of an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replica {
    pub se_number: i64,
    pub pfn: String,
}

impl Replica {
    /// The archive identity this replica points into, for member replicas
    /// of the form `guid:///<uuid>?ZIP=<member>`.
    pub fn archive_guid(&self) -> Option<Guid> {
        let rest = self.pfn.strip_prefix("guid:///")?;
        let (uuid, query) = rest.split_once('?')?;
        if !query.starts_with("ZIP=") {
            return None;
        }
        Guid::parse(uuid).ok()
    }
}

/// The identity registry.
pub struct GuidRegistry {
    hosts: Arc<HostRegistry>,
    timeshards: Arc<TimeShardResolver>,
    ses: Arc<SeDirectory>,
    cleanup: CleanupQueues,
    router: Arc<RouterDb>,
    clock: Arc<dyn Clock>,
    factory: Arc<GuidFactory>,
}

impl GuidRegistry {
    pub fn new(
        hosts: Arc<HostRegistry>,
        timeshards: Arc<TimeShardResolver>,
        ses: Arc<SeDirectory>,
        cleanup: CleanupQueues,
        router: Arc<RouterDb>,
        clock: Arc<dyn Clock>,
        factory: Arc<GuidFactory>,
    ) -> Self {
        Self {
            hosts,
            timeshards,
            ses,
            cleanup,
            router,
            clock,
            factory,
        }
    }

    pub fn factory(&self) -> &GuidFactory {
        &self.factory
    }

    /// The shard that holds (or would hold) this identity.
    pub async fn shard_for(&self, guid: Guid) -> CatalogueResult<ShardTableRef> {
        self.timeshards
            .shard_for(guid.index_time())
            .await?
            .map(|e| e.shard())
            .ok_or_else(|| {
                CatalogueError::NotFound(format!("no identity shard covers {guid}"))
            })
    }

    /// Build a fresh, unpersisted identity record owned by `user`.
    pub async fn new_record(
        &self,
        user: &Principal,
        size: i64,
        checksum: Option<String>,
        kind: EntryKind,
    ) -> CatalogueResult<GuidRecord> {
        let guid = self.factory.generate();
        let shard = self.shard_for(guid).await?;
        Ok(GuidRecord {
            guid,
            shard,
            guid_id: None,
            owner: user.account().to_string(),
            gowner: user.default_group().to_string(),
            perm: Permissions::DEFAULT,
            size,
            checksum,
            kind,
            se_numbers: BTreeSet::new(),
            ctime: self.clock.now(),
            expires_at: None,
        })
    }

    /// Load an identity record.
    pub async fn get(&self, guid: Guid) -> CatalogueResult<Option<GuidRecord>> {
        let shard = match self.timeshards.shard_for(guid.index_time()).await? {
            Some(entry) => entry.shard(),
            None => return Ok(None),
        };
        let host = self.hosts.host(shard.host_index).await?;

        let sql = format!("SELECT * FROM {} WHERE guid = ?", shard.guid_table());
        let row = sqlx::query_as::<_, GuidRow>(&sql)
            .bind(guid.as_bytes().to_vec())
            .fetch_optional(host.pool())
            .await?;

        row.map(|r| Self::record_from_row(shard, r)).transpose()
    }

    /// Persist a new identity row and fill in its row id.
    pub async fn insert(&self, record: &mut GuidRecord) -> CatalogueResult<()> {
        let host = self.hosts.host(record.shard.host_index).await?;

        let sql = format!(
            "INSERT INTO {} (guid, owner, gowner, perm, size, checksum, kind, se_list, ctime, expires_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            record.shard.guid_table()
        );
        let result = sqlx::query(&sql)
            .bind(record.guid.as_bytes().to_vec())
            .bind(&record.owner)
            .bind(&record.gowner)
            .bind(record.perm.to_string())
            .bind(record.size)
            .bind(&record.checksum)
            .bind(record.kind.as_char().to_string())
            .bind(encode_se_list(
                &record.se_numbers.iter().copied().collect::<Vec<_>>(),
            ))
            .bind(record.ctime)
            .bind(record.expires_at)
            .execute(host.pool())
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    CatalogueError::AlreadyExists(format!("identity {}", record.guid))
                } else {
                    CatalogueError::ShardUnavailable(e)
                }
            })?;

        record.guid_id = Some(result.last_insert_rowid());
        Ok(())
    }

    /// Make sure the record is persisted: reload an existing row, or insert
    /// a new one. Used when a booking resolves for an identity the registry
    /// has not seen yet.
    pub async fn ensure(&self, record: &mut GuidRecord) -> CatalogueResult<()> {
        if record.exists() {
            return Ok(());
        }
        match self.get(record.guid).await? {
            Some(existing) => {
                *record = existing;
                Ok(())
            }
            None => self.insert(record).await,
        }
    }

    /// Attach a replica. Two steps with rollback: membership set first, then
    /// the replica row; counters last.
    pub async fn add_replica(
        &self,
        record: &mut GuidRecord,
        se: &StorageElement,
        pfn: &str,
    ) -> CatalogueResult<()> {
        let guid_id = record.require_id()?;
        if record.se_numbers.contains(&se.se_number) {
            return Err(CatalogueError::DuplicateReplica {
                se: se.se_name.clone(),
            });
        }
        let host = self.hosts.host(record.shard.host_index).await?;

        let previous: Vec<i64> = record.se_numbers.iter().copied().collect();
        let mut updated = previous.clone();
        updated.push(se.se_number);
        updated.sort_unstable();

        self.write_se_list(&host, &record.shard, guid_id, &updated)
            .await?;

        let sql = format!(
            "INSERT INTO {} (guid_id, se_number, pfn) VALUES (?, ?, ?)",
            record.shard.replica_table()
        );
        let inserted = sqlx::query(&sql)
            .bind(guid_id)
            .bind(se.se_number)
            .bind(pfn)
            .execute(host.pool())
            .await;

        if let Err(e) = inserted {
            // Roll the membership update back before reporting.
            if let Err(rollback) = self
                .write_se_list(&host, &record.shard, guid_id, &previous)
                .await
            {
                tracing::warn!(
                    guid = %record.guid,
                    error = %rollback,
                    "failed to roll back membership set after replica insert failure"
                );
            }
            return Err(if is_unique_violation(&e) {
                CatalogueError::DuplicateReplica {
                    se: se.se_name.clone(),
                }
            } else {
                CatalogueError::ShardUnavailable(e)
            });
        }

        record.se_numbers.insert(se.se_number);

        if se.physical {
            self.ses
                .increment_counters(se.se_number, 1, record.size)
                .await?;
        }
        Ok(())
    }

    /// Detach a replica. Returns `false` when no replica row matched
    /// (someone else already removed it), which is not an error.
    pub async fn remove_replica(
        &self,
        record: &mut GuidRecord,
        se_number: i64,
        purge: bool,
    ) -> CatalogueResult<bool> {
        let guid_id = record.require_id()?;
        let host = self.hosts.host(record.shard.host_index).await?;

        let select = format!(
            "SELECT pfn FROM {} WHERE guid_id = ? AND se_number = ?",
            record.shard.replica_table()
        );
        let pfn: Option<String> = sqlx::query_scalar(&select)
            .bind(guid_id)
            .bind(se_number)
            .fetch_optional(host.pool())
            .await?;

        let had_membership = record.se_numbers.remove(&se_number);
        if had_membership {
            let updated: Vec<i64> = record.se_numbers.iter().copied().collect();
            self.write_se_list(&host, &record.shard, guid_id, &updated)
                .await?;
        }

        let delete = format!(
            "DELETE FROM {} WHERE guid_id = ? AND se_number = ?",
            record.shard.replica_table()
        );
        let result = sqlx::query(&delete)
            .bind(guid_id)
            .bind(se_number)
            .execute(host.pool())
            .await?;

        if result.rows_affected() == 0 {
            // Nothing to remove; restore the membership set if we touched it.
            if had_membership {
                record.se_numbers.insert(se_number);
                let restored: Vec<i64> = record.se_numbers.iter().copied().collect();
                self.write_se_list(&host, &record.shard, guid_id, &restored)
                    .await?;
            }
            return Ok(false);
        }

        if let Some(se) = self.ses.by_number(se_number).await? {
            if se.physical {
                if purge {
                    let pfn = pfn.filter(|p| *p != se.generate_pfn(record.guid));
                    self.insert_purge_record(record, Some(se_number), pfn.as_deref())
                        .await?;
                }
                let bytes = if record.size > 0 { record.size } else { 0 };
                self.ses.increment_counters(se_number, -1, -bytes).await?;
            }
        }
        Ok(true)
    }

    /// Delete an identity. With `purge`, every surviving physically
    /// addressable replica is queued for asynchronous space reclamation.
    /// Dependent rows are handed to the cleanup queues rather than deleted
    /// inline. Returns `false` when the row was already gone.
    pub async fn delete(&self, record: &GuidRecord, purge: bool) -> CatalogueResult<bool> {
        let guid_id = record.require_id()?;
        let host = self.hosts.host(record.shard.host_index).await?;

        let replicas = self.replicas(record).await?;

        if purge && !replicas.is_empty() {
            for replica in &replicas {
                let Some(se) = self.ses.by_number(replica.se_number).await? else {
                    continue;
                };
                if !se.physical {
                    continue;
                }
                let pfn = (replica.pfn != se.generate_pfn(record.guid))
                    .then_some(replica.pfn.as_str());
                self.insert_purge_record(record, Some(replica.se_number), pfn)
                    .await?;
            }
            for se_number in &record.se_numbers {
                self.ses
                    .increment_counters(*se_number, -1, -record.size)
                    .await?;
            }
        }

        let delete = format!("DELETE FROM {} WHERE guid_id = ?", record.shard.guid_table());
        let result = sqlx::query(&delete)
            .bind(guid_id)
            .execute(host.pool())
            .await?;
        let removed = result.rows_affected() > 0;

        self.cleanup
            .enqueue(RowKind::Reference, record.shard, guid_id);
        if !replicas.is_empty() {
            self.cleanup.enqueue(RowKind::Replica, record.shard, guid_id);
        }

        Ok(removed)
    }

    /// All replicas of an identity.
    pub async fn replicas(&self, record: &GuidRecord) -> CatalogueResult<Vec<Replica>> {
        let guid_id = record.require_id()?;
        let host = self.hosts.host(record.shard.host_index).await?;

        let sql = format!(
            "SELECT * FROM {} WHERE guid_id = ? ORDER BY se_number",
            record.shard.replica_table()
        );
        let rows = sqlx::query_as::<_, ReplicaRow>(&sql)
            .bind(guid_id)
            .fetch_all(host.pool())
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| Replica {
                se_number: r.se_number,
                pfn: r.pfn,
            })
            .collect())
    }

    /// Dereference archive-member indirection one level: the identities of
    /// the archives this identity's replicas point into, or the identity
    /// itself if it has at least one direct replica and no indirection.
    pub async fn real_guids(&self, record: &GuidRecord) -> CatalogueResult<Vec<Guid>> {
        let replicas = self.replicas(record).await?;

        let mut archives = Vec::new();
        let mut direct = false;
        for replica in &replicas {
            match replica.archive_guid() {
                Some(archive) => {
                    if !archives.contains(&archive) {
                        archives.push(archive);
                    }
                }
                None => direct = true,
            }
        }

        if archives.is_empty() && direct {
            archives.push(record.guid);
        }
        Ok(archives)
    }

    /// The member identities stored inside this archive, found by their
    /// member-replica locations on the archive's own shard.
    pub async fn members_of(&self, archive: &GuidRecord) -> CatalogueResult<Vec<GuidRecord>> {
        let host = self.hosts.host(archive.shard.host_index).await?;

        let sql = format!(
            "SELECT g.* FROM {guid_table} g \
             INNER JOIN {replica_table} p ON g.guid_id = p.guid_id \
             WHERE p.pfn LIKE ?",
            guid_table = archive.shard.guid_table(),
            replica_table = archive.shard.replica_table(),
        );
        let rows = sqlx::query_as::<_, GuidRow>(&sql)
            .bind(format!("guid:///{}?ZIP=%", archive.guid))
            .fetch_all(host.pool())
            .await?;

        rows.into_iter()
            .map(|r| Self::record_from_row(archive.shard, r))
            .collect()
    }

    /// Record a namespace reference to this identity.
    pub async fn record_reference(
        &self,
        record: &GuidRecord,
        path: &tessella_core::LogicalPath,
    ) -> CatalogueResult<()> {
        let guid_id = record.require_id()?;
        let host = self.hosts.host(record.shard.host_index).await?;
        let sql = format!(
            "INSERT INTO {} (guid_id, lfn) VALUES (?, ?)",
            record.shard.ref_table()
        );
        sqlx::query(&sql)
            .bind(guid_id)
            .bind(path.as_str())
            .execute(host.pool())
            .await?;
        Ok(())
    }

    /// Drop a namespace reference. Zero rows affected is a benign no-op.
    pub async fn remove_reference(
        &self,
        record: &GuidRecord,
        path: &tessella_core::LogicalPath,
    ) -> CatalogueResult<()> {
        let guid_id = record.require_id()?;
        let host = self.hosts.host(record.shard.host_index).await?;
        let sql = format!(
            "DELETE FROM {} WHERE guid_id = ? AND lfn = ?",
            record.shard.ref_table()
        );
        sqlx::query(&sql)
            .bind(guid_id)
            .bind(path.as_str())
            .execute(host.pool())
            .await?;
        Ok(())
    }

    /// Queue a physical purge for the transfer layer. A `None` storage
    /// element means every replica; a `None` location means the element's
    /// generated default.
    pub(crate) async fn insert_purge_record(
        &self,
        record: &GuidRecord,
        se_number: Option<i64>,
        pfn: Option<&str>,
    ) -> CatalogueResult<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO orphan_pfns (guid, se_number, checksum, size, pfn) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(record.guid.as_bytes().to_vec())
        .bind(se_number)
        .bind(&record.checksum)
        .bind(record.size)
        .bind(pfn)
        .execute(self.router.pool())
        .await?;
        Ok(())
    }

    /// Queue an identity-wide purge after its namespace entry is removed:
    /// the transfer layer reclaims every replica, wherever it sits.
    pub(crate) async fn queue_namespace_purge(
        &self,
        guid: Guid,
        size: i64,
        checksum: Option<&str>,
    ) -> CatalogueResult<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO orphan_pfns (guid, se_number, checksum, size, pfn) \
             VALUES (?, NULL, ?, ?, NULL)",
        )
        .bind(guid.as_bytes().to_vec())
        .bind(checksum)
        .bind(size)
        .execute(self.router.pool())
        .await?;
        Ok(())
    }

    /// Wipe a previously queued purge for this `(identity, storage element)`
    /// key, before handing out a fresh write reservation for it.
    pub(crate) async fn clear_pending_purge(
        &self,
        guid: Guid,
        se_number: i64,
    ) -> CatalogueResult<()> {
        sqlx::query("DELETE FROM orphan_pfns WHERE guid = ? AND se_number = ?")
            .bind(guid.as_bytes().to_vec())
            .bind(se_number)
            .execute(self.router.pool())
            .await?;
        Ok(())
    }

    /// Pending purge records, oldest first. Consumed by the transfer layer.
    pub async fn pending_purges(&self) -> CatalogueResult<Vec<crate::models::OrphanPfnRow>> {
        let rows = sqlx::query_as::<_, crate::models::OrphanPfnRow>(
            "SELECT * FROM orphan_pfns ORDER BY rowid",
        )
        .fetch_all(self.router.pool())
        .await?;
        Ok(rows)
    }

    async fn write_se_list(
        &self,
        host: &crate::hosts::Host,
        shard: &ShardTableRef,
        guid_id: i64,
        numbers: &[i64],
    ) -> CatalogueResult<()> {
        let sql = format!(
            "UPDATE {} SET se_list = ? WHERE guid_id = ?",
            shard.guid_table()
        );
        sqlx::query(&sql)
            .bind(encode_se_list(numbers))
            .bind(guid_id)
            .execute(host.pool())
            .await?;
        Ok(())
    }

    fn record_from_row(shard: ShardTableRef, row: GuidRow) -> CatalogueResult<GuidRecord> {
        let guid = row.guid()?;
        let kind = row
            .kind
            .chars()
            .next()
            .map(EntryKind::from_char)
            .transpose()?
            .unwrap_or(EntryKind::File);
        let perm = Permissions::parse(&row.perm)?;
        let se_numbers = row.se_numbers().into_iter().collect();
        Ok(GuidRecord {
            guid,
            shard,
            guid_id: Some(row.guid_id),
            owner: row.owner,
            gowner: row.gowner,
            perm,
            size: row.size,
            checksum: row.checksum,
            kind,
            se_numbers,
            ctime: row.ctime,
            expires_at: row.expires_at,
        })
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .is_some_and(|d| d.is_unique_violation())
}
