//! Write-booking protocol: a short-lived reservation that lets a writer
//! claim a `(identity, storage element, physical location)` triple before
//! the bytes exist, then resolve it to commit, reject or keep.
//!
//! The lease itself is the timeout mechanism. Concurrent resolution relies
//! on conditional updates: an update that matches zero rows means someone
//! else already resolved the booking, never an error.

use crate::authz::AccessPolicy;
use crate::clock::Clock;
use crate::error::{CatalogueError, CatalogueResult};
use crate::guids::{GuidRegistry, GuidRecord};
use crate::lfns::{Lfn, LfnCatalogue};
use crate::models::BookingRow;
use crate::quota::QuotaPolicy;
use crate::router::RouterDb;
use crate::ses::SeDirectory;
use std::collections::BTreeSet;
use std::sync::Arc;
use tessella_core::{BookingConfig, EntryKind, Guid, LogicalPath, Permissions, Principal};

/// How a booking resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingState {
    /// Promote the reservation into the catalogue.
    Committed,
    /// The upload is known to have failed; tombstone the reservation for
    /// routine cleanup.
    Rejected,
    /// The upload succeeded but registration happens later; leave the
    /// reservation in place, flagged.
    Kept,
}

/// What a writer wants to upload.
#[derive(Debug, Clone)]
pub struct WriteIntent {
    pub guid: Guid,
    pub size: i64,
    pub checksum: Option<String>,
    /// The producing job, when the write happens on a job's behalf.
    pub job_id: Option<i64>,
}

/// A granted reservation: the key a writer later resolves.
#[derive(Debug, Clone)]
pub struct BookedPfn {
    pub pfn: String,
    pub guid: Guid,
    pub se_name: String,
    pub se_number: i64,
}

/// The booking table.
pub struct BookingTable {
    router: Arc<RouterDb>,
    guids: Arc<GuidRegistry>,
    lfns: Arc<LfnCatalogue>,
    ses: Arc<SeDirectory>,
    authz: Arc<dyn AccessPolicy>,
    quota: Arc<dyn QuotaPolicy>,
    clock: Arc<dyn Clock>,
    config: BookingConfig,
}

impl BookingTable {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        router: Arc<RouterDb>,
        guids: Arc<GuidRegistry>,
        lfns: Arc<LfnCatalogue>,
        ses: Arc<SeDirectory>,
        authz: Arc<dyn AccessPolicy>,
        quota: Arc<dyn QuotaPolicy>,
        clock: Arc<dyn Clock>,
        config: BookingConfig,
    ) -> Self {
        Self {
            router,
            guids,
            lfns,
            ses,
            authz,
            quota,
            clock,
            config,
        }
    }

    /// Reserve a write of `intent` to `se_name`, targeting the namespace
    /// path `target`. Re-booking the same key by the same owner renews the
    /// lease; a differing owner gets `LeaseConflict`.
    pub async fn book(
        &self,
        user: &Principal,
        target: &LogicalPath,
        intent: &WriteIntent,
        requested_pfn: Option<&str>,
        se_name: &str,
    ) -> CatalogueResult<BookedPfn> {
        let se = self.ses.require(se_name).await?;
        if !se.writable {
            return Err(CatalogueError::AccessDenied(format!(
                "storage element {} does not accept writes",
                se.se_name
            )));
        }

        let target_entry = self.lfns.lfn(target).await?;
        let anchor = if target_entry.exists {
            target_entry.clone()
        } else {
            let parent = target.parent().ok_or_else(|| {
                CatalogueError::InvalidArgument("cannot book the namespace root".to_string())
            })?;
            self.lfns.nearest_existing(&parent).await?.ok_or_else(|| {
                CatalogueError::AccessDenied(format!("no such folder {parent}"))
            })?
        };
        if !self.authz.can_write(&anchor, user) {
            return Err(CatalogueError::AccessDenied(format!(
                "{} is not allowed to write {target}",
                user.account()
            )));
        }

        match self.guids.get(intent.guid).await? {
            Some(existing) => {
                if !self.authz.can_write(&existing, user) {
                    return Err(CatalogueError::AccessDenied(format!(
                        "{} is not allowed to write identity {}",
                        user.account(),
                        intent.guid
                    )));
                }
                if existing.size != intent.size {
                    return Err(CatalogueError::ConflictingContent(format!(
                        "identity {} has size {}, requested {}",
                        intent.guid, existing.size, intent.size
                    )));
                }
                if let (Some(have), Some(want)) = (&existing.checksum, &intent.checksum) {
                    if !have.eq_ignore_ascii_case(want) {
                        return Err(CatalogueError::ConflictingContent(format!(
                            "identity {} has checksum {have}, requested {want}",
                            intent.guid
                        )));
                    }
                }
                if existing.se_numbers.contains(&se.se_number) {
                    return Err(CatalogueError::DuplicateReplica {
                        se: se.se_name.clone(),
                    });
                }
            }
            None => {
                // Quota applies to brand-new identities only; extra
                // replicas of existing files are exempt.
                if !self
                    .quota
                    .can_upload(user.account(), 1, intent.size.max(0) as u64)
                    .await
                {
                    return Err(CatalogueError::QuotaExceeded {
                        owner: user.account().to_string(),
                        files: 1,
                        bytes: intent.size.max(0) as u64,
                    });
                }
            }
        }

        let pfn = match requested_pfn {
            Some(p) => p.to_string(),
            None => se.generate_pfn(intent.guid),
        };
        let guid_bytes = intent.guid.as_bytes().to_vec();
        let now = self.clock.now_unix();

        // Clear tombstoned and naturally expired attempts for this key.
        sqlx::query(
            "DELETE FROM bookings \
             WHERE guid = ? AND se_name = ? AND pfn = ? AND (expires_at < 0 OR expires_at <= ?)",
        )
        .bind(&guid_bytes)
        .bind(&se.se_name)
        .bind(&pfn)
        .bind(now)
        .execute(self.router.pool())
        .await?;

        let holder: Option<String> = sqlx::query_scalar(
            "SELECT owner FROM bookings \
             WHERE guid = ? AND se_name = ? AND pfn = ? AND expires_at > ?",
        )
        .bind(&guid_bytes)
        .bind(&se.se_name)
        .bind(&pfn)
        .bind(now)
        .fetch_optional(self.router.pool())
        .await?;

        if let Some(holder) = holder {
            if !user.can_become(&holder) {
                return Err(CatalogueError::LeaseConflict { owner: holder });
            }
            // Same authenticated identity: renew the lease (idempotent retry).
            sqlx::query(
                "UPDATE bookings SET expires_at = ? \
                 WHERE guid = ? AND se_name = ? AND pfn = ?",
            )
            .bind(now + self.config.lease_secs as i64)
            .bind(&guid_bytes)
            .bind(&se.se_name)
            .bind(&pfn)
            .execute(self.router.pool())
            .await?;
        } else {
            // A fresh reservation wipes any pending physical purge for the
            // same key before handing out the location again.
            self.guids
                .clear_pending_purge(intent.guid, se.se_number)
                .await?;

            let lfn_column = if target.as_str() == format!("/{}", intent.guid) {
                // Replica-only booking: no namespace target to promote.
                String::new()
            } else {
                target.to_string()
            };

            sqlx::query(
                "INSERT INTO bookings \
                 (lfn, owner, gowner, expires_at, size, checksum, pfn, se_name, guid, job_id, retain) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0)",
            )
            .bind(&lfn_column)
            .bind(user.account())
            .bind(user.default_group())
            .bind(now + self.config.lease_secs as i64)
            .bind(intent.size)
            .bind(&intent.checksum)
            .bind(&pfn)
            .bind(&se.se_name)
            .bind(&guid_bytes)
            .bind(intent.job_id)
            .execute(self.router.pool())
            .await?;
        }

        Ok(BookedPfn {
            pfn,
            guid: intent.guid,
            se_name: se.se_name.clone(),
            se_number: se.se_number,
        })
    }

    /// Promote a booking into the catalogue.
    pub async fn commit(
        &self,
        user: &Principal,
        booked: &BookedPfn,
    ) -> CatalogueResult<Option<Lfn>> {
        self.mark(user, booked, BookingState::Committed).await
    }

    /// Tombstone a failed booking for routine cleanup.
    pub async fn reject(&self, user: &Principal, booked: &BookedPfn) -> CatalogueResult<()> {
        self.mark(user, booked, BookingState::Rejected).await?;
        Ok(())
    }

    /// Flag a booking as held output, to be registered later.
    pub async fn keep(&self, user: &Principal, booked: &BookedPfn) -> CatalogueResult<()> {
        self.mark(user, booked, BookingState::Kept).await?;
        Ok(())
    }

    /// Resolve a booking. For `Committed`, returns the promoted namespace
    /// entry, or `None` for a replica-only booking ("resolved, nothing to
    /// promote"). Matching zero rows is "someone else already resolved
    /// this" and also returns `None`.
    pub async fn mark(
        &self,
        user: &Principal,
        booked: &BookedPfn,
        state: BookingState,
    ) -> CatalogueResult<Option<Lfn>> {
        let guid_bytes = booked.guid.as_bytes().to_vec();
        let now = self.clock.now_unix();

        match state {
            BookingState::Rejected => {
                sqlx::query(
                    "UPDATE bookings SET expires_at = ? \
                     WHERE pfn = ? AND se_name = ? AND guid = ? AND owner = ?",
                )
                .bind(-(now + self.config.tombstone_secs as i64))
                .bind(&booked.pfn)
                .bind(&booked.se_name)
                .bind(&guid_bytes)
                .bind(user.account())
                .execute(self.router.pool())
                .await?;
                Ok(None)
            }
            BookingState::Kept => {
                sqlx::query(
                    "UPDATE bookings SET retain = 1 \
                     WHERE pfn = ? AND se_name = ? AND guid = ? AND owner = ?",
                )
                .bind(&booked.pfn)
                .bind(&booked.se_name)
                .bind(&guid_bytes)
                .bind(user.account())
                .execute(self.router.pool())
                .await?;
                Ok(None)
            }
            BookingState::Committed => self.commit_rows(user, booked).await,
        }
    }

    async fn commit_rows(
        &self,
        user: &Principal,
        booked: &BookedPfn,
    ) -> CatalogueResult<Option<Lfn>> {
        let guid_bytes = booked.guid.as_bytes().to_vec();

        let rows = sqlx::query_as::<_, BookingRow>(
            "SELECT * FROM bookings \
             WHERE pfn = ? AND se_name = ? AND guid = ? AND owner = ?",
        )
        .bind(&booked.pfn)
        .bind(&booked.se_name)
        .bind(&guid_bytes)
        .bind(user.account())
        .fetch_all(self.router.pool())
        .await?;

        if rows.is_empty() {
            return Ok(None);
        }

        let se = self.ses.require(&booked.se_name).await?;

        let mut record = match self.guids.get(booked.guid).await? {
            Some(record) => record,
            None => {
                // The identity was never registered: build it from the
                // booked metadata.
                let row = &rows[0];
                let mut record = GuidRecord {
                    guid: booked.guid,
                    shard: self.guids.shard_for(booked.guid).await?,
                    guid_id: None,
                    owner: row.owner.clone(),
                    gowner: row.gowner.clone(),
                    perm: Permissions::DEFAULT,
                    size: row.size,
                    checksum: row.checksum.clone(),
                    kind: EntryKind::File,
                    se_numbers: BTreeSet::new(),
                    ctime: self.clock.now(),
                    expires_at: None,
                };
                self.guids.ensure(&mut record).await?;
                record
            }
        };

        match self.guids.add_replica(&mut record, &se, &booked.pfn).await {
            Ok(()) => {}
            // Someone already attached this replica: the commit proceeds.
            Err(CatalogueError::DuplicateReplica { .. }) => {}
            Err(e) => return Err(e),
        }

        let mut promoted = None;
        let mut seen = BTreeSet::new();
        for row in &rows {
            if row.lfn.is_empty() || !seen.insert(row.lfn.clone()) {
                continue;
            }
            let path = LogicalPath::parse(&row.lfn)?;
            let entry = self.lfns.lfn(&path).await?;
            if entry.exists {
                promoted = Some(entry);
                continue;
            }

            let mut fresh = entry;
            fresh.owner = record.owner.clone();
            fresh.gowner = record.gowner.clone();
            fresh.perm = record.perm;
            fresh.size = record.size;
            fresh.kind = record.kind;
            fresh.guid = Some(record.guid);
            fresh.guid_time = Some(record.guid.index_time());
            fresh.checksum = record.checksum.clone();
            fresh.ctime = record.ctime;
            fresh.expires_at = record.expires_at;
            fresh.job_id = row.job_id;
            promoted = Some(self.lfns.insert(&fresh).await?);
        }

        sqlx::query(
            "DELETE FROM bookings \
             WHERE pfn = ? AND se_name = ? AND guid = ? AND owner = ?",
        )
        .bind(&booked.pfn)
        .bind(&booked.se_name)
        .bind(&guid_bytes)
        .bind(user.account())
        .execute(self.router.pool())
        .await?;

        Ok(promoted)
    }

    /// Reconstruct the reservation at a physical location. Fails if the
    /// location is ambiguous (more than one booking row).
    pub async fn booked_pfn(&self, pfn: &str) -> CatalogueResult<Option<BookedPfn>> {
        let rows = sqlx::query_as::<_, BookingRow>("SELECT * FROM bookings WHERE pfn = ?")
            .bind(pfn)
            .fetch_all(self.router.pool())
            .await?;

        let row = match rows.len() {
            0 => return Ok(None),
            1 => &rows[0],
            n => {
                return Err(CatalogueError::Internal(format!(
                    "{n} bookings share the location {pfn}"
                )))
            }
        };

        let se = self.ses.require(&row.se_name).await?;
        Ok(Some(BookedPfn {
            pfn: row.pfn.clone(),
            guid: row.guid()?,
            se_name: row.se_name.clone(),
            se_number: se.se_number,
        }))
    }

    /// Release every reservation left behind by a prior attempt of this
    /// job: tombstone all its active bookings without waiting for natural
    /// lease expiry. Returns how many were released.
    pub async fn resubmit_job(&self, job_id: i64) -> CatalogueResult<u64> {
        let now = self.clock.now_unix();
        let result = sqlx::query(
            "UPDATE bookings SET expires_at = ? WHERE job_id = ? AND expires_at > 0",
        )
        .bind(-(now + self.config.tombstone_secs as i64))
        .bind(job_id)
        .execute(self.router.pool())
        .await?;
        Ok(result.rows_affected())
    }

    /// Commit every still-active booking this user holds for a job,
    /// extending the resulting namespace entries' expiry by the output
    /// retention window. Returns the registered entries.
    pub async fn register_outputs(
        &self,
        user: &Principal,
        job_id: i64,
    ) -> CatalogueResult<Vec<Lfn>> {
        let pfns: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT pfn FROM bookings \
             WHERE job_id = ? AND expires_at > 0 AND owner = ?",
        )
        .bind(job_id)
        .bind(user.account())
        .fetch_all(self.router.pool())
        .await?;

        let retention =
            self.clock.now() + time::Duration::seconds(self.config.output_retention_secs as i64);

        let mut registered = Vec::new();
        for pfn in pfns {
            let booked = match self.booked_pfn(&pfn).await {
                Ok(Some(booked)) => booked,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(job_id, pfn, error = %e, "skipping unresolvable booked location");
                    continue;
                }
            };

            match self.mark(user, &booked, BookingState::Committed).await {
                Ok(Some(entry)) => {
                    if let Err(e) = self.lfns.set_expire_time(&entry.path, retention).await {
                        tracing::warn!(path = %entry.path, error = %e, "failed to extend output retention");
                    }
                    registered.push(entry);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(job_id, pfn = booked.pfn, error = %e, "output registration failed");
                }
            }
        }
        Ok(registered)
    }
}
