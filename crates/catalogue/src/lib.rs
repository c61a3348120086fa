//! Sharded metadata catalogue engine for Tessella.
//!
//! This crate provides the control-plane data model of the grid file
//! catalogue:
//! - Shard registry and the directory database behind it
//! - Mount-table and identity time-shard resolution with TTL caches
//! - The GUID identity & replica registry with usage accounting
//! - Namespace entries and directory operations
//! - The write-booking protocol (reserve, commit/reject/keep, job sweeps)
//! - Deferred cleanup queues for dependent-row deletion

pub mod authz;
pub mod backend;
pub mod booking;
pub mod cleanup;
pub mod clock;
pub mod error;
pub mod guids;
pub mod hosts;
pub mod lfns;
pub mod models;
pub mod mounts;
pub mod provision;
pub mod quota;
pub mod router;
pub mod ses;
pub mod timeshards;

pub use authz::{AccessPolicy, UnixPermissions};
pub use backend::CatalogueBackend;
pub use booking::{BookedPfn, BookingState, BookingTable, WriteIntent};
pub use cleanup::{CleanupQueues, RowKind};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CatalogueError, CatalogueResult};
pub use guids::{GuidRecord, GuidRegistry, Replica};
pub use lfns::{Lfn, LfnCatalogue};
pub use models::ShardTableRef;
pub use mounts::{MountEntry, MountResolver};
pub use provision::Provisioner;
pub use quota::{FixedQuota, QuotaPolicy, Unlimited};
pub use router::RouterDb;
pub use ses::{SeDirectory, StorageElement};
pub use timeshards::{TimeShardEntry, TimeShardResolver};

use crate::hosts::HostRegistry;
use std::sync::Arc;
use tessella_core::{CatalogueConfig, GuidFactory};

/// The wired-up catalogue: one instance owns the resolvers, registries and
/// queues, so their lifetimes and caches are explicit instead of
/// process-wide statics.
pub struct Catalogue {
    clock: Arc<dyn Clock>,
    router: Arc<RouterDb>,
    hosts: Arc<HostRegistry>,
    mounts: Arc<MountResolver>,
    timeshards: Arc<TimeShardResolver>,
    ses: Arc<SeDirectory>,
    cleanup: CleanupQueues,
    guids: Arc<GuidRegistry>,
    lfns: Arc<LfnCatalogue>,
    booking: Arc<BookingTable>,
}

impl Catalogue {
    /// Open a catalogue with the default collaborators: the system clock,
    /// permission-bit authorization and no quota enforcement.
    pub async fn open(config: &CatalogueConfig) -> CatalogueResult<Self> {
        Self::open_with(
            config,
            Arc::new(SystemClock),
            Arc::new(UnixPermissions),
            Arc::new(Unlimited),
        )
        .await
    }

    /// Open a catalogue with explicit collaborators. Tests inject a manual
    /// clock here to drive cache staleness and lease expiry.
    pub async fn open_with(
        config: &CatalogueConfig,
        clock: Arc<dyn Clock>,
        authz: Arc<dyn AccessPolicy>,
        quota: Arc<dyn QuotaPolicy>,
    ) -> CatalogueResult<Self> {
        let router = Arc::new(RouterDb::open(&config.router.path).await?);
        let hosts = Arc::new(HostRegistry::new(
            router.clone(),
            config.router.shard_root.clone(),
        ));
        let mounts = Arc::new(MountResolver::new(
            router.clone(),
            clock.clone(),
            config.cache.ttl_secs,
            config.cache.probe_interval_secs,
        ));
        let timeshards = Arc::new(TimeShardResolver::new(
            router.clone(),
            clock.clone(),
            config.cache.ttl_secs,
        ));
        let ses = Arc::new(SeDirectory::new(
            router.clone(),
            clock.clone(),
            config.cache.ttl_secs,
        ));
        let cleanup = CleanupQueues::new(hosts.clone(), config.cleanup.clone());
        let guids = Arc::new(GuidRegistry::new(
            hosts.clone(),
            timeshards.clone(),
            ses.clone(),
            cleanup.clone(),
            router.clone(),
            clock.clone(),
            Arc::new(GuidFactory::new()),
        ));
        let lfns = Arc::new(LfnCatalogue::new(
            hosts.clone(),
            mounts.clone(),
            guids.clone(),
            authz.clone(),
            clock.clone(),
        ));
        let booking = Arc::new(BookingTable::new(
            router.clone(),
            guids.clone(),
            lfns.clone(),
            ses.clone(),
            authz,
            quota,
            clock.clone(),
            config.booking.clone(),
        ));

        Ok(Self {
            clock,
            router,
            hosts,
            mounts,
            timeshards,
            ses,
            cleanup,
            guids,
            lfns,
            booking,
        })
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn router(&self) -> &Arc<RouterDb> {
        &self.router
    }

    pub fn hosts(&self) -> &Arc<HostRegistry> {
        &self.hosts
    }

    pub fn mounts(&self) -> &Arc<MountResolver> {
        &self.mounts
    }

    pub fn timeshards(&self) -> &Arc<TimeShardResolver> {
        &self.timeshards
    }

    pub fn ses(&self) -> &Arc<SeDirectory> {
        &self.ses
    }

    pub fn cleanup(&self) -> &CleanupQueues {
        &self.cleanup
    }

    pub fn guids(&self) -> &Arc<GuidRegistry> {
        &self.guids
    }

    pub fn lfns(&self) -> &Arc<LfnCatalogue> {
        &self.lfns
    }

    pub fn booking(&self) -> &Arc<BookingTable> {
        &self.booking
    }

    /// The administrative surface for hosts, mounts, shards and storage
    /// elements.
    pub fn provisioner(&self) -> Provisioner {
        Provisioner {
            router: self.router.clone(),
            hosts: self.hosts.clone(),
            mounts: self.mounts.clone(),
            timeshards: self.timeshards.clone(),
            ses: self.ses.clone(),
            clock: self.clock.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessella_core::CatalogueConfig;

    #[tokio::test]
    async fn open_creates_the_directory_database() {
        let dir = tempfile::tempdir().unwrap();
        let config = CatalogueConfig {
            router: tessella_core::RouterConfig {
                path: dir.path().join("router.db"),
                shard_root: dir.path().join("shards"),
            },
            ..CatalogueConfig::default()
        };

        let catalogue = Catalogue::open(&config).await.unwrap();
        catalogue.router().health_check().await.unwrap();
    }
}
