//! Shared fixture for catalogue integration tests: a provisioned two-host
//! catalogue with namespace mounts, an identity time shard and a few
//! storage elements, driven by a manual clock.
#![allow(dead_code)]

use std::sync::Arc;
use tempfile::TempDir;
use tessella_catalogue::{Catalogue, ManualClock, QuotaPolicy, UnixPermissions, Unlimited};
use tessella_core::{CatalogueConfig, LogicalPath, Principal, RouterConfig};
use time::OffsetDateTime;

/// Fixture start time, chosen so lease arithmetic is easy to eyeball.
pub const T0: i64 = 1_700_000_000;

pub struct Fixture {
    // Held for the lifetime of the databases.
    #[allow(dead_code)]
    pub dir: TempDir,
    pub clock: Arc<ManualClock>,
    pub catalogue: Catalogue,
}

pub async fn fixture() -> Fixture {
    fixture_with_quota(Arc::new(Unlimited)).await
}

pub async fn fixture_with_quota(quota: Arc<dyn QuotaPolicy>) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let config = CatalogueConfig {
        router: RouterConfig {
            path: dir.path().join("router.db"),
            shard_root: dir.path().join("shards"),
        },
        ..CatalogueConfig::default()
    };
    let clock = Arc::new(ManualClock::new(
        OffsetDateTime::from_unix_timestamp(T0).unwrap(),
    ));

    let catalogue = Catalogue::open_with(
        &config,
        clock.clone(),
        Arc::new(UnixPermissions),
        quota,
    )
    .await
    .unwrap();

    let admin = admin();
    let p = catalogue.provisioner();
    p.add_host(1, "host1", "catalogue.db").await.unwrap();
    p.add_host(2, "host2", "catalogue.db").await.unwrap();

    p.add_mount(1, 10, &LogicalPath::root(), &admin).await.unwrap();
    p.add_mount(1, 11, &path("/grid"), &admin).await.unwrap();
    p.add_mount(2, 12, &path("/vault"), &admin).await.unwrap();

    // One identity shard covering all index times.
    p.add_time_shard(1, 21, 0).await.unwrap();

    p.add_storage_element(1, "CERN::EOS", "root://eos.cern.ch:1094/grid", true, true, &["disk"])
        .await
        .unwrap();
    p.add_storage_element(2, "FZK::TAPE", "root://tape.fzk.de:1094/grid", true, true, &["tape"])
        .await
        .unwrap();
    p.add_storage_element(90, "no_se", "guid://", true, false, &[])
        .await
        .unwrap();

    Fixture {
        dir,
        clock,
        catalogue,
    }
}

/// The fixture's administrative user; owns the mount roots.
pub fn admin() -> Principal {
    Principal::with_roles("admin", vec!["admin".to_string()])
}

/// A regular user with a production role.
pub fn alice() -> Principal {
    Principal::with_roles("alice", vec!["prod".to_string()])
}

/// A user with no rights over anything the fixture creates.
pub fn mallory() -> Principal {
    Principal::new("mallory")
}

pub fn path(s: &str) -> LogicalPath {
    LogicalPath::parse(s).unwrap()
}

/// Create a directory writable by everyone, for tests that exercise
/// operations by multiple users.
pub async fn open_directory(fx: &Fixture, at: &str) -> LogicalPath {
    let p = path(at);
    let admin = admin();
    fx.catalogue.lfns().mkdirs(&admin, &p).await.unwrap();
    fx.catalogue
        .lfns()
        .chmod(&admin, &p, tessella_core::Permissions::parse("777").unwrap())
        .await
        .unwrap();
    p
}
