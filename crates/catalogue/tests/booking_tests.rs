//! Write-booking protocol behavior: leases, idempotence, promotion,
//! quota, job sweeps.

mod common;

use common::{alice, fixture, fixture_with_quota, mallory, open_directory, path, T0};
use std::sync::Arc;
use tessella_catalogue::{CatalogueError, FixedQuota, WriteIntent};
use tessella_core::EntryKind;

fn intent(guid: tessella_core::Guid, size: i64) -> WriteIntent {
    WriteIntent {
        guid,
        size,
        checksum: Some("d41d8cd98f00b204e9800998ecf8427e".to_string()),
        job_id: None,
    }
}

async fn booking_row(
    fx: &common::Fixture,
    pfn: &str,
) -> Option<(String, i64, bool)> {
    sqlx::query_as::<_, (String, i64, bool)>(
        "SELECT owner, expires_at, retain FROM bookings WHERE pfn = ?",
    )
    .bind(pfn)
    .fetch_optional(fx.catalogue.router().pool())
    .await
    .unwrap()
}

#[tokio::test]
async fn booking_is_idempotent_for_the_same_owner() {
    let fx = fixture().await;
    let user = alice();
    let dir = open_directory(&fx, "/grid/data").await;
    let target = dir.join("file.root").unwrap();
    let guid = fx.catalogue.guids().factory().generate();

    let first = fx
        .catalogue
        .booking()
        .book(&user, &target, &intent(guid, 1024), None, "CERN::EOS")
        .await
        .unwrap();
    let (_, lease1, _) = booking_row(&fx, &first.pfn).await.unwrap();
    assert_eq!(lease1, T0 + 86400);

    fx.clock.advance(time::Duration::hours(1));
    let second = fx
        .catalogue
        .booking()
        .book(&user, &target, &intent(guid, 1024), None, "CERN::EOS")
        .await
        .unwrap();
    assert_eq!(first.pfn, second.pfn);

    // Exactly one active row, with a renewed lease.
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bookings WHERE pfn = ?")
        .bind(&first.pfn)
        .fetch_one(fx.catalogue.router().pool())
        .await
        .unwrap();
    assert_eq!(count, 1);
    let (_, lease2, _) = booking_row(&fx, &first.pfn).await.unwrap();
    assert_eq!(lease2, T0 + 3600 + 86400);
}

#[tokio::test]
async fn active_lease_excludes_other_owners() {
    let fx = fixture().await;
    let dir = open_directory(&fx, "/grid/data").await;
    let target = dir.join("file.root").unwrap();
    let guid = fx.catalogue.guids().factory().generate();

    let booked = fx
        .catalogue
        .booking()
        .book(&alice(), &target, &intent(guid, 1024), None, "CERN::EOS")
        .await
        .unwrap();

    let err = fx
        .catalogue
        .booking()
        .book(
            &mallory(),
            &target,
            &intent(guid, 1024),
            Some(&booked.pfn),
            "CERN::EOS",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CatalogueError::LeaseConflict { owner } if owner == "alice"));
}

#[tokio::test]
async fn expired_lease_is_reclaimable_by_another_owner() {
    let fx = fixture().await;
    let dir = open_directory(&fx, "/grid/data").await;
    let target = dir.join("file.root").unwrap();
    let guid = fx.catalogue.guids().factory().generate();

    let booked = fx
        .catalogue
        .booking()
        .book(&alice(), &target, &intent(guid, 1024), None, "CERN::EOS")
        .await
        .unwrap();

    // The lease is the timeout: once it lapses, the key is free again.
    fx.clock.advance(time::Duration::seconds(86_401));
    fx.catalogue
        .booking()
        .book(
            &mallory(),
            &target,
            &intent(guid, 1024),
            Some(&booked.pfn),
            "CERN::EOS",
        )
        .await
        .unwrap();

    let (owner, _, _) = booking_row(&fx, &booked.pfn).await.unwrap();
    assert_eq!(owner, "mallory");
}

#[tokio::test]
async fn commit_promotes_exactly_once() {
    let fx = fixture().await;
    let user = alice();
    let dir = open_directory(&fx, "/grid/data").await;
    let target = dir.join("file.root").unwrap();
    let guid = fx.catalogue.guids().factory().generate();

    let booked = fx
        .catalogue
        .booking()
        .book(&user, &target, &intent(guid, 1024), None, "CERN::EOS")
        .await
        .unwrap();

    let entry = fx
        .catalogue
        .booking()
        .commit(&user, &booked)
        .await
        .unwrap()
        .expect("commit should promote the namespace entry");
    assert_eq!(entry.path, target);
    assert_eq!(entry.size, 1024);
    assert_eq!(entry.owner, "alice");
    assert_eq!(entry.guid, Some(guid));
    assert_eq!(entry.kind, EntryKind::File);

    // The identity now exists with one replica on the requested element.
    let record = fx.catalogue.guids().get(guid).await.unwrap().unwrap();
    let replicas = fx.catalogue.guids().replicas(&record).await.unwrap();
    assert_eq!(replicas.len(), 1);
    assert_eq!(replicas[0].se_number, 1);
    assert_eq!(replicas[0].pfn, booked.pfn);

    // Committing again after the row is gone is a no-op, not an error.
    let again = fx.catalogue.booking().commit(&user, &booked).await.unwrap();
    assert!(again.is_none());
    assert!(fx.catalogue.lfns().exists(&target).await.unwrap());
}

#[tokio::test]
async fn quota_blocks_new_identities_but_not_extra_replicas() {
    let quota = Arc::new(FixedQuota {
        max_files: 10,
        max_bytes: 2_000,
    });
    let fx = fixture_with_quota(quota).await;
    let user = alice();
    let dir = open_directory(&fx, "/grid/data").await;
    let guid = fx.catalogue.guids().factory().generate();

    // A new identity past the byte quota is rejected.
    let err = fx
        .catalogue
        .booking()
        .book(
            &user,
            &dir.join("big.root").unwrap(),
            &intent(guid, 50_000),
            None,
            "CERN::EOS",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CatalogueError::QuotaExceeded { .. }));

    // Register the identity within quota, then add a replica elsewhere:
    // replica bookings bypass quota even though the size never changed.
    let target = dir.join("ok.root").unwrap();
    let booked = fx
        .catalogue
        .booking()
        .book(&user, &target, &intent(guid, 1_500), None, "CERN::EOS")
        .await
        .unwrap();
    fx.catalogue.booking().commit(&user, &booked).await.unwrap();

    fx.catalogue
        .booking()
        .book(&user, &target, &intent(guid, 1_500), None, "FZK::TAPE")
        .await
        .unwrap();
}

#[tokio::test]
async fn conflicting_content_is_rejected() {
    let fx = fixture().await;
    let user = alice();
    let dir = open_directory(&fx, "/grid/data").await;
    let target = dir.join("file.root").unwrap();
    let guid = fx.catalogue.guids().factory().generate();

    let booked = fx
        .catalogue
        .booking()
        .book(&user, &target, &intent(guid, 1024), None, "CERN::EOS")
        .await
        .unwrap();
    fx.catalogue.booking().commit(&user, &booked).await.unwrap();

    // Different size for the same identity.
    let err = fx
        .catalogue
        .booking()
        .book(&user, &target, &intent(guid, 2048), None, "FZK::TAPE")
        .await
        .unwrap_err();
    assert!(matches!(err, CatalogueError::ConflictingContent(_)));

    // Different checksum for the same identity.
    let mut changed = intent(guid, 1024);
    changed.checksum = Some("ffffffffffffffffffffffffffffffff".to_string());
    let err = fx
        .catalogue
        .booking()
        .book(&user, &target, &changed, None, "FZK::TAPE")
        .await
        .unwrap_err();
    assert!(matches!(err, CatalogueError::ConflictingContent(_)));

    // Same content on the same element: already replicated there.
    let err = fx
        .catalogue
        .booking()
        .book(&user, &target, &intent(guid, 1024), None, "CERN::EOS")
        .await
        .unwrap_err();
    assert!(matches!(err, CatalogueError::DuplicateReplica { .. }));
}

#[tokio::test]
async fn unauthorized_namespace_target_is_denied() {
    let fx = fixture().await;
    // /grid is owned by admin with 755: mallory cannot write under it.
    let guid = fx.catalogue.guids().factory().generate();
    let err = fx
        .catalogue
        .booking()
        .book(
            &mallory(),
            &path("/grid/stolen.root"),
            &intent(guid, 10),
            None,
            "CERN::EOS",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CatalogueError::AccessDenied(_)));
}

#[tokio::test]
async fn replica_only_booking_commits_to_nothing() {
    let fx = fixture().await;
    let user = alice();
    let dir = open_directory(&fx, "/grid/data").await;
    let target = dir.join("file.root").unwrap();
    let guid = fx.catalogue.guids().factory().generate();

    let booked = fx
        .catalogue
        .booking()
        .book(&user, &target, &intent(guid, 1024), None, "CERN::EOS")
        .await
        .unwrap();
    fx.catalogue.booking().commit(&user, &booked).await.unwrap();

    // Booking the bare identity path records an extra replica with no
    // namespace target; committing it returns the no-op sentinel.
    fx.catalogue
        .lfns()
        .chmod(
            &common::admin(),
            &path("/"),
            tessella_core::Permissions::parse("777").unwrap(),
        )
        .await
        .unwrap();

    let bare = path(&format!("/{guid}"));
    let extra = fx
        .catalogue
        .booking()
        .book(&user, &bare, &intent(guid, 1024), None, "FZK::TAPE")
        .await
        .unwrap();

    let outcome = fx.catalogue.booking().commit(&user, &extra).await.unwrap();
    assert!(outcome.is_none(), "replica-only commit promotes nothing");
    assert!(!fx.catalogue.lfns().exists(&bare).await.unwrap());

    let record = fx.catalogue.guids().get(guid).await.unwrap().unwrap();
    let replicas = fx.catalogue.guids().replicas(&record).await.unwrap();
    assert_eq!(replicas.len(), 2);
}

#[tokio::test]
async fn rejection_tombstones_and_frees_the_key() {
    let fx = fixture().await;
    let user = alice();
    let dir = open_directory(&fx, "/grid/data").await;
    let target = dir.join("file.root").unwrap();
    let guid = fx.catalogue.guids().factory().generate();

    let booked = fx
        .catalogue
        .booking()
        .book(&user, &target, &intent(guid, 1024), None, "CERN::EOS")
        .await
        .unwrap();
    fx.catalogue.booking().reject(&user, &booked).await.unwrap();

    let (_, lease, _) = booking_row(&fx, &booked.pfn).await.unwrap();
    assert!(lease < 0, "rejected booking should carry a negative lease");

    // Nothing was promoted and the identity does not exist.
    assert!(!fx.catalogue.lfns().exists(&target).await.unwrap());
    assert!(fx.catalogue.guids().get(guid).await.unwrap().is_none());

    // The tombstone does not block a fresh reservation for the same key.
    fx.catalogue
        .booking()
        .book(&user, &target, &intent(guid, 1024), Some(&booked.pfn), "CERN::EOS")
        .await
        .unwrap();
    let (_, lease, _) = booking_row(&fx, &booked.pfn).await.unwrap();
    assert!(lease > 0);
}

#[tokio::test]
async fn keep_flags_the_row_without_promoting() {
    let fx = fixture().await;
    let user = alice();
    let dir = open_directory(&fx, "/grid/data").await;
    let target = dir.join("held.root").unwrap();
    let guid = fx.catalogue.guids().factory().generate();

    let booked = fx
        .catalogue
        .booking()
        .book(&user, &target, &intent(guid, 1024), None, "CERN::EOS")
        .await
        .unwrap();
    fx.catalogue.booking().keep(&user, &booked).await.unwrap();

    let (_, lease, retain) = booking_row(&fx, &booked.pfn).await.unwrap();
    assert!(lease > 0);
    assert!(retain);
    assert!(!fx.catalogue.lfns().exists(&target).await.unwrap());
}

#[tokio::test]
async fn resubmission_releases_job_leases() {
    let fx = fixture().await;
    let user = alice();
    let dir = open_directory(&fx, "/grid/jobs").await;
    let guid_a = fx.catalogue.guids().factory().generate();
    let guid_b = fx.catalogue.guids().factory().generate();

    let mut job_intent_a = intent(guid_a, 100);
    job_intent_a.job_id = Some(4242);
    let mut job_intent_b = intent(guid_b, 200);
    job_intent_b.job_id = Some(4242);

    let booked_a = fx
        .catalogue
        .booking()
        .book(&user, &dir.join("a.root").unwrap(), &job_intent_a, None, "CERN::EOS")
        .await
        .unwrap();
    fx.catalogue
        .booking()
        .book(&user, &dir.join("b.root").unwrap(), &job_intent_b, None, "CERN::EOS")
        .await
        .unwrap();

    let released = fx.catalogue.booking().resubmit_job(4242).await.unwrap();
    assert_eq!(released, 2);

    let active: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM bookings WHERE job_id = 4242 AND expires_at > 0",
    )
    .fetch_one(fx.catalogue.router().pool())
    .await
    .unwrap();
    assert_eq!(active, 0);

    // The same key can be booked again as a fresh reservation.
    fx.catalogue
        .booking()
        .book(
            &user,
            &dir.join("a.root").unwrap(),
            &job_intent_a,
            Some(&booked_a.pfn),
            "CERN::EOS",
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn register_outputs_commits_and_extends_retention() {
    let fx = fixture().await;
    let user = alice();
    let dir = open_directory(&fx, "/grid/jobs").await;
    let guid_a = fx.catalogue.guids().factory().generate();
    let guid_b = fx.catalogue.guids().factory().generate();

    for (guid, name, size) in [(guid_a, "a.root", 100_i64), (guid_b, "b.root", 200)] {
        let mut job_intent = intent(guid, size);
        job_intent.job_id = Some(7001);
        fx.catalogue
            .booking()
            .book(&user, &dir.join(name).unwrap(), &job_intent, None, "CERN::EOS")
            .await
            .unwrap();
    }

    let registered = fx
        .catalogue
        .booking()
        .register_outputs(&user, 7001)
        .await
        .unwrap();
    assert_eq!(registered.len(), 2);

    for entry in &registered {
        let refreshed = fx.catalogue.lfns().lfn(&entry.path).await.unwrap();
        assert!(refreshed.exists);
        let expires = refreshed.expires_at.expect("retention should be set");
        assert_eq!(expires.unix_timestamp(), T0 + 14 * 86400);
    }

    // Nothing left to register.
    let empty = fx
        .catalogue
        .booking()
        .register_outputs(&user, 7001)
        .await
        .unwrap();
    assert!(empty.is_empty());
}
