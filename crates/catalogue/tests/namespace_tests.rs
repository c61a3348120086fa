//! Namespace operations: directory trees, ownership, deletion with purge,
//! renames within and across shards.

mod common;

use common::{admin, alice, fixture, mallory, open_directory, path};
use tessella_catalogue::{CatalogueBackend, CatalogueError, Clock};
use tessella_core::{EntryKind, Permissions};

#[tokio::test]
async fn mkdirs_builds_the_chain_with_caller_ownership() {
    let fx = fixture().await;
    let user = alice();
    open_directory(&fx, "/grid/users").await;

    let deep = path("/grid/users/alice/2026/reco");
    let created = fx.catalogue.lfns().mkdirs(&user, &deep).await.unwrap();
    assert!(created.exists);
    assert!(created.is_directory());
    assert_eq!(created.owner, "alice");
    assert_eq!(created.gowner, "prod");

    for ancestor in ["/grid/users/alice", "/grid/users/alice/2026"] {
        let entry = fx.catalogue.lfns().lfn(&path(ancestor)).await.unwrap();
        assert!(entry.exists && entry.is_directory());
        assert_eq!(entry.owner, "alice");
    }

    // Idempotent for directories, refused over files.
    fx.catalogue.lfns().mkdirs(&user, &deep).await.unwrap();
    let file = deep.join("data.root").unwrap();
    fx.catalogue.lfns().touch(&user, &file).await.unwrap();
    assert!(matches!(
        fx.catalogue.lfns().mkdirs(&user, &file).await,
        Err(CatalogueError::AlreadyExists(_))
    ));
}

#[tokio::test]
async fn mkdirs_requires_write_on_the_nearest_ancestor() {
    let fx = fixture().await;
    assert!(matches!(
        fx.catalogue
            .lfns()
            .mkdirs(&mallory(), &path("/grid/theft"))
            .await,
        Err(CatalogueError::AccessDenied(_))
    ));
}

#[tokio::test]
async fn listing_is_name_sorted_and_directory_only() {
    let fx = fixture().await;
    let user = alice();
    let dir = open_directory(&fx, "/grid/data").await;

    for name in ["zeta.root", "alpha.root", "midway.root"] {
        fx.catalogue
            .lfns()
            .touch(&user, &dir.join(name).unwrap())
            .await
            .unwrap();
    }
    fx.catalogue
        .lfns()
        .mkdirs(&user, &dir.join("subdir").unwrap())
        .await
        .unwrap();

    let names: Vec<String> = fx
        .catalogue
        .lfns()
        .list(&dir)
        .await
        .unwrap()
        .iter()
        .map(|e| e.path.name().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["alpha.root", "midway.root", "subdir", "zeta.root"]);

    let file = dir.join("alpha.root").unwrap();
    assert!(matches!(
        fx.catalogue.lfns().list(&file).await,
        Err(CatalogueError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn touch_creates_then_refreshes() {
    let fx = fixture().await;
    let user = alice();
    let dir = open_directory(&fx, "/grid/data").await;
    let file = dir.join("empty.root").unwrap();

    let created = fx.catalogue.lfns().touch(&user, &file).await.unwrap();
    assert!(created.exists);
    assert_eq!(created.kind, EntryKind::File);
    assert_eq!(created.size, 0);
    assert!(created.guid.is_none());
    let first_ctime = created.ctime;

    fx.clock.advance(time::Duration::minutes(5));
    let touched = fx.catalogue.lfns().touch(&user, &file).await.unwrap();
    assert!(touched.ctime > first_ctime);

    // A foreign user may not touch it.
    assert!(matches!(
        fx.catalogue.lfns().touch(&mallory(), &file).await,
        Err(CatalogueError::AccessDenied(_))
    ));
}

#[tokio::test]
async fn chown_and_chmod_are_owner_only() {
    let fx = fixture().await;
    let user = alice();
    let dir = open_directory(&fx, "/grid/data").await;
    let file = dir.join("owned.root").unwrap();
    fx.catalogue.lfns().touch(&user, &file).await.unwrap();

    assert!(matches!(
        fx.catalogue
            .lfns()
            .chown(&mallory(), &file, "mallory", None)
            .await,
        Err(CatalogueError::AccessDenied(_))
    ));
    assert!(matches!(
        fx.catalogue
            .lfns()
            .chmod(&mallory(), &file, Permissions::parse("777").unwrap())
            .await,
        Err(CatalogueError::AccessDenied(_))
    ));

    fx.catalogue
        .lfns()
        .chown(&user, &file, "bob", Some("users"))
        .await
        .unwrap();
    let entry = fx.catalogue.lfns().lfn(&file).await.unwrap();
    assert_eq!(entry.owner, "bob");
    assert_eq!(entry.gowner, "users");

    // Ownership moved: the previous owner lost their rights.
    assert!(matches!(
        fx.catalogue
            .lfns()
            .chmod(&user, &file, Permissions::parse("600").unwrap())
            .await,
        Err(CatalogueError::AccessDenied(_))
    ));
}

#[tokio::test]
async fn rm_file_with_purge_queues_physical_reclamation() {
    let fx = fixture().await;
    let user = alice();
    let dir = open_directory(&fx, "/grid/data").await;
    let target = dir.join("file.root").unwrap();

    // Register a file through the booking path so it has an identity and
    // a replica.
    let guid = fx.catalogue.guids().factory().generate();
    let booked = fx
        .catalogue
        .booking()
        .book(
            &user,
            &target,
            &tessella_catalogue::WriteIntent {
                guid,
                size: 3_000,
                checksum: None,
                job_id: None,
            },
            None,
            "CERN::EOS",
        )
        .await
        .unwrap();
    fx.catalogue.booking().commit(&user, &booked).await.unwrap();

    assert!(fx
        .catalogue
        .lfns()
        .rm(&user, &target, false, true)
        .await
        .unwrap());
    assert!(!fx.catalogue.lfns().exists(&target).await.unwrap());

    // The identity's replicas are queued for asynchronous reclamation.
    let purges = fx.catalogue.guids().pending_purges().await.unwrap();
    assert_eq!(purges.len(), 1);
    assert_eq!(purges[0].se_number, None, "namespace purge covers all replicas");

    // Removing a missing path reports false, not an error.
    assert!(!fx
        .catalogue
        .lfns()
        .rm(&user, &target, false, true)
        .await
        .unwrap());
}

#[tokio::test]
async fn rm_directory_requires_recursive_and_sweeps_nested_mounts() {
    let fx = fixture().await;
    let user = alice();
    open_directory(&fx, "/grid/prod").await;
    fx.catalogue
        .lfns()
        .mkdirs(&user, &path("/grid/prod/run1/sub"))
        .await
        .unwrap();
    fx.catalogue
        .lfns()
        .touch(&user, &path("/grid/prod/run1/a.root"))
        .await
        .unwrap();
    fx.catalogue
        .lfns()
        .touch(&user, &path("/grid/prod/run1/sub/b.root"))
        .await
        .unwrap();

    assert!(matches!(
        fx.catalogue
            .lfns()
            .rm(&user, &path("/grid/prod/run1"), false, false)
            .await,
        Err(CatalogueError::InvalidArgument(_))
    ));

    assert!(fx
        .catalogue
        .lfns()
        .rm(&user, &path("/grid/prod/run1"), true, false)
        .await
        .unwrap());
    assert!(!fx.catalogue.lfns().exists(&path("/grid/prod/run1")).await.unwrap());
    assert!(!fx
        .catalogue
        .lfns()
        .exists(&path("/grid/prod/run1/sub/b.root"))
        .await
        .unwrap());

    // Mount points themselves cannot be removed.
    assert!(matches!(
        fx.catalogue.lfns().rm(&admin(), &path("/grid"), true, false).await,
        Err(CatalogueError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn mv_within_a_shard_carries_children() {
    let fx = fixture().await;
    let user = alice();
    open_directory(&fx, "/grid/work").await;
    fx.catalogue
        .lfns()
        .mkdirs(&user, &path("/grid/work/old/sub"))
        .await
        .unwrap();
    fx.catalogue
        .lfns()
        .touch(&user, &path("/grid/work/old/sub/data.root"))
        .await
        .unwrap();

    let moved = fx
        .catalogue
        .lfns()
        .mv(&user, &path("/grid/work/old"), &path("/grid/work/new"))
        .await
        .unwrap();
    assert!(moved.exists && moved.is_directory());

    assert!(!fx.catalogue.lfns().exists(&path("/grid/work/old")).await.unwrap());
    let file = fx
        .catalogue
        .lfns()
        .lfn(&path("/grid/work/new/sub/data.root"))
        .await
        .unwrap();
    assert!(file.exists);

    // Moving onto an existing path is refused.
    fx.catalogue
        .lfns()
        .mkdirs(&user, &path("/grid/work/other"))
        .await
        .unwrap();
    assert!(matches!(
        fx.catalogue
            .lfns()
            .mv(&user, &path("/grid/work/new"), &path("/grid/work/other"))
            .await,
        Err(CatalogueError::AlreadyExists(_))
    ));
}

#[tokio::test]
async fn mv_across_shards_reinserts_and_cleans_the_source() {
    let fx = fixture().await;
    let user = alice();
    open_directory(&fx, "/grid/export").await;
    open_directory(&fx, "/vault/inbox").await;
    fx.catalogue
        .lfns()
        .mkdirs(&user, &path("/grid/export/batch/sub"))
        .await
        .unwrap();
    fx.catalogue
        .lfns()
        .touch(&user, &path("/grid/export/batch/a.root"))
        .await
        .unwrap();
    fx.catalogue
        .lfns()
        .touch(&user, &path("/grid/export/batch/sub/b.root"))
        .await
        .unwrap();

    let moved = fx
        .catalogue
        .lfns()
        .mv(&user, &path("/grid/export/batch"), &path("/vault/inbox/batch"))
        .await
        .unwrap();
    assert!(moved.exists && moved.is_directory());

    for p in [
        "/vault/inbox/batch",
        "/vault/inbox/batch/a.root",
        "/vault/inbox/batch/sub",
        "/vault/inbox/batch/sub/b.root",
    ] {
        assert!(
            fx.catalogue.lfns().exists(&path(p)).await.unwrap(),
            "{p} should exist after the move"
        );
    }
    assert!(!fx
        .catalogue
        .lfns()
        .exists(&path("/grid/export/batch"))
        .await
        .unwrap());

    // The moved rows live on the vault shard now.
    let host2 = fx.catalogue.hosts().host(2).await.unwrap();
    let vault_rows: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM l12 WHERE lfn LIKE 'inbox/batch%'")
            .fetch_one(host2.pool())
            .await
            .unwrap();
    assert_eq!(vault_rows, 4);
}

#[tokio::test]
async fn set_expire_time_reports_benign_miss() {
    let fx = fixture().await;
    let user = alice();
    let dir = open_directory(&fx, "/grid/data").await;
    let file = dir.join("f.root").unwrap();
    fx.catalogue.lfns().touch(&user, &file).await.unwrap();

    let when = fx.clock.now() + time::Duration::days(7);
    assert!(fx.catalogue.lfns().set_expire_time(&file, when).await.unwrap());
    let entry = fx.catalogue.lfns().lfn(&file).await.unwrap();
    assert_eq!(entry.expires_at.unwrap().unix_timestamp(), when.unix_timestamp());

    assert!(!fx
        .catalogue
        .lfns()
        .set_expire_time(&dir.join("missing.root").unwrap(), when)
        .await
        .unwrap());
}

#[tokio::test]
async fn backend_seam_exposes_the_engine() {
    let fx = fixture().await;
    let user = alice();
    let dir = open_directory(&fx, "/grid/data").await;
    let file = dir.join("f.root").unwrap();
    fx.catalogue.lfns().touch(&user, &file).await.unwrap();

    let backend: &dyn CatalogueBackend = &fx.catalogue;
    let resolved = backend.resolve(&file).await.unwrap().unwrap();
    assert_eq!(resolved.path, file);
    assert!(backend.resolve(&dir.join("nope").unwrap()).await.unwrap().is_none());

    let listed = backend.list(&dir).await.unwrap();
    assert_eq!(listed.len(), 1);

    assert!(backend.delete(&user, &file, false, false).await.unwrap());
    assert!(backend.resolve(&file).await.unwrap().is_none());
}
