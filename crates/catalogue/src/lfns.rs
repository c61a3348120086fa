//! Namespace entries and directory operations.
//!
//! Every operation resolves its shard through the mount table first; a
//! path's shard is independent of its identity's shard. Rows store paths
//! relative to their mount prefix, with the mount point itself as the
//! empty string.

use crate::authz::AccessPolicy;
use crate::clock::Clock;
use crate::error::{CatalogueError, CatalogueResult};
use crate::guids::GuidRegistry;
use crate::hosts::{Host, HostRegistry};
use crate::models::LfnRow;
use crate::mounts::{MountEntry, MountResolver};
use std::sync::Arc;
use tessella_core::{CatalogEntity, EntryKind, Guid, LogicalPath, Permissions, Principal};
use time::OffsetDateTime;

/// One namespace entry, persisted or a "not yet persisted" placeholder.
///
/// A placeholder (`exists == false`) carries the resolved mount and default
/// attributes so callers can fill it in and pass it to [`LfnCatalogue::insert`];
/// it is never mutated in place as if it were persisted.
#[derive(Debug, Clone)]
pub struct Lfn {
    pub path: LogicalPath,
    pub exists: bool,
    pub entry_id: Option<i64>,
    pub parent_id: Option<i64>,
    pub owner: String,
    pub gowner: String,
    pub perm: Permissions,
    pub size: i64,
    pub kind: EntryKind,
    pub guid: Option<Guid>,
    pub guid_time: Option<i64>,
    pub checksum: Option<String>,
    pub ctime: OffsetDateTime,
    pub expires_at: Option<OffsetDateTime>,
    pub job_id: Option<i64>,
    pub(crate) mount: MountEntry,
}

impl Lfn {
    pub fn is_directory(&self) -> bool {
        self.kind.is_directory()
    }

    fn relative(&self) -> CatalogueResult<&str> {
        self.mount.relative_path(&self.path).ok_or_else(|| {
            CatalogueError::Internal(format!(
                "path {} does not lie under mount {}",
                self.path, self.mount.path_prefix
            ))
        })
    }
}

impl CatalogEntity for Lfn {
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

/// Namespace operations over the sharded catalogue.
pub struct LfnCatalogue {
    hosts: Arc<HostRegistry>,
    mounts: Arc<MountResolver>,
    guids: Arc<GuidRegistry>,
    authz: Arc<dyn AccessPolicy>,
    clock: Arc<dyn Clock>,
}

impl LfnCatalogue {
    pub fn new(
        hosts: Arc<HostRegistry>,
        mounts: Arc<MountResolver>,
        guids: Arc<GuidRegistry>,
        authz: Arc<dyn AccessPolicy>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            hosts,
            mounts,
            guids,
            authz,
            clock,
        }
    }

    /// Resolve a path to its entry, or to a placeholder when no row exists.
    /// Fails with `NotFound` only when no mount covers the path at all.
    pub async fn lfn(&self, path: &LogicalPath) -> CatalogueResult<Lfn> {
        let mount = self
            .mounts
            .resolve(path)
            .await?
            .ok_or_else(|| CatalogueError::NotFound(format!("no mount covers {path}")))?;
        let host = self.hosts.host(mount.host_index).await?;
        let rel = mount
            .relative_path(path)
            .ok_or_else(|| CatalogueError::Internal(format!("bad mount match for {path}")))?
            .to_string();

        match self.fetch_row(&host, &mount, &rel).await? {
            Some(row) => Self::entry_from_row(path.clone(), mount, row),
            None => Ok(self.placeholder(path.clone(), mount)),
        }
    }

    /// Whether an entry exists at this path.
    pub async fn exists(&self, path: &LogicalPath) -> CatalogueResult<bool> {
        Ok(self.lfn(path).await?.exists)
    }

    /// The closest ancestor (including the path itself) that exists.
    pub async fn nearest_existing(&self, path: &LogicalPath) -> CatalogueResult<Option<Lfn>> {
        let mut cursor = Some(path.clone());
        while let Some(p) = cursor {
            match self.lfn(&p).await {
                Ok(entry) if entry.exists => return Ok(Some(entry)),
                Ok(_) | Err(CatalogueError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
            cursor = p.parent();
        }
        Ok(None)
    }

    /// List the children of a directory, name-sorted.
    pub async fn list(&self, path: &LogicalPath) -> CatalogueResult<Vec<Lfn>> {
        let dir = self.lfn(path).await?;
        if !dir.exists {
            return Err(CatalogueError::NotFound(path.to_string()));
        }
        if !dir.is_directory() {
            return Err(CatalogueError::InvalidArgument(format!(
                "{path} is not a directory"
            )));
        }

        let host = self.hosts.host(dir.mount.host_index).await?;
        let entry_id = dir.entry_id.ok_or_else(|| {
            CatalogueError::Internal(format!("persisted entry without id: {path}"))
        })?;

        let sql = format!(
            "SELECT * FROM {} WHERE parent_id = ? ORDER BY lfn",
            dir.mount.lfn_table()
        );
        let rows = sqlx::query_as::<_, LfnRow>(&sql)
            .bind(entry_id)
            .fetch_all(host.pool())
            .await?;

        rows.into_iter()
            .map(|row| {
                let child = child_path(&dir.mount, &row.lfn)?;
                Self::entry_from_row(child, dir.mount.clone(), row)
            })
            .collect()
    }

    /// Create the directory at `path` and any missing ancestors, owned by
    /// the caller. Write authorization is checked against the nearest
    /// existing ancestor.
    pub async fn mkdirs(&self, user: &Principal, path: &LogicalPath) -> CatalogueResult<Lfn> {
        let existing = self.lfn(path).await?;
        if existing.exists {
            return if existing.is_directory() {
                Ok(existing)
            } else {
                Err(CatalogueError::AlreadyExists(format!(
                    "{path} exists and is not a directory"
                )))
            };
        }

        let anchor = self
            .nearest_existing(path)
            .await?
            .ok_or_else(|| CatalogueError::NotFound(format!("no mount covers {path}")))?;
        if !anchor.is_directory() {
            return Err(CatalogueError::AlreadyExists(format!(
                "{} exists and is not a directory",
                anchor.path
            )));
        }
        if !self.authz.can_write(&anchor, user) {
            return Err(CatalogueError::AccessDenied(format!(
                "{} may not write under {}",
                user.account(),
                anchor.path
            )));
        }

        let mut created = None;
        for ancestor in path.ancestry() {
            if !ancestor.starts_with(&anchor.path) || ancestor == anchor.path {
                continue;
            }
            let entry = self.lfn(&ancestor).await?;
            if entry.exists {
                if !entry.is_directory() {
                    return Err(CatalogueError::AlreadyExists(format!(
                        "{ancestor} exists and is not a directory"
                    )));
                }
                continue;
            }

            let mut dir = entry;
            dir.owner = user.account().to_string();
            dir.gowner = user.default_group().to_string();
            dir.kind = EntryKind::Directory;
            created = Some(self.insert(&dir).await?);
        }

        match created {
            Some(entry) => Ok(entry),
            None => self.lfn(path).await,
        }
    }

    /// Persist an entry built from a placeholder. Missing parent
    /// directories are created with the entry's ownership. A duplicate
    /// path reports `AlreadyExists`.
    pub async fn insert(&self, entry: &Lfn) -> CatalogueResult<Lfn> {
        let host = self.hosts.host(entry.mount.host_index).await?;
        let rel = entry.relative()?;
        if rel.is_empty() {
            return Err(CatalogueError::AlreadyExists(format!(
                "{} is a mount point",
                entry.path
            )));
        }

        let parent_id = self.ensure_parent_row(&host, entry).await?;

        let sql = format!(
            "INSERT INTO {} \
             (parent_id, lfn, owner, gowner, perm, size, kind, guid, guid_time, checksum, ctime, expires_at, job_id) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            entry.mount.lfn_table()
        );
        let result = sqlx::query(&sql)
            .bind(parent_id)
            .bind(rel)
            .bind(&entry.owner)
            .bind(&entry.gowner)
            .bind(entry.perm.to_string())
            .bind(entry.size)
            .bind(entry.kind.as_char().to_string())
            .bind(entry.guid.map(|g| g.as_bytes().to_vec()))
            .bind(entry.guid_time)
            .bind(&entry.checksum)
            .bind(entry.ctime)
            .bind(entry.expires_at)
            .bind(entry.job_id)
            .execute(host.pool())
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    CatalogueError::AlreadyExists(entry.path.to_string())
                } else {
                    CatalogueError::ShardUnavailable(e)
                }
            })?;

        let mut persisted = entry.clone();
        persisted.exists = true;
        persisted.entry_id = Some(result.last_insert_rowid());
        persisted.parent_id = Some(parent_id);

        // Best-effort reference row on the identity's shard; the cleanup
        // queues repair the link if this is lost.
        if let Some(guid) = entry.guid {
            if let Ok(Some(record)) = self.guids.get(guid).await {
                if let Err(e) = self.guids.record_reference(&record, &entry.path).await {
                    tracing::warn!(path = %entry.path, error = %e, "failed to record identity reference");
                }
            }
        }

        Ok(persisted)
    }

    /// Create an empty, identity-less file entry, or refresh the creation
    /// time of an existing one.
    pub async fn touch(&self, user: &Principal, path: &LogicalPath) -> CatalogueResult<Lfn> {
        let entry = self.lfn(path).await?;

        if entry.exists {
            if !self.authz.can_write(&entry, user) {
                return Err(CatalogueError::AccessDenied(format!(
                    "{} may not write {path}",
                    user.account()
                )));
            }
            let host = self.hosts.host(entry.mount.host_index).await?;
            let sql = format!(
                "UPDATE {} SET ctime = ? WHERE entry_id = ?",
                entry.mount.lfn_table()
            );
            sqlx::query(&sql)
                .bind(self.clock.now())
                .bind(entry.entry_id)
                .execute(host.pool())
                .await?;
            return self.lfn(path).await;
        }

        let anchor = self
            .nearest_existing(path)
            .await?
            .ok_or_else(|| CatalogueError::NotFound(format!("no mount covers {path}")))?;
        if !self.authz.can_write(&anchor, user) {
            return Err(CatalogueError::AccessDenied(format!(
                "{} may not write under {}",
                user.account(),
                anchor.path
            )));
        }

        let mut file = entry;
        file.owner = user.account().to_string();
        file.gowner = user.default_group().to_string();
        file.kind = EntryKind::File;
        self.insert(&file).await
    }

    /// Change ownership. Owner-only.
    pub async fn chown(
        &self,
        user: &Principal,
        path: &LogicalPath,
        owner: &str,
        group: Option<&str>,
    ) -> CatalogueResult<()> {
        let entry = self.require(path).await?;
        if !self.authz.is_owner(&entry, user) {
            return Err(CatalogueError::AccessDenied(format!(
                "{} does not own {path}",
                user.account()
            )));
        }

        let host = self.hosts.host(entry.mount.host_index).await?;
        let sql = format!(
            "UPDATE {} SET owner = ?, gowner = ? WHERE entry_id = ?",
            entry.mount.lfn_table()
        );
        sqlx::query(&sql)
            .bind(owner)
            .bind(group.unwrap_or(owner))
            .bind(entry.entry_id)
            .execute(host.pool())
            .await?;
        Ok(())
    }

    /// Change permission bits. Owner-only.
    pub async fn chmod(
        &self,
        user: &Principal,
        path: &LogicalPath,
        perm: Permissions,
    ) -> CatalogueResult<()> {
        let entry = self.require(path).await?;
        if !self.authz.is_owner(&entry, user) {
            return Err(CatalogueError::AccessDenied(format!(
                "{} does not own {path}",
                user.account()
            )));
        }

        let host = self.hosts.host(entry.mount.host_index).await?;
        let sql = format!(
            "UPDATE {} SET perm = ? WHERE entry_id = ?",
            entry.mount.lfn_table()
        );
        sqlx::query(&sql)
            .bind(perm.to_string())
            .bind(entry.entry_id)
            .execute(host.pool())
            .await?;
        Ok(())
    }

    /// Set the expiry timestamp. Zero rows affected (entry vanished) is a
    /// benign no-op reported as `false`.
    pub async fn set_expire_time(
        &self,
        path: &LogicalPath,
        when: OffsetDateTime,
    ) -> CatalogueResult<bool> {
        let mount = self
            .mounts
            .resolve(path)
            .await?
            .ok_or_else(|| CatalogueError::NotFound(format!("no mount covers {path}")))?;
        let host = self.hosts.host(mount.host_index).await?;
        let rel = mount
            .relative_path(path)
            .ok_or_else(|| CatalogueError::Internal(format!("bad mount match for {path}")))?;

        let sql = format!(
            "UPDATE {} SET expires_at = ? WHERE lfn = ?",
            mount.lfn_table()
        );
        let result = sqlx::query(&sql)
            .bind(when)
            .bind(rel)
            .execute(host.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove an entry. Directories require `recursive` unless empty; with
    /// `purge`, every removed file's identity is queued for physical
    /// reclamation. Returns `false` when nothing existed.
    pub async fn rm(
        &self,
        user: &Principal,
        path: &LogicalPath,
        recursive: bool,
        purge: bool,
    ) -> CatalogueResult<bool> {
        let entry = self.lfn(path).await?;
        if !entry.exists {
            return Ok(false);
        }
        if entry
            .relative()
            .map(|rel| rel.is_empty())
            .unwrap_or(false)
        {
            return Err(CatalogueError::InvalidArgument(format!(
                "{path} is a mount point"
            )));
        }

        let parent = path
            .parent()
            .ok_or_else(|| CatalogueError::InvalidArgument("cannot remove /".to_string()))?;
        let parent_entry = self
            .nearest_existing(&parent)
            .await?
            .ok_or_else(|| CatalogueError::NotFound(parent.to_string()))?;
        if !self.authz.can_write(&parent_entry, user) {
            return Err(CatalogueError::AccessDenied(format!(
                "{} may not write under {}",
                user.account(),
                parent_entry.path
            )));
        }

        if entry.is_directory() {
            if !recursive && !self.list(path).await?.is_empty() {
                return Err(CatalogueError::InvalidArgument(format!(
                    "{path} is a non-empty directory"
                )));
            }
            for mount in self.mounts.resolve_all_under(path).await? {
                self.delete_subtree(&mount, path, purge).await?;
            }
        } else {
            self.delete_subtree(&entry.mount, path, purge).await?;
        }
        Ok(true)
    }

    /// Rename an entry (recursively for directories). Same-shard moves are
    /// in-place row updates; cross-shard moves re-insert under the target
    /// and delete the source, then force a mount-cache refresh.
    pub async fn mv(
        &self,
        user: &Principal,
        from: &LogicalPath,
        to: &LogicalPath,
    ) -> CatalogueResult<Lfn> {
        let source = self.require(from).await?;
        if to.starts_with(from) && to != from {
            return Err(CatalogueError::InvalidArgument(format!(
                "cannot move {from} inside itself"
            )));
        }
        let target = self.lfn(to).await?;
        if target.exists {
            return Err(CatalogueError::AlreadyExists(to.to_string()));
        }

        let to_parent = to
            .parent()
            .ok_or_else(|| CatalogueError::InvalidArgument("cannot move onto /".to_string()))?;
        let target_parent = self.require(&to_parent).await?;
        if !target_parent.is_directory() {
            return Err(CatalogueError::InvalidArgument(format!(
                "{to_parent} is not a directory"
            )));
        }

        let from_parent = from
            .parent()
            .ok_or_else(|| CatalogueError::InvalidArgument("cannot move /".to_string()))?;
        let source_parent = self
            .nearest_existing(&from_parent)
            .await?
            .ok_or_else(|| CatalogueError::NotFound(from_parent.to_string()))?;
        for anchor in [&source_parent, &target_parent] {
            if !self.authz.can_write(anchor, user) {
                return Err(CatalogueError::AccessDenied(format!(
                    "{} may not write under {}",
                    user.account(),
                    anchor.path
                )));
            }
        }

        if source.mount == target.mount {
            self.mv_same_shard(&source, &target).await?;
        } else {
            self.mv_cross_shard(&source, to).await?;
            self.mounts.invalidate();
        }

        self.require(to).await
    }

    async fn mv_same_shard(&self, source: &Lfn, target: &Lfn) -> CatalogueResult<()> {
        let host = self.hosts.host(source.mount.host_index).await?;
        let old_rel = source.relative()?.to_string();
        let new_rel = target.relative()?.to_string();
        let parent_id = self.ensure_parent_row(&host, target).await?;

        let table = source.mount.lfn_table();
        let sql = format!("UPDATE {table} SET lfn = ?, parent_id = ? WHERE entry_id = ?");
        sqlx::query(&sql)
            .bind(&new_rel)
            .bind(parent_id)
            .bind(source.entry_id)
            .execute(host.pool())
            .await?;

        if source.is_directory() {
            let children = format!(
                "UPDATE {table} SET lfn = ? || substr(lfn, ?) WHERE lfn LIKE ? ESCAPE '\\'"
            );
            sqlx::query(&children)
                .bind(&new_rel)
                .bind(old_rel.len() as i64 + 1)
                .bind(format!("{}/%", like_escape(&old_rel)))
                .execute(host.pool())
                .await?;
        }
        Ok(())
    }

    async fn mv_cross_shard(&self, source: &Lfn, to: &LogicalPath) -> CatalogueResult<()> {
        let mut rows = Vec::new();
        for mount in self.mounts.resolve_all_under(&source.path).await? {
            let host = self.hosts.host(mount.host_index).await?;
            for row in self.subtree_rows(&host, &mount, &source.path).await? {
                let path = child_path(&mount, &row.lfn)?;
                rows.push((path, mount.clone(), row));
            }
        }

        // Parents first, so re-inserted children can link to them.
        rows.sort_by_key(|(path, _, _)| path.as_str().len());

        for (old_path, _, row) in &rows {
            let suffix = old_path
                .strip_mount_prefix(&source.path.dir_form())
                .unwrap_or("");
            let new_path = if suffix.is_empty() {
                to.clone()
            } else {
                LogicalPath::parse(&format!("{to}/{suffix}"))?
            };

            let mut entry = self.lfn(&new_path).await?;
            if entry.exists {
                return Err(CatalogueError::AlreadyExists(new_path.to_string()));
            }
            entry.owner = row.owner.clone();
            entry.gowner = row.gowner.clone();
            entry.perm = Permissions::parse(&row.perm)?;
            entry.size = row.size;
            entry.kind = row
                .kind
                .chars()
                .next()
                .map(EntryKind::from_char)
                .transpose()?
                .unwrap_or(EntryKind::File);
            entry.guid = row.guid()?;
            entry.guid_time = row.guid_time;
            entry.checksum = row.checksum.clone();
            entry.ctime = row.ctime;
            entry.expires_at = row.expires_at;
            entry.job_id = row.job_id;
            self.insert(&entry).await?;
        }

        for mount in self.mounts.resolve_all_under(&source.path).await? {
            self.delete_subtree(&mount, &source.path, false).await?;
        }
        Ok(())
    }

    async fn require(&self, path: &LogicalPath) -> CatalogueResult<Lfn> {
        let entry = self.lfn(path).await?;
        if entry.exists {
            Ok(entry)
        } else {
            Err(CatalogueError::NotFound(path.to_string()))
        }
    }

    async fn delete_subtree(
        &self,
        mount: &MountEntry,
        path: &LogicalPath,
        purge: bool,
    ) -> CatalogueResult<()> {
        let host = self.hosts.host(mount.host_index).await?;
        let rows = self.subtree_rows(&host, mount, path).await?;
        if rows.is_empty() {
            return Ok(());
        }

        for row in &rows {
            let Some(guid) = row.guid()? else { continue };
            let full_path = child_path(mount, &row.lfn)?;
            match self.guids.get(guid).await {
                Ok(Some(record)) => {
                    if let Err(e) = self.guids.remove_reference(&record, &full_path).await {
                        tracing::warn!(path = %full_path, error = %e, "failed to drop identity reference");
                    }
                    if purge {
                        self.guids
                            .queue_namespace_purge(guid, row.size, row.checksum.as_deref())
                            .await?;
                    }
                }
                Ok(None) => {
                    if purge {
                        self.guids
                            .queue_namespace_purge(guid, row.size, row.checksum.as_deref())
                            .await?;
                    }
                }
                Err(e) => {
                    tracing::warn!(path = %full_path, error = %e, "identity lookup failed during delete");
                }
            }
        }

        let table = mount.lfn_table();
        match mount.relative_path(path) {
            Some("") | None => {
                let sql = format!("DELETE FROM {table}");
                sqlx::query(&sql).execute(host.pool()).await?;
            }
            Some(rel) => {
                let sql =
                    format!("DELETE FROM {table} WHERE lfn = ? OR lfn LIKE ? ESCAPE '\\'");
                sqlx::query(&sql)
                    .bind(rel)
                    .bind(format!("{}/%", like_escape(rel)))
                    .execute(host.pool())
                    .await?;
            }
        }
        Ok(())
    }

    async fn subtree_rows(
        &self,
        host: &Host,
        mount: &MountEntry,
        path: &LogicalPath,
    ) -> CatalogueResult<Vec<LfnRow>> {
        let table = mount.lfn_table();
        let rows = match mount.relative_path(path) {
            Some("") | None => {
                let sql = format!("SELECT * FROM {table}");
                sqlx::query_as::<_, LfnRow>(&sql).fetch_all(host.pool()).await?
            }
            Some(rel) => {
                let sql = format!(
                    "SELECT * FROM {table} WHERE lfn = ? OR lfn LIKE ? ESCAPE '\\'"
                );
                sqlx::query_as::<_, LfnRow>(&sql)
                    .bind(rel)
                    .bind(format!("{}/%", like_escape(rel)))
                    .fetch_all(host.pool())
                    .await?
            }
        };
        Ok(rows)
    }

    async fn ensure_parent_row(&self, host: &Host, entry: &Lfn) -> CatalogueResult<i64> {
        let rel = entry.relative()?;
        let parent_rel = parent_of_rel(rel);

        if let Some(row) = self.fetch_row(host, &entry.mount, parent_rel).await? {
            if row.kind != "d" {
                return Err(CatalogueError::InvalidArgument(format!(
                    "parent of {} is not a directory",
                    entry.path
                )));
            }
            return Ok(row.entry_id);
        }

        if parent_rel.is_empty() {
            return Err(CatalogueError::NotFound(format!(
                "mount point row missing for {}",
                entry.mount.path_prefix
            )));
        }

        // Build the missing parent chain top-down, stamped like the entry.
        let mut parent_id: Option<i64> = None;
        let mut assembled = String::new();
        for segment in parent_rel.split('/') {
            if !assembled.is_empty() {
                assembled.push('/');
            }
            assembled.push_str(segment);

            match self.fetch_row(host, &entry.mount, &assembled).await? {
                Some(row) => parent_id = Some(row.entry_id),
                None => {
                    let grandparent = match parent_id {
                        Some(id) => Some(id),
                        None => self
                            .fetch_row(host, &entry.mount, "")
                            .await?
                            .map(|r| r.entry_id),
                    };
                    let sql = format!(
                        "INSERT INTO {} (parent_id, lfn, owner, gowner, perm, kind, ctime) \
                         VALUES (?, ?, ?, ?, '755', 'd', ?)",
                        entry.mount.lfn_table()
                    );
                    let result = sqlx::query(&sql)
                        .bind(grandparent)
                        .bind(&assembled)
                        .bind(&entry.owner)
                        .bind(&entry.gowner)
                        .bind(entry.ctime)
                        .execute(host.pool())
                        .await?;
                    parent_id = Some(result.last_insert_rowid());
                }
            }
        }

        parent_id.ok_or_else(|| {
            CatalogueError::Internal(format!("could not build parent chain for {}", entry.path))
        })
    }

    async fn fetch_row(
        &self,
        host: &Host,
        mount: &MountEntry,
        rel: &str,
    ) -> CatalogueResult<Option<LfnRow>> {
        let sql = format!("SELECT * FROM {} WHERE lfn = ?", mount.lfn_table());
        let row = sqlx::query_as::<_, LfnRow>(&sql)
            .bind(rel)
            .fetch_optional(host.pool())
            .await?;
        Ok(row)
    }

    fn placeholder(&self, path: LogicalPath, mount: MountEntry) -> Lfn {
        Lfn {
            path,
            exists: false,
            entry_id: None,
            parent_id: None,
            owner: String::new(),
            gowner: String::new(),
            perm: Permissions::DEFAULT,
            size: 0,
            kind: EntryKind::File,
            guid: None,
            guid_time: None,
            checksum: None,
            ctime: self.clock.now(),
            expires_at: None,
            job_id: None,
            mount,
        }
    }

    fn entry_from_row(
        path: LogicalPath,
        mount: MountEntry,
        row: LfnRow,
    ) -> CatalogueResult<Lfn> {
        let guid = row.guid()?;
        let kind = row
            .kind
            .chars()
            .next()
            .map(EntryKind::from_char)
            .transpose()?
            .unwrap_or(EntryKind::File);
        Ok(Lfn {
            path,
            exists: true,
            entry_id: Some(row.entry_id),
            parent_id: row.parent_id,
            owner: row.owner,
            gowner: row.gowner,
            perm: Permissions::parse(&row.perm)?,
            size: row.size,
            kind,
            guid,
            guid_time: row.guid_time,
            checksum: row.checksum,
            ctime: row.ctime,
            expires_at: row.expires_at,
            job_id: row.job_id,
            mount,
        })
    }
}

fn child_path(mount: &MountEntry, rel: &str) -> CatalogueResult<LogicalPath> {
    let joined = if rel.is_empty() {
        mount.path_prefix.clone()
    } else {
        format!("{}{}", mount.path_prefix, rel)
    };
    Ok(LogicalPath::parse(&joined)?)
}

fn parent_of_rel(rel: &str) -> &str {
    match rel.rfind('/') {
        Some(idx) => &rel[..idx],
        None => "",
    }
}

fn like_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .is_some_and(|d| d.is_unique_violation())
}
