//! The polymorphic catalogue-backend seam.
//!
//! Read-only variants (columnar, filesystem snapshots) can stand in for the
//! sharded-SQL engine behind this trait; the engine in this crate is the
//! primary implementation.

use crate::error::CatalogueResult;
use crate::guids::Replica;
use crate::lfns::Lfn;
use crate::Catalogue;
use async_trait::async_trait;
use tessella_core::{Guid, LogicalPath, Principal};

/// The operations every catalogue backend supports.
#[async_trait]
pub trait CatalogueBackend: Send + Sync {
    /// Resolve a path to its entry, if present.
    async fn resolve(&self, path: &LogicalPath) -> CatalogueResult<Option<Lfn>>;

    /// List the children of a directory.
    async fn list(&self, path: &LogicalPath) -> CatalogueResult<Vec<Lfn>>;

    /// The replicas backing an identity.
    async fn replicas_of(&self, guid: Guid) -> CatalogueResult<Vec<Replica>>;

    /// Persist a namespace entry.
    async fn insert(&self, entry: &Lfn) -> CatalogueResult<Lfn>;

    /// Remove a namespace entry.
    async fn delete(
        &self,
        user: &Principal,
        path: &LogicalPath,
        recursive: bool,
        purge: bool,
    ) -> CatalogueResult<bool>;
}

#[async_trait]
impl CatalogueBackend for Catalogue {
    async fn resolve(&self, path: &LogicalPath) -> CatalogueResult<Option<Lfn>> {
        let entry = self.lfns().lfn(path).await?;
        Ok(entry.exists.then_some(entry))
    }

    async fn list(&self, path: &LogicalPath) -> CatalogueResult<Vec<Lfn>> {
        self.lfns().list(path).await
    }

    async fn replicas_of(&self, guid: Guid) -> CatalogueResult<Vec<Replica>> {
        match self.guids().get(guid).await? {
            Some(record) => self.guids().replicas(&record).await,
            None => Ok(Vec::new()),
        }
    }

    async fn insert(&self, entry: &Lfn) -> CatalogueResult<Lfn> {
        self.lfns().insert(entry).await
    }

    async fn delete(
        &self,
        user: &Principal,
        path: &LogicalPath,
        recursive: bool,
        purge: bool,
    ) -> CatalogueResult<bool> {
        self.lfns().rm(user, path, recursive, purge).await
    }
}
