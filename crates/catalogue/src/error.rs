//! Catalogue error types.

use thiserror::Error;

/// Catalogue operation errors.
///
/// Deterministic failures (authorization, quota, content conflicts,
/// duplicate replicas, lease conflicts) are surfaced to the caller and are
/// never retried internally. `ShardUnavailable` wraps transient database
/// failures; whether it propagates depends on the operation (direct
/// reads/writes surface it, cache refreshes degrade to stale data instead).
#[derive(Debug, Error)]
pub enum CatalogueError {
    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("quota exceeded for {owner}: {files} file(s), {bytes} byte(s) requested")]
    QuotaExceeded { owner: String, files: u64, bytes: u64 },

    #[error("conflicting content: {0}")]
    ConflictingContent(String),

    #[error("a replica already exists on storage element {se}")]
    DuplicateReplica { se: String },

    #[error("an active booking for this location is held by {owner}")]
    LeaseConflict { owner: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("shard unavailable: {0}")]
    ShardUnavailable(#[from] sqlx::Error),

    #[error(transparent)]
    Domain(#[from] tessella_core::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for catalogue operations.
pub type CatalogueResult<T> = std::result::Result<T, CatalogueError>;
