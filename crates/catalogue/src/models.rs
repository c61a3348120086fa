//! Database models mapping to the catalogue schema.

use crate::error::{CatalogueError, CatalogueResult};
use sqlx::FromRow;
use tessella_core::Guid;
use time::OffsetDateTime;
use uuid::Uuid;

/// A `(host, table)` pair: where a namespace or identity row lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShardTableRef {
    pub host_index: i64,
    pub table_id: i64,
}

impl ShardTableRef {
    /// Namespace table name on the shard.
    pub fn lfn_table(&self) -> String {
        format!("l{}", self.table_id)
    }

    /// Identity table name on the shard.
    pub fn guid_table(&self) -> String {
        format!("g{}", self.table_id)
    }

    /// Replica-row table name on the shard.
    pub fn replica_table(&self) -> String {
        format!("g{}_pfn", self.table_id)
    }

    /// Reference-row table name on the shard.
    pub fn ref_table(&self) -> String {
        format!("g{}_ref", self.table_id)
    }
}

// =============================================================================
// Directory database rows
// =============================================================================

/// One backing database shard.
#[derive(Debug, Clone, FromRow)]
pub struct HostRow {
    pub host_index: i64,
    pub address: String,
    pub db_name: String,
    pub driver: String,
}

/// One mount entry: a namespace prefix mapped to a `(host, table)` pair.
#[derive(Debug, Clone, FromRow)]
pub struct MountRow {
    pub mount_id: i64,
    pub host_index: i64,
    pub table_id: i64,
    /// Always `/`-terminated.
    pub path_prefix: String,
}

/// One identity time-shard entry: a half-open index-time range starting at
/// `guid_time`, mapped to a `(host, table)` pair.
#[derive(Debug, Clone, FromRow)]
pub struct TimeShardRow {
    pub shard_id: i64,
    pub host_index: i64,
    pub table_id: i64,
    pub guid_time: i64,
}

/// Storage element directory entry with aggregate usage counters.
#[derive(Debug, Clone, FromRow)]
pub struct SeRow {
    pub se_number: i64,
    pub se_name: String,
    pub storage_prefix: String,
    pub writable: bool,
    /// Whether replicas on this element occupy real storage. Placeholder
    /// elements (archive members, zero-cost locations) are not physical and
    /// never produce purge records.
    pub physical: bool,
    /// JSON list of QoS tags.
    pub qos: String,
    pub used_files: i64,
    pub used_bytes: i64,
}

/// A reservation in the booking table. `expires_at` is a signed Unix
/// timestamp: positive for an active lease, negative for a tombstone.
#[derive(Debug, Clone, FromRow)]
pub struct BookingRow {
    /// Absolute namespace path, or the empty string for a replica-only
    /// booking with no namespace target.
    pub lfn: String,
    pub owner: String,
    pub gowner: String,
    pub expires_at: i64,
    pub size: i64,
    pub checksum: Option<String>,
    pub pfn: String,
    pub se_name: String,
    pub guid: Vec<u8>,
    pub job_id: Option<i64>,
    pub retain: bool,
}

impl BookingRow {
    pub fn guid(&self) -> CatalogueResult<Guid> {
        decode_guid(&self.guid)
    }
}

/// A pending physical purge handed to the transfer layer.
#[derive(Debug, Clone, FromRow)]
pub struct OrphanPfnRow {
    pub guid: Vec<u8>,
    /// `None` means "all replicas of this identity".
    pub se_number: Option<i64>,
    pub checksum: Option<String>,
    pub size: Option<i64>,
    /// `None` when the replica sits at the element's generated default
    /// location, which the transfer layer can recompute.
    pub pfn: Option<String>,
}

// =============================================================================
// Shard table rows
// =============================================================================

/// One namespace entry row. `lfn` is relative to the mount prefix; the
/// mount point itself is stored as the empty string.
#[derive(Debug, Clone, FromRow)]
pub struct LfnRow {
    pub entry_id: i64,
    pub parent_id: Option<i64>,
    pub lfn: String,
    pub owner: String,
    pub gowner: String,
    pub perm: String,
    pub size: i64,
    pub kind: String,
    pub guid: Option<Vec<u8>>,
    pub guid_time: Option<i64>,
    pub checksum: Option<String>,
    pub ctime: OffsetDateTime,
    pub expires_at: Option<OffsetDateTime>,
    pub job_id: Option<i64>,
}

impl LfnRow {
    pub fn guid(&self) -> CatalogueResult<Option<Guid>> {
        self.guid.as_deref().map(decode_guid_slice).transpose()
    }
}

/// One identity row.
#[derive(Debug, Clone, FromRow)]
pub struct GuidRow {
    pub guid_id: i64,
    pub guid: Vec<u8>,
    pub owner: String,
    pub gowner: String,
    pub perm: String,
    pub size: i64,
    pub checksum: Option<String>,
    pub kind: String,
    /// Comma-encoded storage-element membership set.
    pub se_list: String,
    pub ctime: OffsetDateTime,
    pub expires_at: Option<OffsetDateTime>,
}

impl GuidRow {
    pub fn guid(&self) -> CatalogueResult<Guid> {
        decode_guid(&self.guid)
    }

    pub fn se_numbers(&self) -> Vec<i64> {
        decode_se_list(&self.se_list)
    }
}

/// One replica row: an identity bound to a storage element and a physical
/// location.
#[derive(Debug, Clone, FromRow)]
pub struct ReplicaRow {
    pub guid_id: i64,
    pub se_number: i64,
    pub pfn: String,
}

pub(crate) fn decode_guid(bytes: &[u8]) -> CatalogueResult<Guid> {
    decode_guid_slice(bytes)
}

fn decode_guid_slice(bytes: &[u8]) -> CatalogueResult<Guid> {
    Uuid::from_slice(bytes)
        .map(Guid::from_uuid)
        .map_err(|e| CatalogueError::Internal(format!("malformed identity column: {e}")))
}

pub(crate) fn decode_se_list(s: &str) -> Vec<i64> {
    s.split(',')
        .filter(|p| !p.is_empty())
        .filter_map(|p| p.trim().parse().ok())
        .collect()
}

pub(crate) fn encode_se_list(numbers: &[i64]) -> String {
    numbers
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_table_names() {
        let shard = ShardTableRef {
            host_index: 2,
            table_id: 7,
        };
        assert_eq!(shard.lfn_table(), "l7");
        assert_eq!(shard.guid_table(), "g7");
        assert_eq!(shard.replica_table(), "g7_pfn");
        assert_eq!(shard.ref_table(), "g7_ref");
    }

    #[test]
    fn se_list_roundtrip() {
        assert_eq!(decode_se_list(""), Vec::<i64>::new());
        assert_eq!(decode_se_list("3,17,5"), vec![3, 17, 5]);
        assert_eq!(encode_se_list(&[3, 17, 5]), "3,17,5");
    }

    #[test]
    fn guid_decoding_rejects_bad_lengths() {
        assert!(decode_guid(&[1, 2, 3]).is_err());
        let uuid = Uuid::from_u128(42);
        assert_eq!(
            decode_guid(uuid.as_bytes()).unwrap(),
            Guid::from_uuid(uuid)
        );
    }
}
