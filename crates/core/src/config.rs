//! Configuration types shared across crates.

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level catalogue configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CatalogueConfig {
    /// The directory database holding hosts, mounts, shards and bookings.
    pub router: RouterConfig,
    /// Resolver cache behavior.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Write-booking leases and retention.
    #[serde(default)]
    pub booking: BookingConfig,
    /// Deferred cleanup queue behavior.
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

impl CatalogueConfig {
    /// Load configuration from a TOML file, with `TESSELLA_*` environment
    /// variables overriding individual keys (e.g. `TESSELLA_CACHE__TTL_SECS`).
    pub fn load(path: impl AsRef<Path>) -> crate::Result<Self> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("TESSELLA_").split("__"))
            .extract()
            .map_err(|e| crate::Error::Config(e.to_string()))
    }
}

/// Location of the directory database.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Path to the router's SQLite database file.
    pub path: PathBuf,
    /// Directory under which shard database files live. Host addresses are
    /// resolved relative to this directory.
    pub shard_root: PathBuf,
}

/// Resolver cache tuning (mount table and identity time shards).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// How long a loaded cache stays fresh without a reload.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Minimum spacing between staleness-probe reads of the update row.
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            probe_interval_secs: default_probe_interval_secs(),
        }
    }
}

/// Write-booking protocol tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BookingConfig {
    /// Lease granted to a fresh reservation.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
    /// How far in the past a rejected booking is tombstoned before routine
    /// cleanup sweeps it.
    #[serde(default = "default_tombstone_secs")]
    pub tombstone_secs: u64,
    /// Expiry extension granted to namespace entries registered from job
    /// outputs.
    #[serde(default = "default_output_retention_secs")]
    pub output_retention_secs: u64,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            lease_secs: default_lease_secs(),
            tombstone_secs: default_tombstone_secs(),
            output_retention_secs: default_output_retention_secs(),
        }
    }
}

/// Deferred cleanup queue tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Maximum pending deletions per `(host, table)` queue; overflow is
    /// dropped with a warning.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Drainer wake-up interval when idle.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Consecutive idle iterations before a drainer retires itself.
    #[serde(default = "default_max_idle_iterations")]
    pub max_idle_iterations: u32,
    /// Maximum number of values in one SQL `IN (...)` list; larger batches
    /// are chunked.
    #[serde(default = "default_max_in_list")]
    pub max_in_list: usize,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            poll_interval_ms: default_poll_interval_ms(),
            max_idle_iterations: default_max_idle_iterations(),
            max_in_list: default_max_in_list(),
        }
    }
}

fn default_ttl_secs() -> u64 {
    300 // 5 minutes
}

fn default_probe_interval_secs() -> u64 {
    5
}

fn default_lease_secs() -> u64 {
    86400 // 24 hours
}

fn default_tombstone_secs() -> u64 {
    30 * 86400
}

fn default_output_retention_secs() -> u64 {
    14 * 86400
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_idle_iterations() -> u32 {
    30
}

fn default_max_in_list() -> usize {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = CatalogueConfig::default();
        assert_eq!(config.cache.ttl_secs, 300);
        assert_eq!(config.cache.probe_interval_secs, 5);
        assert_eq!(config.booking.lease_secs, 86400);
        assert_eq!(config.booking.output_retention_secs, 14 * 86400);
        assert_eq!(config.cleanup.max_idle_iterations, 30);
    }

    #[test]
    fn load_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tessella.toml");
        std::fs::write(
            &path,
            r#"
[router]
path = "/var/lib/tessella/router.db"
shard_root = "/var/lib/tessella/shards"

[cache]
ttl_secs = 60
"#,
        )
        .unwrap();

        let config = CatalogueConfig::load(&path).unwrap();
        assert_eq!(config.cache.ttl_secs, 60);
        assert_eq!(config.cache.probe_interval_secs, 5);
        assert_eq!(
            config.router.path,
            PathBuf::from("/var/lib/tessella/router.db")
        );
    }
}
