//! Quota collaborator: consulted only when a booking would create a
//! brand-new identity. Extra replicas of existing identities are exempt.

use async_trait::async_trait;

/// Upload quota decisions per owner.
#[async_trait]
pub trait QuotaPolicy: Send + Sync {
    /// Whether `owner` may add `files` new file(s) totalling `bytes`.
    async fn can_upload(&self, owner: &str, files: u64, bytes: u64) -> bool;
}

/// The permissive default: no quota enforcement.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unlimited;

#[async_trait]
impl QuotaPolicy for Unlimited {
    async fn can_upload(&self, _owner: &str, _files: u64, _bytes: u64) -> bool {
        true
    }
}

/// A fixed per-owner ceiling, mostly useful in tests and small deployments.
#[derive(Debug, Clone, Copy)]
pub struct FixedQuota {
    pub max_files: u64,
    pub max_bytes: u64,
}

#[async_trait]
impl QuotaPolicy for FixedQuota {
    async fn can_upload(&self, _owner: &str, files: u64, bytes: u64) -> bool {
        files <= self.max_files && bytes <= self.max_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixed_quota_bounds() {
        let quota = FixedQuota {
            max_files: 10,
            max_bytes: 1_000,
        };
        assert!(quota.can_upload("alice", 1, 500).await);
        assert!(!quota.can_upload("alice", 1, 1_001).await);
        assert!(!quota.can_upload("alice", 11, 0).await);
        assert!(Unlimited.can_upload("alice", u64::MAX, u64::MAX).await);
    }
}
