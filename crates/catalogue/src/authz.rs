//! Authorization collaborator: boolean checks over catalogue entities.
//!
//! The engine only ever asks these three questions; policy lives behind the
//! trait so deployments can swap in richer ACL evaluation.

use tessella_core::{CatalogEntity, Principal};

/// Access decisions over catalogue entities. Implementations must be pure:
/// no side effects are assumed by callers.
pub trait AccessPolicy: Send + Sync {
    fn can_read(&self, entity: &dyn CatalogEntity, who: &Principal) -> bool;
    fn can_write(&self, entity: &dyn CatalogEntity, who: &Principal) -> bool;
    fn is_owner(&self, entity: &dyn CatalogEntity, who: &Principal) -> bool;
}

/// The default policy: owner/group/other permission bits, with role
/// membership standing in for group membership.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixPermissions;

impl UnixPermissions {
    fn in_group(entity: &dyn CatalogEntity, who: &Principal) -> bool {
        who.roles().iter().any(|r| r == entity.group())
    }
}

impl AccessPolicy for UnixPermissions {
    fn can_read(&self, entity: &dyn CatalogEntity, who: &Principal) -> bool {
        let perm = entity.permissions();
        if self.is_owner(entity, who) && perm.owner_can_read() {
            return true;
        }
        if Self::in_group(entity, who) && perm.group_can_read() {
            return true;
        }
        perm.other_can_read()
    }

    fn can_write(&self, entity: &dyn CatalogEntity, who: &Principal) -> bool {
        let perm = entity.permissions();
        if self.is_owner(entity, who) && perm.owner_can_write() {
            return true;
        }
        if Self::in_group(entity, who) && perm.group_can_write() {
            return true;
        }
        perm.other_can_write()
    }

    fn is_owner(&self, entity: &dyn CatalogEntity, who: &Principal) -> bool {
        who.can_become(entity.owner())
    }
}
