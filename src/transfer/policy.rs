//! Authorization rules for artifacts, kept in one place so they can be
//! tightened without touching the service.
use crate::types::{ArtifactRecord, Principal};

/// Owners may read their own artifacts. Artifacts received from external
/// senders belong to the uploads sentinel and are readable by admins only.
pub fn can_read(record: &ArtifactRecord, principal: &Principal) -> bool {
    if record.is_external() {
        return principal.is_admin();
    }
    record.owner_principal == principal.id
}

/// Any admin may delete any artifact, not only the one who uploaded it.
pub fn can_delete(_record: &ArtifactRecord, actor: &Principal) -> bool {
    actor.is_admin()
}

/// Only admins may upload artifacts on behalf of other principals.
pub fn can_upload(actor: &Principal) -> bool {
    actor.is_admin()
}

/// Only admins see the listing across all owners and the external inbox.
pub fn can_list_all(actor: &Principal) -> bool {
    actor.is_admin()
}
