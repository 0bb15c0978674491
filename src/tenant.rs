use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity scope for every engine call, supplied by the caller's
/// authentication layer. All queries filter on `organization_id`;
/// references that resolve to another organization's rows surface as
/// not-found rather than leaking their existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantContext {
    pub organization_id: Uuid,
    /// User or system principal recorded on ledger entries.
    pub actor_id: Uuid,
}

impl TenantContext {
    pub fn new(organization_id: Uuid, actor_id: Uuid) -> Self {
        Self {
            organization_id,
            actor_id,
        }
    }
}
