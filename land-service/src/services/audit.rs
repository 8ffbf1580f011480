//! Append-only trail of administrative mutations.

use crate::models::{AuditAction, AuditResource, CreateAuditEntry, User};
use crate::services::store::{AccountStore, Store};
use std::sync::Arc;

#[derive(Clone)]
pub struct AuditTrail {
    store: Arc<dyn Store>,
}

impl AuditTrail {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Record a mutation performed by `actor`. The mutation has already been
    /// committed, so a failed write is logged rather than surfaced.
    pub async fn record(
        &self,
        actor: Option<&User>,
        action: AuditAction,
        resource_type: AuditResource,
        resource_id: Option<i64>,
        description: impl Into<String>,
        changes: serde_json::Value,
    ) {
        let entry = CreateAuditEntry {
            actor_id: actor.map(|u| u.user_id),
            actor_name: actor
                .map(|u| u.full_name())
                .unwrap_or_else(|| "System".to_string()),
            action,
            resource_type,
            resource_id,
            description: description.into(),
            changes,
        };

        if let Err(e) = self.store.record_audit(&entry).await {
            tracing::warn!(
                error = %e,
                action = action.as_str(),
                resource_type = resource_type.as_str(),
                resource_id = ?resource_id,
                "Failed to write audit entry"
            );
        }
    }
}
