//! Audit log listing.

use axum::{
    extract::{Query, State},
    Json,
};
use service_core::error::AppError;

use crate::dtos::AuditQuery;
use crate::middleware::Caller;
use crate::models::{AuditEntry, ListAuditFilter};
use crate::services::store::AccountStore;
use crate::startup::AppState;

/// GET /admin/audit-logs
///
/// Newest first.
pub async fn list_audit_logs(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Vec<AuditEntry>>, AppError> {
    caller.require_super_admin()?;

    let entries = state
        .store
        .list_audit(&ListAuditFilter {
            resource_type: query.resource_type.filter(|r| !r.is_empty()),
            limit: query.limit.clamp(1, 500),
        })
        .await?;

    Ok(Json(entries))
}
