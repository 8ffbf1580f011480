//! Audit log entries for administrative actions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Grant,
    Cancel,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
            AuditAction::Grant => "grant",
            AuditAction::Cancel => "cancel",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResource {
    User,
    Project,
    Plot,
    Booking,
    Sale,
    Payment,
    Subscription,
    SubscriptionPlan,
    Assignment,
}

impl AuditResource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditResource::User => "user",
            AuditResource::Project => "project",
            AuditResource::Plot => "plot",
            AuditResource::Booking => "booking",
            AuditResource::Sale => "sale",
            AuditResource::Payment => "payment",
            AuditResource::Subscription => "subscription",
            AuditResource::SubscriptionPlan => "subscription_plan",
            AuditResource::Assignment => "assignment",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditEntry {
    pub audit_id: i64,
    pub actor_id: Option<i64>,
    pub actor_name: String,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<i64>,
    pub description: String,
    pub changes: serde_json::Value,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateAuditEntry {
    pub actor_id: Option<i64>,
    pub actor_name: String,
    pub action: AuditAction,
    pub resource_type: AuditResource,
    pub resource_id: Option<i64>,
    pub description: String,
    pub changes: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct ListAuditFilter {
    pub resource_type: Option<String>,
    pub limit: i64,
}

impl Default for ListAuditFilter {
    fn default() -> Self {
        Self {
            resource_type: None,
            limit: 100,
        }
    }
}
