//! Caller identity extracted from request headers.
//!
//! The authenticating gateway sets `X-User-ID` after it has verified the end
//! user. The header is only trusted when the request signature is valid, so
//! the signature middleware must run before this extractor.

use crate::models::{Role, User};
use crate::services::{scope_for, EntityKind, Scope};
use crate::services::store::AccountStore;
use crate::startup::AppState;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;

pub const USER_ID_HEADER: &str = "X-User-ID";

/// The user making the request, loaded fresh from the store.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user: User,
    pub assigned_project_ids: Vec<i64>,
}

impl Caller {
    pub fn user_id(&self) -> i64 {
        self.user.user_id
    }

    pub fn role(&self) -> Role {
        self.user.role()
    }

    pub fn scope(&self, kind: EntityKind) -> Scope {
        scope_for(&self.user, &self.assigned_project_ids, kind)
    }

    pub fn require_super_admin(&self) -> Result<(), AppError> {
        match self.role() {
            Role::SuperAdmin => Ok(()),
            _ => Err(AppError::Forbidden(anyhow::anyhow!(
                "Super admin access required"
            ))),
        }
    }

    /// Admins own projects; super admins act for everyone.
    pub fn require_admin(&self) -> Result<(), AppError> {
        match self.role() {
            Role::SuperAdmin | Role::Admin => Ok(()),
            _ => Err(AppError::Forbidden(anyhow::anyhow!("Admin access required"))),
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AppError::Unauthorized(anyhow::anyhow!("Missing X-User-ID header"))
            })?
            .trim()
            .parse::<i64>()
            .map_err(|_| AppError::Unauthorized(anyhow::anyhow!("Invalid X-User-ID header")))?;

        let user = state
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Unknown user")))?;

        if !user.is_active {
            return Err(AppError::Forbidden(anyhow::anyhow!("Account is disabled")));
        }

        let assigned_project_ids = if user.role().works_by_assignment() {
            state.store.list_assigned_project_ids(user_id).await?
        } else {
            Vec::new()
        };

        tracing::Span::current().record("user_id", user_id);

        Ok(Caller {
            user,
            assigned_project_ids,
        })
    }
}
