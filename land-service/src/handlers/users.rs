//! User administration.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::json;
use service_core::error::AppError;
use validator::Validate;

use crate::dtos::{CreateSubagentRequest, CreateUserRequest, ListUsersQuery, UpdateUserRequest};
use crate::middleware::{Caller, SubscribedCaller};
use crate::models::{
    AuditAction, AuditResource, CreateUser, ListUsersFilter, Role, UpdateUser, User,
};
use crate::services::store::AccountStore;
use crate::startup::AppState;

async fn create_and_audit(
    state: &AppState,
    actor: &User,
    input: CreateUser,
) -> Result<User, AppError> {
    let user = state.store.create_user(&input).await?;

    state
        .audit
        .record(
            Some(actor),
            AuditAction::Create,
            AuditResource::User,
            Some(user.user_id),
            format!("Created {} {}", user.role, user.username),
            json!({ "username": user.username, "role": user.role, "created_by": user.created_by }),
        )
        .await;

    tracing::info!(user_id = user.user_id, role = %user.role, "User created");
    Ok(user)
}

/// POST /admin/users
pub async fn create_user(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<User>), AppError> {
    caller.require_super_admin()?;
    req.validate()?;

    if req.role == Role::Unknown {
        return Err(AppError::BadRequest(anyhow::anyhow!("Unsupported role")));
    }

    let user = create_and_audit(
        &state,
        &caller.user,
        CreateUser {
            username: req.username.trim().to_string(),
            email: req.email.trim().to_lowercase(),
            first_name: req.first_name,
            last_name: req.last_name,
            role: req.role,
            created_by: Some(caller.user_id()),
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(user)))
}

/// POST /users/subagents
pub async fn create_subagent(
    State(state): State<AppState>,
    caller: SubscribedCaller,
    Json(req): Json<CreateSubagentRequest>,
) -> Result<(StatusCode, Json<User>), AppError> {
    caller.require_admin()?;
    req.validate()?;

    let role = req.role.unwrap_or(Role::Subagent);
    if !role.works_by_assignment() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Admins can only create clients and subagents"
        )));
    }

    let user = create_and_audit(
        &state,
        &caller.user,
        CreateUser {
            username: req.username.trim().to_string(),
            email: req.email.trim().to_lowercase(),
            first_name: req.first_name,
            last_name: req.last_name,
            role,
            created_by: Some(caller.user_id()),
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(user)))
}

/// GET /admin/users
pub async fn list_users(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<ListUsersQuery>,
) -> Result<Json<Vec<User>>, AppError> {
    caller.require_super_admin()?;

    let users = state
        .store
        .list_users(&ListUsersFilter {
            role: query.role,
            created_by: None,
        })
        .await?;

    Ok(Json(users))
}

/// GET /admin/users/:id
pub async fn get_user(
    State(state): State<AppState>,
    caller: Caller,
    Path(user_id): Path<i64>,
) -> Result<Json<User>, AppError> {
    caller.require_super_admin()?;

    let user = state
        .store
        .get_user(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("User {} not found", user_id)))?;

    Ok(Json(user))
}

/// PATCH /admin/users/:id
pub async fn update_user(
    State(state): State<AppState>,
    caller: Caller,
    Path(user_id): Path<i64>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<Json<User>, AppError> {
    caller.require_super_admin()?;
    req.validate()?;

    if req.role == Some(Role::Unknown) {
        return Err(AppError::BadRequest(anyhow::anyhow!("Unsupported role")));
    }
    if user_id == caller.user_id()
        && (req.is_active == Some(false) || req.role.is_some_and(|r| r != Role::SuperAdmin))
    {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "You cannot deactivate or demote your own account"
        )));
    }

    let input = UpdateUser {
        email: req.email.map(|e| e.trim().to_lowercase()),
        first_name: req.first_name,
        last_name: req.last_name,
        role: req.role,
        is_active: req.is_active,
    };

    let user = state
        .store
        .update_user(user_id, &input)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("User {} not found", user_id)))?;

    state
        .audit
        .record(
            Some(&caller.user),
            AuditAction::Update,
            AuditResource::User,
            Some(user_id),
            format!("Updated user {}", user.username),
            json!({
                "email": input.email,
                "first_name": input.first_name,
                "last_name": input.last_name,
                "role": input.role.map(|r| r.as_str()),
                "is_active": input.is_active,
            }),
        )
        .await;

    tracing::info!(user_id, is_active = user.is_active, role = %user.role, "User updated");
    Ok(Json(user))
}

/// DELETE /admin/users/:id
///
/// Removes the user with everything it owns.
pub async fn delete_user(
    State(state): State<AppState>,
    caller: Caller,
    Path(user_id): Path<i64>,
) -> Result<StatusCode, AppError> {
    caller.require_super_admin()?;

    if user_id == caller.user_id() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "You cannot delete your own account"
        )));
    }

    let user = state
        .store
        .get_user(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("User {} not found", user_id)))?;

    if !state.store.delete_user(user_id).await? {
        return Err(AppError::NotFound(anyhow::anyhow!("User {} not found", user_id)));
    }

    state
        .audit
        .record(
            Some(&caller.user),
            AuditAction::Delete,
            AuditResource::User,
            Some(user_id),
            format!("Deleted user {}", user.username),
            json!({ "username": user.username, "role": user.role }),
        )
        .await;

    Ok(StatusCode::NO_CONTENT)
}
