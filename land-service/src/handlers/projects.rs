//! Projects and project assignments.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::json;
use service_core::error::AppError;
use validator::Validate;

use crate::dtos::{
    AssignProjectRequest, CreateProjectRequest, ListProjectsQuery, UpdateProjectRequest,
};
use crate::middleware::SubscribedCaller;
use crate::models::{
    normalize_phases, AuditAction, AuditResource, CreateProject, ListProjectsFilter, Project,
    ProjectAssignment, UpdateProject,
};
use crate::services::EntityKind;
use crate::services::store::{AccountStore, LandStore};
use crate::startup::AppState;

/// Load a project the caller may see. Invisible projects read as missing.
pub(crate) async fn visible_project(
    state: &AppState,
    caller: &SubscribedCaller,
    project_id: i64,
) -> Result<Project, AppError> {
    state
        .store
        .get_project(project_id)
        .await?
        .filter(|p| caller.scope(EntityKind::Project).permits_project(p))
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Project {} not found", project_id)))
}

/// Load a project the caller may manage.
pub(crate) async fn managed_project(
    state: &AppState,
    caller: &SubscribedCaller,
    project_id: i64,
) -> Result<Project, AppError> {
    let project = visible_project(state, caller, project_id).await?;
    if !caller.scope(EntityKind::Project).manages_project(&project) {
        return Err(AppError::Forbidden(anyhow::anyhow!(
            "Only the project owner can do this"
        )));
    }
    Ok(project)
}

/// POST /projects
pub async fn create_project(
    State(state): State<AppState>,
    caller: SubscribedCaller,
    Json(req): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<Project>), AppError> {
    caller.require_admin()?;
    req.validate()?;

    let project = state
        .store
        .create_project(&CreateProject {
            owner_id: caller.user_id(),
            name: req.name.trim().to_string(),
            location: req.location.trim().to_string(),
            size: req.size,
            description: req.description,
            phases: normalize_phases(&req.phases),
        })
        .await?;

    tracing::info!(
        project_id = project.project_id,
        owner_id = project.owner_id,
        "Project created"
    );

    Ok((StatusCode::CREATED, Json(project)))
}

/// GET /projects
pub async fn list_projects(
    State(state): State<AppState>,
    caller: SubscribedCaller,
    Query(query): Query<ListProjectsQuery>,
) -> Result<Json<Vec<Project>>, AppError> {
    let scope = caller.scope(EntityKind::Project);
    if scope.is_denied() {
        return Ok(Json(Vec::new()));
    }

    let projects = state
        .store
        .list_projects(
            &scope,
            &ListProjectsFilter {
                search: query.search.filter(|s| !s.trim().is_empty()),
            },
        )
        .await?;

    Ok(Json(projects))
}

/// GET /projects/:id
pub async fn get_project(
    State(state): State<AppState>,
    caller: SubscribedCaller,
    Path(project_id): Path<i64>,
) -> Result<Json<Project>, AppError> {
    Ok(Json(visible_project(&state, &caller, project_id).await?))
}

/// PATCH /projects/:id
pub async fn update_project(
    State(state): State<AppState>,
    caller: SubscribedCaller,
    Path(project_id): Path<i64>,
    Json(req): Json<UpdateProjectRequest>,
) -> Result<Json<Project>, AppError> {
    req.validate()?;
    managed_project(&state, &caller, project_id).await?;

    let project = state
        .store
        .update_project(
            project_id,
            &UpdateProject {
                name: req.name.map(|n| n.trim().to_string()),
                location: req.location.map(|l| l.trim().to_string()),
                size: req.size,
                description: req.description,
                phases: req.phases.as_deref().map(normalize_phases),
            },
        )
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Project {} not found", project_id)))?;

    Ok(Json(project))
}

/// DELETE /projects/:id
///
/// Cascades to plots, bookings and sales.
pub async fn delete_project(
    State(state): State<AppState>,
    caller: SubscribedCaller,
    Path(project_id): Path<i64>,
) -> Result<StatusCode, AppError> {
    let project = managed_project(&state, &caller, project_id).await?;

    if !state.store.delete_project(project_id).await? {
        return Err(AppError::NotFound(anyhow::anyhow!(
            "Project {} not found",
            project_id
        )));
    }

    state
        .audit
        .record(
            Some(&caller.user),
            AuditAction::Delete,
            AuditResource::Project,
            Some(project_id),
            format!("Deleted project {}", project.name),
            json!({ "name": project.name, "owner_id": project.owner_id }),
        )
        .await;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /projects/:id/assignments
pub async fn assign_user(
    State(state): State<AppState>,
    caller: SubscribedCaller,
    Path(project_id): Path<i64>,
    Json(req): Json<AssignProjectRequest>,
) -> Result<(StatusCode, Json<ProjectAssignment>), AppError> {
    let project = managed_project(&state, &caller, project_id).await?;

    let user = state
        .store
        .get_user(req.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("User {} not found", req.user_id)))?;
    if !user.role().works_by_assignment() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Only clients and subagents can be assigned to projects"
        )));
    }

    let assignment = state.store.assign_project(project_id, user.user_id).await?;

    state
        .audit
        .record(
            Some(&caller.user),
            AuditAction::Create,
            AuditResource::Assignment,
            Some(project_id),
            format!("Assigned {} to {}", user.username, project.name),
            json!({ "project_id": project_id, "user_id": user.user_id }),
        )
        .await;

    Ok((StatusCode::CREATED, Json(assignment)))
}

/// DELETE /projects/:id/assignments/:user_id
pub async fn unassign_user(
    State(state): State<AppState>,
    caller: SubscribedCaller,
    Path((project_id, user_id)): Path<(i64, i64)>,
) -> Result<StatusCode, AppError> {
    let project = managed_project(&state, &caller, project_id).await?;

    if !state.store.unassign_project(project_id, user_id).await? {
        return Err(AppError::NotFound(anyhow::anyhow!("Assignment not found")));
    }

    state
        .audit
        .record(
            Some(&caller.user),
            AuditAction::Delete,
            AuditResource::Assignment,
            Some(project_id),
            format!("Removed user {} from {}", user_id, project.name),
            json!({ "project_id": project_id, "user_id": user_id }),
        )
        .await;

    Ok(StatusCode::NO_CONTENT)
}
