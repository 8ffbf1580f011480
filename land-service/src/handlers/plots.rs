//! Plots within projects.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use validator::Validate;

use super::projects::managed_project;
use crate::dtos::{CreatePlotRequest, ListPlotsQuery};
use crate::middleware::SubscribedCaller;
use crate::models::{normalize_phases, CreatePlot, ListPlotsFilter, Plot};
use crate::services::EntityKind;
use crate::services::store::LandStore;
use crate::startup::AppState;

/// POST /plots
pub async fn create_plot(
    State(state): State<AppState>,
    caller: SubscribedCaller,
    Json(req): Json<CreatePlotRequest>,
) -> Result<(StatusCode, Json<Plot>), AppError> {
    req.validate()?;
    let project = managed_project(&state, &caller, req.project_id).await?;

    let phases = normalize_phases(&req.phases);
    if let Some(unknown) = phases.iter().find(|p| !project.has_phase(p)) {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Phase '{}' is not defined on project {}",
            unknown,
            project.name
        )));
    }

    let plot = state
        .store
        .create_plot(&CreatePlot {
            project_id: project.project_id,
            plot_number: req.plot_number.trim().to_string(),
            size: req.size,
            price: req.price,
            property_type: req.property_type,
            phases,
        })
        .await?;

    tracing::info!(
        plot_id = plot.plot_id,
        project_id = plot.project_id,
        "Plot created"
    );

    Ok((StatusCode::CREATED, Json(plot)))
}

/// GET /plots
///
/// `project_id` and `is_available` only narrow what the caller may see.
pub async fn list_plots(
    State(state): State<AppState>,
    caller: SubscribedCaller,
    Query(query): Query<ListPlotsQuery>,
) -> Result<Json<Vec<Plot>>, AppError> {
    let scope = caller.scope(EntityKind::Plot);
    if scope.is_denied() {
        return Ok(Json(Vec::new()));
    }

    let plots = state
        .store
        .list_plots(
            &scope,
            &ListPlotsFilter {
                project_id: query.project_id,
                is_available: query.is_available,
            },
        )
        .await?;

    Ok(Json(plots))
}

/// GET /plots/:id
pub async fn get_plot(
    State(state): State<AppState>,
    caller: SubscribedCaller,
    Path(plot_id): Path<i64>,
) -> Result<Json<Plot>, AppError> {
    let not_found = || AppError::NotFound(anyhow::anyhow!("Plot {} not found", plot_id));

    let plot = state.store.get_plot(plot_id).await?.ok_or_else(not_found)?;
    let project = state
        .store
        .get_project(plot.project_id)
        .await?
        .ok_or_else(not_found)?;

    if !caller.scope(EntityKind::Plot).permits_plot(&plot, &project) {
        return Err(not_found());
    }

    Ok(Json(plot))
}
