//! Sales rollups and agent commissions.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::json;
use service_core::error::AppError;
use validator::Validate;

use super::projects::managed_project;
use crate::dtos::{ListSalesQuery, UpdateCommissionRequest};
use crate::middleware::SubscribedCaller;
use crate::models::{AgentSale, AuditAction, AuditResource, ListSalesFilter, ProjectSale};
use crate::services::EntityKind;
use crate::services::store::LandStore;
use crate::startup::AppState;

fn filter(query: ListSalesQuery) -> ListSalesFilter {
    ListSalesFilter {
        project_id: query.project_id,
        plot_id: query.plot_id,
    }
}

/// GET /sales/projects
pub async fn list_project_sales(
    State(state): State<AppState>,
    caller: SubscribedCaller,
    Query(query): Query<ListSalesQuery>,
) -> Result<Json<Vec<ProjectSale>>, AppError> {
    let scope = caller.scope(EntityKind::Project);
    if scope.is_denied() {
        return Ok(Json(Vec::new()));
    }

    Ok(Json(
        state
            .store
            .list_project_sales(&scope, &filter(query))
            .await?,
    ))
}

/// GET /sales/agents
pub async fn list_agent_sales(
    State(state): State<AppState>,
    caller: SubscribedCaller,
    Query(query): Query<ListSalesQuery>,
) -> Result<Json<Vec<AgentSale>>, AppError> {
    let scope = caller.scope(EntityKind::Project);
    if scope.is_denied() {
        return Ok(Json(Vec::new()));
    }

    Ok(Json(
        state
            .store
            .list_agent_sales(&scope, &filter(query))
            .await?,
    ))
}

/// PATCH /sales/agents/:id
pub async fn update_commission(
    State(state): State<AppState>,
    caller: SubscribedCaller,
    Path(sale_id): Path<i64>,
    Json(req): Json<UpdateCommissionRequest>,
) -> Result<Json<AgentSale>, AppError> {
    req.validate()?;

    let not_found = || AppError::NotFound(anyhow::anyhow!("Sale {} not found", sale_id));
    let sale = state
        .store
        .get_agent_sale(sale_id)
        .await?
        .ok_or_else(not_found)?;
    let plot = state
        .store
        .get_plot(sale.plot_id)
        .await?
        .ok_or_else(not_found)?;
    managed_project(&state, &caller, plot.project_id)
        .await
        .map_err(|e| match e {
            AppError::NotFound(_) => not_found(),
            other => other,
        })?;

    let updated = state
        .store
        .update_agent_commission(sale_id, req.commission)
        .await?
        .ok_or_else(not_found)?;

    state
        .audit
        .record(
            Some(&caller.user),
            AuditAction::Update,
            AuditResource::Sale,
            Some(sale_id),
            format!("Changed commission for {}", updated.agent_name),
            json!({ "from": sale.commission, "to": updated.commission }),
        )
        .await;

    Ok(Json(updated))
}
