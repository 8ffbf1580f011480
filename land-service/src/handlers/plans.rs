//! Subscription plan catalogue.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::json;
use service_core::error::AppError;
use validator::Validate;

use crate::dtos::{CreatePlanRequest, PlanResponse, UpdatePlanRequest};
use crate::middleware::Caller;
use crate::models::{AuditAction, AuditResource, CreatePlan, UpdatePlan};
use crate::services::store::BillingStore;
use crate::startup::AppState;

/// GET /subscription-plans
pub async fn list_plans(State(state): State<AppState>) -> Result<Json<Vec<PlanResponse>>, AppError> {
    let plans = state.store.list_plans(false).await?;
    Ok(Json(plans.into_iter().map(PlanResponse::from).collect()))
}

/// GET /subscription-plans/:id
pub async fn get_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<i64>,
) -> Result<Json<PlanResponse>, AppError> {
    let plan = state
        .store
        .get_plan(plan_id)
        .await?
        .filter(|p| p.is_active)
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Plan {} not found", plan_id)))?;

    Ok(Json(PlanResponse::from(plan)))
}

/// POST /admin/subscription-plans
pub async fn create_plan(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<CreatePlanRequest>,
) -> Result<(StatusCode, Json<PlanResponse>), AppError> {
    caller.require_super_admin()?;
    req.validate()?;

    let plan = state
        .store
        .create_plan(&CreatePlan {
            name: req.name.trim().to_string(),
            description: req.description,
            amount: req.amount,
            currency: req.currency.to_uppercase(),
            period: req.period,
            period_count: req.period_count,
            features: req.features,
        })
        .await?;

    state
        .audit
        .record(
            Some(&caller.user),
            AuditAction::Create,
            AuditResource::SubscriptionPlan,
            Some(plan.plan_id),
            format!("Created plan {}", plan.display_name()),
            json!({ "amount": plan.amount, "period": plan.period, "period_count": plan.period_count }),
        )
        .await;

    tracing::info!(plan_id = plan.plan_id, name = %plan.name, "Plan created");

    Ok((StatusCode::CREATED, Json(PlanResponse::from(plan))))
}

/// PATCH /admin/subscription-plans/:id
pub async fn update_plan(
    State(state): State<AppState>,
    caller: Caller,
    Path(plan_id): Path<i64>,
    Json(req): Json<UpdatePlanRequest>,
) -> Result<Json<PlanResponse>, AppError> {
    caller.require_super_admin()?;
    req.validate()?;

    let changes = json!({
        "name": req.name,
        "amount": req.amount,
        "is_active": req.is_active,
    });

    let plan = state
        .store
        .update_plan(
            plan_id,
            &UpdatePlan {
                name: req.name.map(|n| n.trim().to_string()),
                description: req.description,
                amount: req.amount,
                features: req.features,
                is_active: req.is_active,
            },
        )
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Plan {} not found", plan_id)))?;

    state
        .audit
        .record(
            Some(&caller.user),
            AuditAction::Update,
            AuditResource::SubscriptionPlan,
            Some(plan_id),
            format!("Updated plan {}", plan.name),
            changes,
        )
        .await;

    Ok(Json(PlanResponse::from(plan)))
}

/// DELETE /admin/subscription-plans/:id
///
/// Plans are referenced by payments, so they are deactivated, never removed.
pub async fn deactivate_plan(
    State(state): State<AppState>,
    caller: Caller,
    Path(plan_id): Path<i64>,
) -> Result<StatusCode, AppError> {
    caller.require_super_admin()?;

    let plan = state
        .store
        .update_plan(
            plan_id,
            &UpdatePlan {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Plan {} not found", plan_id)))?;

    state
        .audit
        .record(
            Some(&caller.user),
            AuditAction::Delete,
            AuditResource::SubscriptionPlan,
            Some(plan_id),
            format!("Deactivated plan {}", plan.name),
            json!({ "is_active": false }),
        )
        .await;

    Ok(StatusCode::NO_CONTENT)
}
