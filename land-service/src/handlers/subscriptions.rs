//! Subscription status, checkout and cancellation for the caller, plus the
//! super-admin grant.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{Duration, Utc};
use serde_json::json;
use service_core::error::AppError;
use validator::Validate;

use crate::dtos::{
    GrantSubscriptionRequest, GrantSubscriptionResponse, SubscribeRequest, SubscribeResponse,
    SubscriptionResponse,
};
use crate::middleware::Caller;
use crate::models::{
    AuditAction, AuditResource, CreatePayment, MerchantReference, PaymentStatus, PaymentType, Plan,
    SubscriptionStatus,
};
use crate::services::pesapal::{BillingAddress, SubscriptionDetails};
use crate::services::record_subscription_operation;
use crate::services::store::{AccountStore, BillingStore};
use crate::startup::AppState;

async fn active_plan(state: &AppState, plan_id: i64) -> Result<Plan, AppError> {
    let plan = state
        .store
        .get_plan(plan_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Plan {} not found", plan_id)))?;

    if !plan.is_active {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Plan {} is no longer offered",
            plan_id
        )));
    }
    Ok(plan)
}

/// GET /subscription
pub async fn get_subscription(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<SubscriptionResponse>, AppError> {
    let Some(subscription) = state.lifecycle.current(caller.user_id()).await? else {
        return Ok(Json(SubscriptionResponse::none()));
    };

    let is_active = subscription.status() == SubscriptionStatus::Active;
    let plan = match subscription.plan_id {
        Some(plan_id) => state.store.get_plan(plan_id).await?,
        None => None,
    };

    Ok(Json(SubscriptionResponse::new(subscription, is_active, plan)))
}

/// POST /subscription/subscribe
///
/// Records a pending payment, submits the order to Pesapal and hands back the
/// checkout URL. The subscription itself only changes once the payment is
/// reconciled.
pub async fn subscribe(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<SubscribeRequest>,
) -> Result<(StatusCode, Json<SubscribeResponse>), AppError> {
    req.validate()?;

    if !state.pesapal.is_configured() {
        tracing::warn!("Subscribe attempted without Pesapal credentials");
        return Err(AppError::ServiceUnavailable);
    }

    let plan = active_plan(&state, req.plan_id).await?;
    let subscription = state.lifecycle.prepare(caller.user_id(), &plan).await?;

    // A subscription that has run before is being renewed.
    let payment_type = if subscription.start_date.is_some() {
        PaymentType::Renewal
    } else {
        PaymentType::Subscription
    };
    let merchant_reference = MerchantReference::generate(caller.user_id()).to_string();

    let payment = state
        .store
        .create_payment(&CreatePayment {
            user_id: caller.user_id(),
            subscription_id: subscription.subscription_id,
            plan_id: Some(plan.plan_id),
            amount: plan.amount,
            currency: plan.currency.clone(),
            payment_type,
            status: PaymentStatus::Pending,
            order_tracking_id: None,
            merchant_reference: merchant_reference.clone(),
            transaction_id: None,
            payment_method: None,
            is_recurring: req.recurring,
            recurring_frequency: req
                .recurring
                .then(|| plan.gateway_frequency().to_string()),
            metadata: json!({}),
        })
        .await?;

    let now = Utc::now();
    let subscription_details = req.recurring.then(|| {
        SubscriptionDetails::new(
            now,
            now + Duration::days(plan.duration_days()),
            plan.gateway_frequency(),
        )
    });
    let billing_address = BillingAddress {
        email_address: caller.user.email.clone(),
        phone_number: req.phone_number.clone(),
        country_code: state.pesapal.config().country_code.clone(),
        first_name: caller.user.first_name.clone(),
        middle_name: None,
        last_name: caller.user.last_name.clone(),
    };
    let order = state.pesapal.order_request(
        &merchant_reference,
        plan.amount,
        &plan.currency,
        &format!("{} subscription", plan.display_name()),
        billing_address,
        subscription_details,
    );

    let submission = match state.pesapal.submit_order(&order).await {
        Ok(submission) => submission,
        Err(e) => {
            tracing::error!(
                payment_id = payment.payment_id,
                error = %e,
                "Failed to submit order to Pesapal"
            );
            state
                .store
                .cancel_pending_payment(payment.payment_id, &e.to_string())
                .await?;
            return Err(AppError::BadGateway(format!(
                "Payment gateway rejected the order: {}",
                e
            )));
        }
    };

    let payment = state
        .store
        .attach_order_tracking_id(payment.payment_id, &submission.order_tracking_id)
        .await?;

    record_subscription_operation("subscribe");
    tracing::info!(
        user_id = caller.user_id(),
        payment_id = payment.payment_id,
        order_tracking_id = %submission.order_tracking_id,
        plan_id = plan.plan_id,
        recurring = req.recurring,
        "Subscription checkout started"
    );

    Ok((
        StatusCode::CREATED,
        Json(SubscribeResponse {
            payment_id: payment.payment_id,
            order_tracking_id: submission.order_tracking_id,
            merchant_reference,
            redirect_url: submission.redirect_url,
        }),
    ))
}

/// POST /subscription/cancel
pub async fn cancel_subscription(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<SubscriptionResponse>, AppError> {
    let subscription = state.lifecycle.cancel(caller.user_id()).await?;

    state
        .audit
        .record(
            Some(&caller.user),
            AuditAction::Cancel,
            AuditResource::Subscription,
            Some(subscription.subscription_id),
            "Cancelled own subscription",
            json!({ "status": subscription.status }),
        )
        .await;

    let plan = match subscription.plan_id {
        Some(plan_id) => state.store.get_plan(plan_id).await?,
        None => None,
    };
    Ok(Json(SubscriptionResponse::new(subscription, false, plan)))
}

/// POST /admin/users/:id/subscription
pub async fn grant_subscription(
    State(state): State<AppState>,
    caller: Caller,
    Path(user_id): Path<i64>,
    Json(req): Json<GrantSubscriptionRequest>,
) -> Result<Json<GrantSubscriptionResponse>, AppError> {
    caller.require_super_admin()?;

    let user = state
        .store
        .get_user(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("User {} not found", user_id)))?;
    let plan = active_plan(&state, req.plan_id).await?;

    let subscription = state.lifecycle.grant(user.user_id, &plan).await?;

    state
        .audit
        .record(
            Some(&caller.user),
            AuditAction::Grant,
            AuditResource::Subscription,
            Some(subscription.subscription_id),
            format!("Granted {} to {}", plan.display_name(), user.username),
            json!({ "user_id": user.user_id, "plan_id": plan.plan_id, "end_date": subscription.end_date }),
        )
        .await;

    Ok(Json(GrantSubscriptionResponse {
        end_date: subscription.end_date,
        subscription,
    }))
}
