//! Payment history and customer-driven verification.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;

use crate::dtos::{PaymentHistoryResponse, VerifyPaymentResponse};
use crate::middleware::Caller;
use crate::services::ReconcileError;
use crate::services::store::BillingStore;
use crate::startup::AppState;

/// GET /payments/history
pub async fn payment_history(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<PaymentHistoryResponse>, AppError> {
    let payments = state.store.list_payments_for_user(caller.user_id()).await?;
    Ok(Json(PaymentHistoryResponse {
        total: payments.len(),
        payments,
    }))
}

/// GET /payments/verify/:order_tracking_id
///
/// Asks Pesapal for the order's status and applies it. A gateway that cannot
/// be reached yields 202 so the client polls again; it never fails the
/// payment.
pub async fn verify_payment(
    State(state): State<AppState>,
    caller: Caller,
    Path(order_tracking_id): Path<String>,
) -> Result<(StatusCode, Json<VerifyPaymentResponse>), AppError> {
    let owned = state
        .store
        .get_payment_by_order(&order_tracking_id)
        .await?
        .filter(|p| p.user_id == caller.user_id());
    if owned.is_none() {
        return Err(AppError::NotFound(anyhow::anyhow!("Payment not found")));
    }

    match state
        .reconciliation
        .verify_payment(&order_tracking_id)
        .await
    {
        Ok(outcome) => Ok((
            StatusCode::OK,
            Json(VerifyPaymentResponse::from_outcome(
                &order_tracking_id,
                outcome,
            )),
        )),
        Err(ReconcileError::Inconclusive(_)) => Ok((
            StatusCode::ACCEPTED,
            Json(VerifyPaymentResponse::inconclusive(&order_tracking_id)),
        )),
        Err(ReconcileError::Unresolvable(reason)) => {
            Err(AppError::NotFound(anyhow::anyhow!(reason)))
        }
        Err(ReconcileError::Store(e)) => Err(e),
    }
}
