//! Pesapal IPN endpoint.

use axum::{
    extract::{Query, State},
    Json,
};

use crate::dtos::{WebhookAck, WebhookQuery};
use crate::startup::AppState;

/// GET /webhooks/pesapal?OrderTrackingId=..&OrderMerchantReference=..
pub async fn pesapal_ipn(
    State(state): State<AppState>,
    Query(query): Query<WebhookQuery>,
) -> Json<WebhookAck> {
    Json(acknowledge(&state, query).await)
}

/// POST /webhooks/pesapal, for IPNs registered with the POST notification type.
pub async fn pesapal_ipn_post(
    State(state): State<AppState>,
    Json(body): Json<WebhookQuery>,
) -> Json<WebhookAck> {
    Json(acknowledge(&state, body).await)
}

/// Always answers with the acknowledgement body Pesapal expects. When
/// processing failed the body carries `status: 500`, which makes Pesapal
/// deliver the notification again.
async fn acknowledge(state: &AppState, query: WebhookQuery) -> WebhookAck {
    let ack = WebhookAck::new(&query);

    let Some(order_tracking_id) = query
        .order_tracking_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
    else {
        tracing::warn!("Pesapal IPN without OrderTrackingId");
        return ack.failed("OrderTrackingId is required");
    };

    tracing::info!(
        order_tracking_id,
        merchant_reference = ?query.order_merchant_reference,
        notification_type = ?query.order_notification_type,
        "Pesapal IPN received"
    );

    match state
        .reconciliation
        .process_notification(order_tracking_id, query.order_merchant_reference.as_deref())
        .await
    {
        Ok(_) => ack,
        Err(e) => ack.failed(e.to_string()),
    }
}
