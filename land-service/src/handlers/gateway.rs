//! One-time Pesapal setup.

use axum::{extract::State, Json};
use service_core::error::AppError;
use validator::Validate;

use crate::dtos::RegisterIpnRequest;
use crate::middleware::Caller;
use crate::services::pesapal::IpnRegistration;
use crate::startup::AppState;

/// POST /admin/gateway/ipn
///
/// Registers our webhook with Pesapal. The returned `ipn_id` goes into
/// `PESAPAL_IPN_ID`.
pub async fn register_ipn(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<RegisterIpnRequest>,
) -> Result<Json<IpnRegistration>, AppError> {
    caller.require_super_admin()?;
    req.validate()?;

    if !state.pesapal.is_configured() {
        return Err(AppError::ServiceUnavailable);
    }

    let url = req
        .url
        .unwrap_or_else(|| state.pesapal.config().ipn_url.clone());

    let registration = state
        .pesapal
        .register_ipn(&url, &req.notification_type.to_uppercase())
        .await
        .map_err(|e| {
            tracing::error!(error = %e, url = %url, "IPN registration failed");
            AppError::BadGateway(e.to_string())
        })?;

    Ok(Json(registration))
}
