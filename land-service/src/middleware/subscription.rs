//! Subscription gate in front of the land endpoints.

use super::caller::Caller;
use crate::models::{Role, SubscriptionStatus};
use crate::startup::AppState;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::{request::Parts, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// A caller allowed to use the land endpoints.
///
/// Owner-admins need an active subscription, re-checked with lazy expiry on
/// every request. Super admins bypass the gate; clients and subagents are
/// provisioned by a subscribed admin and are exempt.
#[derive(Debug, Clone)]
pub struct SubscribedCaller(pub Caller);

impl std::ops::Deref for SubscribedCaller {
    type Target = Caller;

    fn deref(&self) -> &Caller {
        &self.0
    }
}

fn subscription_required(status: &str) -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(json!({
            "error": "An active subscription is required",
            "subscription_status": status,
        })),
    )
        .into_response()
}

#[async_trait]
impl FromRequestParts<AppState> for SubscribedCaller {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let caller = Caller::from_request_parts(parts, state)
            .await
            .map_err(IntoResponse::into_response)?;

        match caller.role() {
            Role::SuperAdmin | Role::Client | Role::Subagent => Ok(SubscribedCaller(caller)),
            Role::Admin => {
                let subscription = state
                    .lifecycle
                    .current(caller.user_id())
                    .await
                    .map_err(IntoResponse::into_response)?;

                match subscription {
                    Some(sub) if sub.status() == SubscriptionStatus::Active => {
                        Ok(SubscribedCaller(caller))
                    }
                    Some(sub) => {
                        tracing::debug!(
                            user_id = caller.user_id(),
                            status = %sub.status,
                            "Blocked admin without active subscription"
                        );
                        Err(subscription_required(&sub.status))
                    }
                    None => Err(subscription_required("none")),
                }
            }
            Role::Unknown => Err((
                StatusCode::FORBIDDEN,
                Json(json!({ "error": "Role is not permitted" })),
            )
                .into_response()),
        }
    }
}
