use crate::models::{Payment, Plan, PlanPeriod, Subscription};
use crate::services::ReconcileOutcome;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::validate_positive;

// ============================================================================
// Plans
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePlanRequest {
    #[validate(length(min = 1, max = 100, message = "Plan name is required"))]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[validate(custom(function = "validate_positive"))]
    pub amount: Decimal,
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3, message = "Currency must be a 3-letter code"))]
    pub currency: String,
    pub period: PlanPeriod,
    #[serde(default = "default_period_count")]
    #[validate(range(min = 1, max = 36))]
    pub period_count: i32,
    #[serde(default)]
    pub features: Vec<String>,
}

fn default_currency() -> String {
    "KES".to_string()
}

fn default_period_count() -> i32 {
    1
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdatePlanRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    pub description: Option<String>,
    #[validate(custom(function = "validate_positive"))]
    pub amount: Option<Decimal>,
    pub features: Option<Vec<String>>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct PlanResponse {
    #[serde(flatten)]
    pub plan: Plan,
    pub display_name: String,
    pub duration_days: i64,
}

impl From<Plan> for PlanResponse {
    fn from(plan: Plan) -> Self {
        Self {
            display_name: plan.display_name(),
            duration_days: plan.duration_days(),
            plan,
        }
    }
}

// ============================================================================
// Subscriptions
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct SubscribeRequest {
    pub plan_id: i64,
    /// Opt in to Pesapal recurring billing.
    #[serde(default)]
    pub recurring: bool,
    #[validate(length(min = 9, max = 15, message = "Invalid phone number"))]
    pub phone_number: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubscribeResponse {
    pub payment_id: i64,
    pub order_tracking_id: String,
    pub merchant_reference: String,
    pub redirect_url: String,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    pub has_subscription: bool,
    pub is_active: bool,
    pub status: String,
    pub days_remaining: i64,
    pub subscription: Option<Subscription>,
    pub plan: Option<PlanResponse>,
}

impl SubscriptionResponse {
    pub fn none() -> Self {
        Self {
            has_subscription: false,
            is_active: false,
            status: "none".to_string(),
            days_remaining: 0,
            subscription: None,
            plan: None,
        }
    }

    pub fn new(subscription: Subscription, is_active: bool, plan: Option<Plan>) -> Self {
        Self {
            has_subscription: true,
            is_active,
            status: subscription.status().as_str().to_string(),
            days_remaining: subscription.days_remaining(Utc::now()),
            subscription: Some(subscription),
            plan: plan.map(PlanResponse::from),
        }
    }
}

// ============================================================================
// Payments
// ============================================================================

#[derive(Debug, Serialize)]
pub struct PaymentHistoryResponse {
    pub payments: Vec<Payment>,
    pub total: usize,
}

/// Body of `GET /payments/verify/{order_tracking_id}`.
#[derive(Debug, Serialize)]
pub struct VerifyPaymentResponse {
    /// `successful`, `failed`, `pending` or `inconclusive`.
    pub status: String,
    pub order_tracking_id: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment: Option<Payment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<Subscription>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_status: Option<String>,
}

impl VerifyPaymentResponse {
    pub fn inconclusive(order_tracking_id: &str) -> Self {
        Self {
            status: "inconclusive".to_string(),
            order_tracking_id: order_tracking_id.to_string(),
            message: "Payment status could not be confirmed, try again shortly".to_string(),
            payment: None,
            subscription: None,
            gateway_status: None,
        }
    }

    pub fn from_outcome(order_tracking_id: &str, outcome: ReconcileOutcome) -> Self {
        let (payment, subscription, gateway_status) = match outcome {
            ReconcileOutcome::Activated {
                payment,
                subscription,
            }
            | ReconcileOutcome::Renewed {
                payment,
                subscription,
            }
            | ReconcileOutcome::OrphanRenewed {
                payment,
                subscription,
            } => (Some(payment), Some(subscription), None),
            ReconcileOutcome::Failed { payment } => (Some(payment), None, None),
            ReconcileOutcome::AlreadyReconciled { payment } => (payment, None, None),
            ReconcileOutcome::StillPending {
                payment,
                gateway_status,
            } => (payment, None, Some(gateway_status.as_str().to_string())),
        };

        let status = payment
            .as_ref()
            .map(|p| p.status().as_str())
            .unwrap_or("pending")
            .to_string();
        let message = match status.as_str() {
            "successful" => "Payment confirmed",
            "failed" => "Payment failed",
            "cancelled" => "Payment was cancelled",
            _ => "Payment is still pending",
        }
        .to_string();

        Self {
            status,
            order_tracking_id: order_tracking_id.to_string(),
            message,
            payment,
            subscription,
            gateway_status,
        }
    }
}

// ============================================================================
// Pesapal IPN
// ============================================================================

/// Query string Pesapal sends to the IPN URL.
#[derive(Debug, Deserialize)]
pub struct WebhookQuery {
    #[serde(rename = "OrderTrackingId")]
    pub order_tracking_id: Option<String>,
    #[serde(rename = "OrderMerchantReference")]
    pub order_merchant_reference: Option<String>,
    #[serde(rename = "OrderNotificationType")]
    pub order_notification_type: Option<String>,
}

/// Acknowledgement body Pesapal expects back from the IPN URL.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAck {
    pub order_notification_type: String,
    pub order_tracking_id: String,
    pub order_merchant_reference: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WebhookAck {
    pub fn new(query: &WebhookQuery) -> Self {
        Self {
            order_notification_type: query
                .order_notification_type
                .clone()
                .unwrap_or_else(|| "IPNCHANGE".to_string()),
            order_tracking_id: query.order_tracking_id.clone().unwrap_or_default(),
            order_merchant_reference: query.order_merchant_reference.clone().unwrap_or_default(),
            status: 200,
            error: None,
        }
    }

    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.status = 500;
        self.error = Some(error.into());
        self
    }
}

// ============================================================================
// Admin
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterIpnRequest {
    /// Defaults to the configured IPN URL.
    #[validate(url)]
    pub url: Option<String>,
    #[serde(default = "default_notification_type")]
    pub notification_type: String,
}

fn default_notification_type() -> String {
    "GET".to_string()
}

#[derive(Debug, Deserialize)]
pub struct GrantSubscriptionRequest {
    pub plan_id: i64,
}

#[derive(Debug, Serialize)]
pub struct GrantSubscriptionResponse {
    pub subscription: Subscription,
    pub end_date: Option<DateTime<Utc>>,
}
