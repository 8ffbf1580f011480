//! Gateway payment model and merchant references.

use super::subscription::Subscription;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Successful,
    Failed,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Successful => "successful",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "successful" => PaymentStatus::Successful,
            "failed" => PaymentStatus::Failed,
            "cancelled" => PaymentStatus::Cancelled,
            _ => PaymentStatus::Pending,
        }
    }

    /// Terminal states never change again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    Subscription,
    Renewal,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::Subscription => "subscription",
            PaymentType::Renewal => "renewal",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "renewal" => PaymentType::Renewal,
            _ => PaymentType::Subscription,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub payment_id: i64,
    pub user_id: i64,
    pub subscription_id: i64,
    pub plan_id: Option<i64>,
    pub amount: Decimal,
    pub currency: String,
    pub payment_type: String,
    pub status: String,
    pub order_tracking_id: Option<String>,
    pub merchant_reference: String,
    pub transaction_id: Option<String>,
    pub payment_method: Option<String>,
    pub is_recurring: bool,
    pub recurring_frequency: Option<String>,
    pub metadata: serde_json::Value,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Payment {
    pub fn status(&self) -> PaymentStatus {
        PaymentStatus::from_string(&self.status)
    }

    pub fn payment_type(&self) -> PaymentType {
        PaymentType::from_string(&self.payment_type)
    }
}

#[derive(Debug, Clone)]
pub struct CreatePayment {
    pub user_id: i64,
    pub subscription_id: i64,
    pub plan_id: Option<i64>,
    pub amount: Decimal,
    pub currency: String,
    pub payment_type: PaymentType,
    pub status: PaymentStatus,
    pub order_tracking_id: Option<String>,
    pub merchant_reference: String,
    pub transaction_id: Option<String>,
    pub payment_method: Option<String>,
    pub is_recurring: bool,
    pub recurring_frequency: Option<String>,
    pub metadata: serde_json::Value,
}

/// Gateway confirmation applied to a pending payment together with the
/// subscription state it produces.
#[derive(Debug, Clone)]
pub struct PaymentSettlement {
    pub order_tracking_id: String,
    pub transaction_id: Option<String>,
    pub payment_method: Option<String>,
    pub metadata: serde_json::Value,
    pub subscription: Subscription,
}

/// A recurring charge the gateway confirmed but that has no local payment.
#[derive(Debug, Clone)]
pub struct RenewalRecord {
    pub payment: CreatePayment,
    pub subscription: Subscription,
}

/// `SUB-{user_id}-{suffix}`: how a gateway order is tied back to a user when
/// no local payment row exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerchantReference {
    user_id: i64,
    suffix: String,
}

impl MerchantReference {
    const PREFIX: &'static str = "SUB-";

    pub fn generate(user_id: i64) -> Self {
        let suffix = Uuid::new_v4().simple().to_string()[..8].to_string();
        Self { user_id, suffix }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let rest = raw.strip_prefix(Self::PREFIX)?;
        let (user, suffix) = rest.split_once('-')?;
        let user_id = user.parse::<i64>().ok().filter(|id| *id > 0)?;
        if suffix.is_empty() {
            return None;
        }
        Some(Self {
            user_id,
            suffix: suffix.to_string(),
        })
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }
}

impl fmt::Display for MerchantReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}-{}", Self::PREFIX, self.user_id, self.suffix)
    }
}
