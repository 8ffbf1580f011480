//! Subscription plan model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Days granted when a subscription has no plan attached.
pub const DEFAULT_DURATION_DAYS: i64 = 30;

/// Billing period of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanPeriod {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl PlanPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanPeriod::Daily => "daily",
            PlanPeriod::Weekly => "weekly",
            PlanPeriod::Monthly => "monthly",
            PlanPeriod::Quarterly => "quarterly",
            PlanPeriod::Yearly => "yearly",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "daily" => Some(PlanPeriod::Daily),
            "weekly" => Some(PlanPeriod::Weekly),
            "monthly" => Some(PlanPeriod::Monthly),
            "quarterly" => Some(PlanPeriod::Quarterly),
            "yearly" => Some(PlanPeriod::Yearly),
            _ => None,
        }
    }

    pub fn days(&self) -> i64 {
        match self {
            PlanPeriod::Daily => 1,
            PlanPeriod::Weekly => 7,
            PlanPeriod::Monthly => 30,
            PlanPeriod::Quarterly => 90,
            PlanPeriod::Yearly => 365,
        }
    }

    /// Frequency understood by the gateway's recurring billing. It has no
    /// quarterly option, so quarterly plans bill monthly.
    pub fn gateway_frequency(&self) -> &'static str {
        match self {
            PlanPeriod::Daily => "DAILY",
            PlanPeriod::Weekly => "WEEKLY",
            PlanPeriod::Monthly | PlanPeriod::Quarterly => "MONTHLY",
            PlanPeriod::Yearly => "YEARLY",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Plan {
    pub plan_id: i64,
    pub name: String,
    pub description: String,
    pub amount: Decimal,
    pub currency: String,
    pub period: String,
    pub period_count: i32,
    pub features: serde_json::Value,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Plan {
    pub fn period(&self) -> Option<PlanPeriod> {
        PlanPeriod::from_string(&self.period)
    }

    /// Days of access one payment buys.
    pub fn duration_days(&self) -> i64 {
        match self.period() {
            Some(period) => period.days() * i64::from(self.period_count.max(1)),
            None => DEFAULT_DURATION_DAYS,
        }
    }

    pub fn gateway_frequency(&self) -> &'static str {
        self.period()
            .map(|p| p.gateway_frequency())
            .unwrap_or("MONTHLY")
    }

    pub fn display_name(&self) -> String {
        let period = self.period().map(|p| p.as_str()).unwrap_or("monthly");
        format!("{} - {} {}", self.name, self.period_count, period)
    }
}

/// Duration for an optional plan, falling back to 30 days.
pub fn plan_duration_days(plan: Option<&Plan>) -> i64 {
    plan.map(Plan::duration_days).unwrap_or(DEFAULT_DURATION_DAYS)
}

#[derive(Debug, Clone)]
pub struct CreatePlan {
    pub name: String,
    pub description: String,
    pub amount: Decimal,
    pub currency: String,
    pub period: PlanPeriod,
    pub period_count: i32,
    pub features: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdatePlan {
    pub name: Option<String>,
    pub description: Option<String>,
    pub amount: Option<Decimal>,
    pub features: Option<Vec<String>>,
    pub is_active: Option<bool>,
}

#[cfg(test)]
pub(crate) fn sample_plan(period: PlanPeriod, period_count: i32) -> Plan {
    let now = Utc::now();
    Plan {
        plan_id: 1,
        name: "Pro".to_string(),
        description: String::new(),
        amount: Decimal::new(150000, 2),
        currency: "KES".to_string(),
        period: period.as_str().to_string(),
        period_count,
        features: serde_json::json!([]),
        is_active: true,
        created_utc: now,
        updated_utc: now,
    }
}
