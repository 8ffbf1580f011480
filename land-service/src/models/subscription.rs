//! Subscription model and its state transitions.
//!
//! Transitions are plain functions of the current row, the plan and `now`.
//! Persisting the result is the caller's job, which keeps every transition
//! usable inside a single store transaction.

use super::plan::{plan_duration_days, Plan};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Expired,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "active" => SubscriptionStatus::Active,
            "expired" => SubscriptionStatus::Expired,
            "cancelled" => SubscriptionStatus::Cancelled,
            _ => SubscriptionStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub subscription_id: i64,
    pub user_id: i64,
    pub plan_id: Option<i64>,
    pub status: String,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub auto_renew: bool,
    pub recurring_payment_active: bool,
    pub last_recurring_payment_date: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Subscription {
    pub fn status(&self) -> SubscriptionStatus {
        SubscriptionStatus::from_string(&self.status)
    }

    /// Start a fresh period at `now`. The end date is absolute, never added
    /// to whatever time was left.
    pub fn activate(&mut self, plan: Option<&Plan>, now: DateTime<Utc>) {
        self.status = SubscriptionStatus::Active.as_str().to_string();
        self.start_date = Some(now);
        self.end_date = Some(now + Duration::days(plan_duration_days(plan)));
        self.updated_utc = now;
    }

    pub fn renew(&mut self, plan: Option<&Plan>, now: DateTime<Utc>) {
        self.activate(plan, now);
        self.last_recurring_payment_date = Some(now);
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) {
        self.status = SubscriptionStatus::Cancelled.as_str().to_string();
        self.auto_renew = false;
        self.updated_utc = now;
    }

    /// Active on paper but past its end date. An active row without an end
    /// date counts as lapsed.
    pub fn has_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.status() == SubscriptionStatus::Active
            && self.end_date.map(|end| now >= end).unwrap_or(true)
    }

    /// Apply lazy expiry. Returns whether the subscription grants access.
    pub fn refresh(&mut self, now: DateTime<Utc>) -> bool {
        if self.has_lapsed(now) {
            self.status = SubscriptionStatus::Expired.as_str().to_string();
            self.updated_utc = now;
            return false;
        }
        self.status() == SubscriptionStatus::Active
    }

    pub fn days_remaining(&self, now: DateTime<Utc>) -> i64 {
        match (self.status(), self.end_date) {
            (SubscriptionStatus::Active, Some(end)) if end > now => (end - now).num_days(),
            _ => 0,
        }
    }
}

#[cfg(test)]
pub(crate) fn pending_subscription(user_id: i64, plan_id: Option<i64>) -> Subscription {
    let now = Utc::now();
    Subscription {
        subscription_id: 1,
        user_id,
        plan_id,
        status: SubscriptionStatus::Pending.as_str().to_string(),
        start_date: None,
        end_date: None,
        auto_renew: true,
        recurring_payment_active: false,
        last_recurring_payment_date: None,
        created_utc: now,
        updated_utc: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::plan::{sample_plan, PlanPeriod};

    #[test]
    fn activate_sets_absolute_period_from_plan() {
        let now = Utc::now();
        let plan = sample_plan(PlanPeriod::Monthly, 3);
        let mut sub = pending_subscription(7, Some(plan.plan_id));

        sub.activate(Some(&plan), now);

        assert_eq!(sub.status(), SubscriptionStatus::Active);
        assert_eq!(sub.start_date, Some(now));
        assert_eq!(sub.end_date, Some(now + Duration::days(90)));
    }

    #[test]
    fn activate_does_not_stack_remaining_time() {
        let now = Utc::now();
        let plan = sample_plan(PlanPeriod::Monthly, 1);
        let mut sub = pending_subscription(7, Some(plan.plan_id));
        sub.activate(Some(&plan), now - Duration::days(10));

        sub.activate(Some(&plan), now);

        assert_eq!(sub.end_date, Some(now + Duration::days(30)));
    }

    #[test]
    fn activate_without_plan_grants_thirty_days() {
        let now = Utc::now();
        let mut sub = pending_subscription(7, None);
        sub.activate(None, now);
        assert_eq!(sub.end_date, Some(now + Duration::days(30)));
    }

    #[test]
    fn renew_stamps_last_recurring_payment() {
        let now = Utc::now();
        let plan = sample_plan(PlanPeriod::Weekly, 1);
        let mut sub = pending_subscription(7, Some(plan.plan_id));

        sub.renew(Some(&plan), now);

        assert_eq!(sub.status(), SubscriptionStatus::Active);
        assert_eq!(sub.last_recurring_payment_date, Some(now));
        assert_eq!(sub.end_date, Some(now + Duration::days(7)));
    }

    #[test]
    fn refresh_expires_lapsed_subscription_once() {
        let now = Utc::now();
        let mut sub = pending_subscription(7, None);
        sub.activate(None, now - Duration::days(31));

        assert!(!sub.refresh(now));
        assert_eq!(sub.status(), SubscriptionStatus::Expired);

        let snapshot = sub.clone();
        assert!(!sub.refresh(now));
        assert_eq!(sub.status, snapshot.status);
        assert_eq!(sub.updated_utc, snapshot.updated_utc);
    }

    #[test]
    fn refresh_keeps_current_subscription_active() {
        let now = Utc::now();
        let mut sub = pending_subscription(7, None);
        sub.activate(None, now);

        assert!(sub.refresh(now + Duration::days(29)));
        assert!(sub.refresh(now + Duration::days(29)));
        assert_eq!(sub.status(), SubscriptionStatus::Active);
        assert!(!sub.refresh(now + Duration::days(30)));
    }

    #[test]
    fn pending_and_cancelled_never_grant_access() {
        let now = Utc::now();
        let mut sub = pending_subscription(7, None);
        assert!(!sub.refresh(now));
        assert_eq!(sub.status(), SubscriptionStatus::Pending);

        sub.cancel(now);
        assert!(!sub.refresh(now));
        assert_eq!(sub.status(), SubscriptionStatus::Cancelled);
        assert!(!sub.auto_renew);
    }

    #[test]
    fn cancel_is_idempotent() {
        let now = Utc::now();
        let mut sub = pending_subscription(7, None);
        sub.activate(None, now);
        sub.cancel(now);
        let first = sub.clone();
        sub.cancel(now);
        assert_eq!(sub.status, first.status);
        assert_eq!(sub.auto_renew, first.auto_renew);
        assert_eq!(sub.end_date, first.end_date);
    }
}
