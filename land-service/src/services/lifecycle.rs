//! Subscription lifecycle: activation, lazy expiry, cancellation and
//! administrative grants.

use crate::models::{Plan, Subscription, SubscriptionStatus};
use crate::services::metrics::record_subscription_operation;
use crate::services::store::{BillingStore, Store};
use chrono::Utc;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::{info, instrument};

#[derive(Clone)]
pub struct SubscriptionLifecycle {
    store: Arc<dyn Store>,
}

impl SubscriptionLifecycle {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    async fn plan_for(&self, plan_id: Option<i64>) -> Result<Option<Plan>, AppError> {
        match plan_id {
            Some(id) => self.store.get_plan(id).await,
            None => Ok(None),
        }
    }

    /// The user's subscription with lazy expiry applied, if one exists.
    #[instrument(skip(self))]
    pub async fn current(&self, user_id: i64) -> Result<Option<Subscription>, AppError> {
        match self.store.get_subscription_for_user(user_id).await? {
            Some(mut subscription) => {
                self.check_and_refresh(&mut subscription).await?;
                Ok(Some(subscription))
            }
            None => Ok(None),
        }
    }

    /// Whether `subscription` grants access right now. A lapsed active row is
    /// persisted as expired; if another writer renewed it first, the fresh
    /// row wins.
    #[instrument(skip(self, subscription), fields(subscription_id = subscription.subscription_id))]
    pub async fn check_and_refresh(&self, subscription: &mut Subscription) -> Result<bool, AppError> {
        let now = Utc::now();
        if !subscription.has_lapsed(now) {
            return Ok(subscription.status() == SubscriptionStatus::Active);
        }

        if self
            .store
            .expire_subscription(subscription.subscription_id, now)
            .await?
        {
            record_subscription_operation("expire");
            return Ok(subscription.refresh(now));
        }

        match self
            .store
            .get_subscription(subscription.subscription_id)
            .await?
        {
            Some(latest) => {
                *subscription = latest;
                Ok(subscription.refresh(now))
            }
            None => Ok(subscription.refresh(now)),
        }
    }

    /// The plan a confirmed payment buys: the one recorded on the payment,
    /// else whatever the subscription already points at. The subscription is
    /// re-pointed to it.
    async fn paid_plan(
        &self,
        subscription: &mut Subscription,
        payment_plan_id: Option<i64>,
    ) -> Result<Option<Plan>, AppError> {
        let plan = self
            .plan_for(payment_plan_id.or(subscription.plan_id))
            .await?;
        if let Some(plan) = &plan {
            subscription.plan_id = Some(plan.plan_id);
        }
        Ok(plan)
    }

    /// State after a confirmed first payment, not yet persisted.
    pub async fn activated(
        &self,
        mut subscription: Subscription,
        payment_plan_id: Option<i64>,
    ) -> Result<Subscription, AppError> {
        let plan = self.paid_plan(&mut subscription, payment_plan_id).await?;
        subscription.activate(plan.as_ref(), Utc::now());
        Ok(subscription)
    }

    /// State after a confirmed renewal payment, not yet persisted. Whether
    /// the gateway keeps billing is decided by the caller.
    pub async fn renewed(
        &self,
        mut subscription: Subscription,
        payment_plan_id: Option<i64>,
    ) -> Result<Subscription, AppError> {
        let plan = self.paid_plan(&mut subscription, payment_plan_id).await?;
        subscription.renew(plan.as_ref(), Utc::now());
        Ok(subscription)
    }

    /// Cancel the user's subscription. Access ends immediately and no further
    /// renewals are expected. Cancelling twice is a no-op.
    #[instrument(skip(self))]
    pub async fn cancel(&self, user_id: i64) -> Result<Subscription, AppError> {
        let mut subscription = self
            .store
            .get_subscription_for_user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("No subscription found")))?;

        if subscription.status() == SubscriptionStatus::Cancelled {
            return Ok(subscription);
        }

        subscription.cancel(Utc::now());
        subscription.recurring_payment_active = false;
        let saved = self.store.save_subscription(&subscription).await?;

        record_subscription_operation("cancel");
        info!(subscription_id = saved.subscription_id, "Subscription cancelled");

        Ok(saved)
    }

    /// The user's subscription row, created pending on `plan` when it does
    /// not exist yet. An existing row keeps its plan, status and period until
    /// a payment for the new plan is confirmed.
    #[instrument(skip(self, plan), fields(plan_id = plan.plan_id))]
    pub async fn prepare(&self, user_id: i64, plan: &Plan) -> Result<Subscription, AppError> {
        self.store
            .ensure_subscription(user_id, Some(plan.plan_id))
            .await
    }

    /// Activate `plan` for a user without a payment.
    #[instrument(skip(self, plan), fields(plan_id = plan.plan_id))]
    pub async fn grant(&self, user_id: i64, plan: &Plan) -> Result<Subscription, AppError> {
        let mut subscription = self
            .store
            .ensure_subscription(user_id, Some(plan.plan_id))
            .await?;
        subscription.plan_id = Some(plan.plan_id);
        subscription.activate(Some(plan), Utc::now());
        let saved = self.store.save_subscription(&subscription).await?;

        record_subscription_operation("grant");
        info!(user_id, end_date = ?saved.end_date, "Subscription granted");

        Ok(saved)
    }
}
