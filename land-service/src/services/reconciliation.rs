//! Brings local payments in line with what Pesapal reports.
//!
//! Both the customer's verify poll and the IPN webhook funnel into
//! [`ReconciliationEngine::reconcile`]. The payment row keyed by order
//! tracking id is the only serialisation point: every write is a
//! compare-and-swap on `pending`, so repeated or concurrent deliveries apply
//! at most one transition.

use crate::models::{
    CreatePayment, MerchantReference, Payment, PaymentSettlement, PaymentStatus, PaymentType,
    RenewalRecord, Subscription,
};
use crate::services::lifecycle::SubscriptionLifecycle;
use crate::services::metrics::record_reconciliation;
use crate::services::pesapal::{GatewayError, GatewayStatus, PesapalClient, TransactionStatus};
use crate::services::store::{AccountStore, BillingStore, Store};
use service_core::error::AppError;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileSource {
    Verification,
    Notification,
}

impl ReconcileSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileSource::Verification => "verification",
            ReconcileSource::Notification => "notification",
        }
    }
}

#[derive(Debug, Clone)]
pub enum ReconcileOutcome {
    /// Already terminal, or another reconciler got there first.
    AlreadyReconciled { payment: Option<Payment> },
    /// First payment confirmed; subscription activated.
    Activated {
        payment: Payment,
        subscription: Subscription,
    },
    /// Renewal payment confirmed; subscription renewed.
    Renewed {
        payment: Payment,
        subscription: Subscription,
    },
    Failed { payment: Payment },
    StillPending {
        payment: Option<Payment>,
        gateway_status: GatewayStatus,
    },
    /// Gateway-initiated recurring charge with no local payment.
    OrphanRenewed {
        payment: Payment,
        subscription: Subscription,
    },
}

impl ReconcileOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ReconcileOutcome::AlreadyReconciled { .. } => "already_reconciled",
            ReconcileOutcome::Activated { .. } => "activated",
            ReconcileOutcome::Renewed { .. } => "renewed",
            ReconcileOutcome::Failed { .. } => "failed",
            ReconcileOutcome::StillPending { .. } => "still_pending",
            ReconcileOutcome::OrphanRenewed { .. } => "orphan_renewed",
        }
    }

    /// The payment the outcome concerns, if any.
    pub fn payment(&self) -> Option<&Payment> {
        match self {
            ReconcileOutcome::AlreadyReconciled { payment }
            | ReconcileOutcome::StillPending { payment, .. } => payment.as_ref(),
            ReconcileOutcome::Activated { payment, .. }
            | ReconcileOutcome::Renewed { payment, .. }
            | ReconcileOutcome::Failed { payment }
            | ReconcileOutcome::OrphanRenewed { payment, .. } => Some(payment),
        }
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The gateway could not be asked; try again later.
    #[error("Payment status is inconclusive: {0}")]
    Inconclusive(#[from] GatewayError),

    /// An order we cannot tie to any user or subscription.
    #[error("Cannot attribute order: {0}")]
    Unresolvable(String),

    #[error(transparent)]
    Store(#[from] AppError),
}

impl ReconcileError {
    fn label(&self) -> &'static str {
        match self {
            ReconcileError::Inconclusive(_) => "inconclusive",
            ReconcileError::Unresolvable(_) => "unresolvable",
            ReconcileError::Store(_) => "store_error",
        }
    }
}

#[derive(Clone)]
pub struct ReconciliationEngine {
    store: Arc<dyn Store>,
    gateway: PesapalClient,
    lifecycle: SubscriptionLifecycle,
}

impl ReconciliationEngine {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: PesapalClient,
        lifecycle: SubscriptionLifecycle,
    ) -> Self {
        Self {
            store,
            gateway,
            lifecycle,
        }
    }

    /// Reconcile on behalf of a user polling for their own payment. The caller
    /// is expected to have checked ownership.
    pub async fn verify_payment(
        &self,
        order_tracking_id: &str,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        self.reconcile(order_tracking_id, None, ReconcileSource::Verification)
            .await
    }

    /// Reconcile an IPN delivery. May arrive more than once.
    pub async fn process_notification(
        &self,
        order_tracking_id: &str,
        merchant_reference: Option<&str>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        self.reconcile(
            order_tracking_id,
            merchant_reference,
            ReconcileSource::Notification,
        )
        .await
    }

    #[instrument(skip(self), fields(source = source.as_str()))]
    pub async fn reconcile(
        &self,
        order_tracking_id: &str,
        notified_reference: Option<&str>,
        source: ReconcileSource,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let result = self
            .run(order_tracking_id, notified_reference)
            .await;

        match &result {
            Ok(outcome) => {
                record_reconciliation(source.as_str(), outcome.label());
                info!(
                    order_tracking_id,
                    outcome = outcome.label(),
                    payment_id = ?outcome.payment().map(|p| p.payment_id),
                    "Payment reconciled"
                );
            }
            Err(e) => {
                record_reconciliation(source.as_str(), e.label());
                warn!(order_tracking_id, error = %e, "Payment reconciliation did not complete");
            }
        }

        result
    }

    async fn run(
        &self,
        order_tracking_id: &str,
        notified_reference: Option<&str>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let local = self.store.get_payment_by_order(order_tracking_id).await?;
        if let Some(payment) = &local {
            if payment.status().is_terminal() {
                return Ok(ReconcileOutcome::AlreadyReconciled {
                    payment: local,
                });
            }
        }

        // No store transaction is open across this call.
        let status = self.gateway.transaction_status(order_tracking_id).await?;

        match local {
            Some(payment) => self.apply_to_payment(payment, status).await,
            None => {
                self.apply_orphan(order_tracking_id, notified_reference, status)
                    .await
            }
        }
    }

    async fn apply_to_payment(
        &self,
        payment: Payment,
        status: TransactionStatus,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let order_tracking_id = payment.order_tracking_id.clone().unwrap_or_default();
        let metadata = serde_json::json!({ "gateway_status": status.raw });

        match status.status {
            GatewayStatus::Completed => {
                let subscription = self
                    .store
                    .get_subscription(payment.subscription_id)
                    .await?
                    .ok_or_else(|| {
                        AppError::NotFound(anyhow::anyhow!(
                            "Subscription {} not found",
                            payment.subscription_id
                        ))
                    })?;

                let renewal = payment.payment_type() == PaymentType::Renewal;
                let mut next = if renewal {
                    self.lifecycle.renewed(subscription, payment.plan_id).await?
                } else {
                    self.lifecycle.activated(subscription, payment.plan_id).await?
                };
                // Opting in at first checkout enrols the gateway's recurring
                // billing; a one-off renewal leaves the flag as it was.
                if !renewal && payment.is_recurring {
                    next.recurring_payment_active = true;
                }

                let settlement = PaymentSettlement {
                    order_tracking_id: order_tracking_id.clone(),
                    transaction_id: status.confirmation_code.clone(),
                    payment_method: status.payment_method.clone(),
                    metadata,
                    subscription: next.clone(),
                };

                match self.store.settle_payment(&settlement).await? {
                    Some(payment) if renewal => Ok(ReconcileOutcome::Renewed {
                        payment,
                        subscription: next,
                    }),
                    Some(payment) => Ok(ReconcileOutcome::Activated {
                        payment,
                        subscription: next,
                    }),
                    None => Ok(ReconcileOutcome::AlreadyReconciled {
                        payment: self.store.get_payment_by_order(&order_tracking_id).await?,
                    }),
                }
            }
            GatewayStatus::Failed => {
                match self
                    .store
                    .fail_payment(&order_tracking_id, &metadata)
                    .await?
                {
                    Some(payment) => Ok(ReconcileOutcome::Failed { payment }),
                    None => Ok(ReconcileOutcome::AlreadyReconciled {
                        payment: self.store.get_payment_by_order(&order_tracking_id).await?,
                    }),
                }
            }
            other => Ok(ReconcileOutcome::StillPending {
                payment: Some(payment),
                gateway_status: other,
            }),
        }
    }

    async fn apply_orphan(
        &self,
        order_tracking_id: &str,
        notified_reference: Option<&str>,
        status: TransactionStatus,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let raw_reference = status
            .merchant_reference
            .as_deref()
            .or(notified_reference)
            .unwrap_or_default();
        let reference = status
            .merchant_reference
            .as_deref()
            .and_then(MerchantReference::parse)
            .or_else(|| notified_reference.and_then(MerchantReference::parse))
            .ok_or_else(|| {
                ReconcileError::Unresolvable(format!(
                    "unrecognised merchant reference '{}'",
                    raw_reference
                ))
            })?;

        let user_id = reference.user_id();
        if self.store.get_user(user_id).await?.is_none() {
            return Err(ReconcileError::Unresolvable(format!(
                "user {} does not exist",
                user_id
            )));
        }
        let subscription = self
            .store
            .get_subscription_for_user(user_id)
            .await?
            .ok_or_else(|| {
                ReconcileError::Unresolvable(format!("user {} has no subscription", user_id))
            })?;

        if status.status != GatewayStatus::Completed {
            return Ok(ReconcileOutcome::StillPending {
                payment: None,
                gateway_status: status.status,
            });
        }

        let plan = match subscription.plan_id {
            Some(plan_id) => self.store.get_plan(plan_id).await?,
            None => None,
        };
        let plan_id = subscription.plan_id;
        let mut renewed = self.lifecycle.renewed(subscription, None).await?;
        renewed.recurring_payment_active = true;

        let amount = status
            .amount
            .or_else(|| plan.as_ref().map(|p| p.amount))
            .unwrap_or_default();
        let currency = status
            .currency
            .clone()
            .filter(|c| !c.is_empty())
            .or_else(|| plan.as_ref().map(|p| p.currency.clone()))
            .unwrap_or_else(|| self.gateway.config().currency.clone());

        let record = RenewalRecord {
            payment: CreatePayment {
                user_id,
                subscription_id: renewed.subscription_id,
                plan_id,
                amount,
                currency,
                payment_type: PaymentType::Renewal,
                status: PaymentStatus::Successful,
                order_tracking_id: Some(order_tracking_id.to_string()),
                // A recurring charge reuses the original reference, which is
                // already taken; keep ours unique per order.
                merchant_reference: format!("{}-{}", reference, order_tracking_id),
                transaction_id: status.confirmation_code.clone(),
                payment_method: status.payment_method.clone(),
                is_recurring: true,
                recurring_frequency: plan.as_ref().map(|p| p.gateway_frequency().to_string()),
                metadata: serde_json::json!({
                    "gateway_status": status.raw,
                    "gateway_merchant_reference": reference.to_string(),
                }),
            },
            subscription: renewed.clone(),
        };

        match self.store.record_renewal(&record).await? {
            Some(payment) => Ok(ReconcileOutcome::OrphanRenewed {
                payment,
                subscription: renewed,
            }),
            None => Ok(ReconcileOutcome::AlreadyReconciled {
                payment: self.store.get_payment_by_order(order_tracking_id).await?,
            }),
        }
    }
}
