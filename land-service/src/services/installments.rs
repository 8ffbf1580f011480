//! Installment payments on bookings.

use crate::models::Booking;
use crate::services::access_scope::Scope;
use crate::services::metrics::record_installment;
use crate::services::store::{LandStore, Store};
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::{info, instrument};

/// What one installment did to the booking.
#[derive(Debug, Clone, Serialize)]
pub struct InstallmentReceipt {
    pub booking_id: i64,
    pub plot_id: i64,
    pub agent_name: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub previous_deposit: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub new_deposit: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub purchase_price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub balance: Decimal,
}

#[derive(Clone)]
pub struct InstallmentLedger {
    store: Arc<dyn Store>,
}

impl InstallmentLedger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Load a booking the scope permits. Anything else reads as not found.
    pub async fn visible_booking(&self, scope: &Scope, booking_id: i64) -> Result<Booking, AppError> {
        let not_found = || AppError::NotFound(anyhow::anyhow!("Booking {} not found", booking_id));

        let booking = self.store.get_booking(booking_id).await?.ok_or_else(not_found)?;
        let plot = self.store.get_plot(booking.plot_id).await?.ok_or_else(not_found)?;
        let project = self
            .store
            .get_project(plot.project_id)
            .await?
            .ok_or_else(not_found)?;

        if scope.permits_booking(&booking, &project) {
            Ok(booking)
        } else {
            Err(not_found())
        }
    }

    /// Add `amount` to the booking's deposit and refresh the sales rollups.
    /// There is no cap: paying past the price leaves a negative balance.
    #[instrument(skip(self, scope))]
    pub async fn pay(
        &self,
        scope: &Scope,
        booking_id: i64,
        agent_name: &str,
        amount: Decimal,
    ) -> Result<InstallmentReceipt, AppError> {
        if amount <= Decimal::ZERO {
            record_installment("rejected");
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Installment amount must be greater than zero"
            )));
        }
        let agent_name = agent_name.trim();
        if agent_name.is_empty() {
            record_installment("rejected");
            return Err(AppError::BadRequest(anyhow::anyhow!("Agent name is required")));
        }

        self.visible_booking(scope, booking_id).await?;

        let applied = self
            .store
            .apply_installment(booking_id, agent_name, amount)
            .await?;
        let booking = applied.booking;

        record_installment("applied");
        info!(
            booking_id,
            previous_deposit = %applied.previous_deposit,
            new_deposit = %booking.amount_paid,
            "Installment recorded"
        );

        Ok(InstallmentReceipt {
            booking_id: booking.booking_id,
            plot_id: booking.plot_id,
            agent_name: agent_name.to_string(),
            amount,
            previous_deposit: applied.previous_deposit,
            new_deposit: booking.amount_paid,
            purchase_price: booking.purchase_price,
            balance: booking.balance(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CreateBooking, CreatePlot, CreateProject, ListSalesFilter, PropertyType};
    use crate::services::store::InMemoryStore;

    async fn booked(price: i64, paid: i64) -> (Arc<InMemoryStore>, InstallmentLedger, Booking) {
        let store = Arc::new(InMemoryStore::new());
        let admin = store.seed_user("owner", "admin", true).await;
        let project = store
            .create_project(&CreateProject {
                owner_id: admin.user_id,
                name: "Malaa Gardens".to_string(),
                location: "Malaa".to_string(),
                size: "5 acres".to_string(),
                description: String::new(),
                phases: vec!["Phase 1".to_string()],
            })
            .await
            .unwrap();
        let plot = store
            .create_plot(&CreatePlot {
                project_id: project.project_id,
                plot_number: "A1".to_string(),
                size: Decimal::new(50, 2),
                price: Decimal::from(price),
                property_type: PropertyType::Residential,
                phases: vec!["Phase 1".to_string()],
            })
            .await
            .unwrap();
        let booking = store
            .create_booking(&CreateBooking {
                plot_id: plot.plot_id,
                created_by: admin.user_id,
                customer_name: "Wanjiru".to_string(),
                customer_contact: "0700000000".to_string(),
                phase: Some("Phase 1".to_string()),
                purchase_price: Decimal::from(price),
                amount_paid: Decimal::from(paid),
                payment_reference: None,
            })
            .await
            .unwrap();
        let ledger = InstallmentLedger::new(store.clone());
        (store, ledger, booking)
    }

    #[tokio::test]
    async fn installment_adds_to_deposit_and_rollups() {
        let (store, ledger, booking) = booked(10_000, 2_000).await;

        let receipt = ledger
            .pay(&Scope::Unrestricted, booking.booking_id, "Kamau", Decimal::from(3_000))
            .await
            .unwrap();

        assert_eq!(receipt.previous_deposit, Decimal::from(2_000));
        assert_eq!(receipt.new_deposit, Decimal::from(5_000));
        assert_eq!(receipt.balance, Decimal::from(5_000));

        let filter = ListSalesFilter::default();
        let project_sales = store
            .list_project_sales(&Scope::Unrestricted, &filter)
            .await
            .unwrap();
        assert_eq!(project_sales.len(), 1);
        assert_eq!(project_sales[0].deposit, Decimal::from(5_000));

        let agent_sales = store
            .list_agent_sales(&Scope::Unrestricted, &filter)
            .await
            .unwrap();
        assert_eq!(agent_sales.len(), 1);
        assert_eq!(agent_sales[0].agent_name, "Kamau");
        assert_eq!(agent_sales[0].commission, Decimal::from(5));
    }

    #[tokio::test]
    async fn overpayment_leaves_negative_balance() {
        let (_store, ledger, booking) = booked(1_000, 900).await;

        let receipt = ledger
            .pay(&Scope::Unrestricted, booking.booking_id, "Kamau", Decimal::from(300))
            .await
            .unwrap();

        assert_eq!(receipt.balance, Decimal::from(-200));
    }

    #[tokio::test]
    async fn non_positive_amount_is_rejected() {
        let (_store, ledger, booking) = booked(1_000, 0).await;

        for amount in [Decimal::ZERO, Decimal::from(-5)] {
            assert!(matches!(
                ledger
                    .pay(&Scope::Unrestricted, booking.booking_id, "Kamau", amount)
                    .await,
                Err(AppError::BadRequest(_))
            ));
        }
    }

    #[tokio::test]
    async fn booking_outside_scope_is_not_found() {
        let (_store, ledger, booking) = booked(1_000, 0).await;

        let result = ledger
            .pay(&Scope::Denied, booking.booking_id, "Kamau", Decimal::from(100))
            .await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn commission_is_kept_on_later_installments() {
        let (store, ledger, booking) = booked(10_000, 0).await;
        ledger
            .pay(&Scope::Unrestricted, booking.booking_id, "Kamau", Decimal::from(100))
            .await
            .unwrap();
        let sale = store
            .list_agent_sales(&Scope::Unrestricted, &ListSalesFilter::default())
            .await
            .unwrap()
            .remove(0);
        store
            .update_agent_commission(sale.sale_id, Decimal::from(7))
            .await
            .unwrap();

        ledger
            .pay(&Scope::Unrestricted, booking.booking_id, "Kamau", Decimal::from(100))
            .await
            .unwrap();

        let sale = store.get_agent_sale(sale.sale_id).await.unwrap().unwrap();
        assert_eq!(sale.commission, Decimal::from(7));
    }
}
