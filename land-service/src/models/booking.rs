//! Booking model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Booked,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Booked => "booked",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "confirmed" => BookingStatus::Confirmed,
            "cancelled" => BookingStatus::Cancelled,
            _ => BookingStatus::Booked,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Booking {
    pub booking_id: i64,
    pub plot_id: i64,
    pub created_by: i64,
    pub customer_name: String,
    pub customer_contact: String,
    pub phase: Option<String>,
    pub purchase_price: Decimal,
    pub amount_paid: Decimal,
    pub status: String,
    pub payment_reference: Option<String>,
    pub booking_date: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Booking {
    /// Outstanding amount. Negative when the customer overpaid.
    pub fn balance(&self) -> Decimal {
        self.purchase_price - self.amount_paid
    }

    pub fn status(&self) -> BookingStatus {
        BookingStatus::from_string(&self.status)
    }
}

#[derive(Debug, Clone)]
pub struct CreateBooking {
    pub plot_id: i64,
    pub created_by: i64,
    pub customer_name: String,
    pub customer_contact: String,
    pub phase: Option<String>,
    pub purchase_price: Decimal,
    pub amount_paid: Decimal,
    pub payment_reference: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateBooking {
    pub customer_name: Option<String>,
    pub customer_contact: Option<String>,
    pub status: Option<BookingStatus>,
    pub payment_reference: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ListBookingsFilter {
    pub project_id: Option<i64>,
    pub plot_id: Option<i64>,
    pub status: Option<BookingStatus>,
}

/// Outcome of one installment, as committed.
#[derive(Debug, Clone)]
pub struct InstallmentApplied {
    pub previous_deposit: Decimal,
    pub booking: Booking,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booking(price: i64, paid: i64) -> Booking {
        let now = Utc::now();
        Booking {
            booking_id: 1,
            plot_id: 1,
            created_by: 1,
            customer_name: "Achieng".to_string(),
            customer_contact: String::new(),
            phase: None,
            purchase_price: Decimal::from(price),
            amount_paid: Decimal::from(paid),
            status: "booked".to_string(),
            payment_reference: None,
            booking_date: now,
            updated_utc: now,
        }
    }

    #[test]
    fn balance_is_price_minus_paid() {
        assert_eq!(booking(10_000, 2_000).balance(), Decimal::from(8_000));
    }

    #[test]
    fn overpayment_gives_negative_balance() {
        assert_eq!(booking(10_000, 12_500).balance(), Decimal::from(-2_500));
    }
}
