use crate::models::{Booking, BookingStatus, PropertyType};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{validate_non_negative, validate_percentage, validate_positive};

// ============================================================================
// Projects
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProjectRequest {
    #[validate(length(min = 1, max = 200, message = "Project name is required"))]
    pub name: String,
    #[validate(length(min = 1, max = 200, message = "Location is required"))]
    pub location: String,
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub phases: Vec<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProjectRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 200))]
    pub location: Option<String>,
    pub size: Option<String>,
    pub description: Option<String>,
    pub phases: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct ListProjectsQuery {
    pub search: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AssignProjectRequest {
    pub user_id: i64,
}

// ============================================================================
// Plots
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePlotRequest {
    pub project_id: i64,
    #[validate(length(min = 1, max = 50, message = "Plot number is required"))]
    pub plot_number: String,
    #[validate(custom(function = "validate_positive"))]
    pub size: Decimal,
    #[validate(custom(function = "validate_positive"))]
    pub price: Decimal,
    pub property_type: PropertyType,
    #[serde(default)]
    pub phases: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListPlotsQuery {
    pub project_id: Option<i64>,
    pub is_available: Option<bool>,
}

// ============================================================================
// Bookings
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CreateBookingRequest {
    pub plot_id: i64,
    #[validate(length(min = 1, max = 200, message = "Customer name is required"))]
    pub customer_name: String,
    #[serde(default)]
    pub customer_contact: String,
    pub phase: Option<String>,
    /// Defaults to the plot price.
    #[validate(custom(function = "validate_positive"))]
    pub purchase_price: Option<Decimal>,
    #[serde(default)]
    #[validate(custom(function = "validate_non_negative"))]
    pub amount_paid: Decimal,
    pub payment_reference: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateBookingRequest {
    #[validate(length(min = 1, max = 200))]
    pub customer_name: Option<String>,
    pub customer_contact: Option<String>,
    pub status: Option<BookingStatus>,
    pub payment_reference: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListBookingsQuery {
    pub project_id: Option<i64>,
    pub plot_id: Option<i64>,
    pub status: Option<BookingStatus>,
}

/// A booking with its balance computed at read time.
#[derive(Debug, Serialize)]
pub struct BookingResponse {
    #[serde(flatten)]
    pub booking: Booking,
    pub balance: Decimal,
}

impl From<Booking> for BookingResponse {
    fn from(booking: Booking) -> Self {
        Self {
            balance: booking.balance(),
            booking,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct InstallmentRequest {
    #[validate(custom(function = "validate_positive"))]
    pub amount: Decimal,
    #[validate(length(min = 1, max = 200, message = "Agent name is required"))]
    pub agent_name: String,
}

// ============================================================================
// Sales
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ListSalesQuery {
    pub project_id: Option<i64>,
    pub plot_id: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateCommissionRequest {
    #[validate(custom(function = "validate_percentage"))]
    pub commission: Decimal,
}
