//! Sales rollups kept in step with bookings.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Commission percentage given to an agent the first time they sell a plot.
pub fn default_commission() -> Decimal {
    Decimal::new(500, 2)
}

/// One row per (plot, client): the client's running deposit on that plot.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProjectSale {
    pub sale_id: i64,
    pub plot_id: i64,
    pub client_name: String,
    pub phase: Option<String>,
    pub purchase_price: Decimal,
    pub deposit: Decimal,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// One row per (plot, agent). Commission is only ever changed by an admin.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AgentSale {
    pub sale_id: i64,
    pub plot_id: i64,
    pub agent_name: String,
    pub phase: Option<String>,
    pub purchase_price: Decimal,
    pub commission: Decimal,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct ListSalesFilter {
    pub project_id: Option<i64>,
    pub plot_id: Option<i64>,
}
