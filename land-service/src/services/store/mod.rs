//! Persistence seams for land-service.
//!
//! Handlers and services talk to `Arc<dyn Store>`. Production wires in the
//! Postgres [`Database`]; tests use [`InMemoryStore`]. Every multi-row write
//! that must be all-or-nothing is a single trait method so each backend can
//! make it atomic.

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::Database;

use crate::models::{
    AgentSale, AuditEntry, Booking, CreateAuditEntry, CreateBooking, CreatePayment, CreatePlan,
    CreatePlot, CreateProject, CreateUser, InstallmentApplied, ListAuditFilter,
    ListBookingsFilter, ListPlotsFilter, ListProjectsFilter, ListSalesFilter, ListUsersFilter,
    Payment, PaymentSettlement, Plan, Plot, Project, ProjectAssignment, ProjectSale,
    RenewalRecord, Subscription, UpdateBooking, UpdatePlan, UpdateProject, UpdateUser, User,
};
use crate::services::access_scope::Scope;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;

/// Users, project assignments and the audit trail.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn health_check(&self) -> Result<(), AppError>;

    async fn create_user(&self, input: &CreateUser) -> Result<User, AppError>;

    async fn get_user(&self, user_id: i64) -> Result<Option<User>, AppError>;

    async fn list_users(&self, filter: &ListUsersFilter) -> Result<Vec<User>, AppError>;

    async fn update_user(&self, user_id: i64, input: &UpdateUser)
        -> Result<Option<User>, AppError>;

    /// Removes the user and everything it owns.
    async fn delete_user(&self, user_id: i64) -> Result<bool, AppError>;

    /// Idempotent: assigning twice returns the existing assignment.
    async fn assign_project(
        &self,
        project_id: i64,
        user_id: i64,
    ) -> Result<ProjectAssignment, AppError>;

    async fn unassign_project(&self, project_id: i64, user_id: i64) -> Result<bool, AppError>;

    async fn list_assigned_project_ids(&self, user_id: i64) -> Result<Vec<i64>, AppError>;

    async fn record_audit(&self, input: &CreateAuditEntry) -> Result<AuditEntry, AppError>;

    async fn list_audit(&self, filter: &ListAuditFilter) -> Result<Vec<AuditEntry>, AppError>;
}

/// Plans, subscriptions and gateway payments.
#[async_trait]
pub trait BillingStore: Send + Sync {
    async fn create_plan(&self, input: &CreatePlan) -> Result<Plan, AppError>;

    async fn get_plan(&self, plan_id: i64) -> Result<Option<Plan>, AppError>;

    async fn list_plans(&self, include_inactive: bool) -> Result<Vec<Plan>, AppError>;

    async fn update_plan(&self, plan_id: i64, input: &UpdatePlan)
        -> Result<Option<Plan>, AppError>;

    async fn get_subscription(&self, subscription_id: i64)
        -> Result<Option<Subscription>, AppError>;

    async fn get_subscription_for_user(&self, user_id: i64)
        -> Result<Option<Subscription>, AppError>;

    /// Get-or-create the user's single subscription row. A new row starts
    /// pending on `plan_id`; an existing row is returned unchanged unless it
    /// has no plan yet.
    async fn ensure_subscription(
        &self,
        user_id: i64,
        plan_id: Option<i64>,
    ) -> Result<Subscription, AppError>;

    async fn save_subscription(&self, subscription: &Subscription)
        -> Result<Subscription, AppError>;

    /// Flip an active subscription to expired, but only if it is still active
    /// and lapsed at `now`. Returns whether a row changed.
    async fn expire_subscription(
        &self,
        subscription_id: i64,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    async fn create_payment(&self, input: &CreatePayment) -> Result<Payment, AppError>;

    async fn attach_order_tracking_id(
        &self,
        payment_id: i64,
        order_tracking_id: &str,
    ) -> Result<Payment, AppError>;

    /// Cancel a payment that never reached the gateway.
    async fn cancel_pending_payment(&self, payment_id: i64, reason: &str)
        -> Result<bool, AppError>;

    async fn get_payment_by_order(
        &self,
        order_tracking_id: &str,
    ) -> Result<Option<Payment>, AppError>;

    async fn list_payments_for_user(&self, user_id: i64) -> Result<Vec<Payment>, AppError>;

    /// Atomically move the pending payment to successful and persist the
    /// subscription state. `None` when the payment was no longer pending, in
    /// which case nothing is written.
    async fn settle_payment(
        &self,
        settlement: &PaymentSettlement,
    ) -> Result<Option<Payment>, AppError>;

    /// Move a pending payment to failed. `None` when it was no longer pending.
    async fn fail_payment(
        &self,
        order_tracking_id: &str,
        metadata: &serde_json::Value,
    ) -> Result<Option<Payment>, AppError>;

    /// Atomically insert a gateway-initiated renewal payment and persist the
    /// renewed subscription. `None` when the order was already recorded.
    async fn record_renewal(&self, record: &RenewalRecord) -> Result<Option<Payment>, AppError>;
}

/// Projects, plots, bookings and sales rollups.
#[async_trait]
pub trait LandStore: Send + Sync {
    async fn create_project(&self, input: &CreateProject) -> Result<Project, AppError>;

    async fn get_project(&self, project_id: i64) -> Result<Option<Project>, AppError>;

    async fn list_projects(
        &self,
        scope: &Scope,
        filter: &ListProjectsFilter,
    ) -> Result<Vec<Project>, AppError>;

    async fn update_project(
        &self,
        project_id: i64,
        input: &UpdateProject,
    ) -> Result<Option<Project>, AppError>;

    async fn delete_project(&self, project_id: i64) -> Result<bool, AppError>;

    async fn create_plot(&self, input: &CreatePlot) -> Result<Plot, AppError>;

    async fn get_plot(&self, plot_id: i64) -> Result<Option<Plot>, AppError>;

    async fn list_plots(
        &self,
        scope: &Scope,
        filter: &ListPlotsFilter,
    ) -> Result<Vec<Plot>, AppError>;

    /// Claims the plot and inserts the booking together. Conflict when the
    /// plot is already taken.
    async fn create_booking(&self, input: &CreateBooking) -> Result<Booking, AppError>;

    async fn get_booking(&self, booking_id: i64) -> Result<Option<Booking>, AppError>;

    async fn list_bookings(
        &self,
        scope: &Scope,
        filter: &ListBookingsFilter,
    ) -> Result<Vec<Booking>, AppError>;

    async fn update_booking(
        &self,
        booking_id: i64,
        input: &UpdateBooking,
    ) -> Result<Option<Booking>, AppError>;

    /// Deletes the booking and releases its plot together.
    async fn delete_booking(&self, booking_id: i64) -> Result<bool, AppError>;

    /// Adds `amount` to the booking's deposit and upserts both sales rollups
    /// for `agent_name`, all under a lock on the booking row.
    async fn apply_installment(
        &self,
        booking_id: i64,
        agent_name: &str,
        amount: Decimal,
    ) -> Result<InstallmentApplied, AppError>;

    async fn list_project_sales(
        &self,
        scope: &Scope,
        filter: &ListSalesFilter,
    ) -> Result<Vec<ProjectSale>, AppError>;

    async fn list_agent_sales(
        &self,
        scope: &Scope,
        filter: &ListSalesFilter,
    ) -> Result<Vec<AgentSale>, AppError>;

    async fn get_agent_sale(&self, sale_id: i64) -> Result<Option<AgentSale>, AppError>;

    async fn update_agent_commission(
        &self,
        sale_id: i64,
        commission: Decimal,
    ) -> Result<Option<AgentSale>, AppError>;
}

/// Everything the service persists.
pub trait Store: AccountStore + BillingStore + LandStore {}

impl<T: AccountStore + BillingStore + LandStore> Store for T {}
