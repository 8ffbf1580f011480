//! In-memory store used by tests and local runs without Postgres.
//!
//! All state sits behind one lock, so every trait method is atomic in the
//! same way its Postgres counterpart is.

use super::{AccountStore, BillingStore, LandStore};
use crate::models::{
    default_commission, AgentSale, AuditEntry, Booking, BookingStatus, CreateAuditEntry,
    CreateBooking, CreatePayment, CreatePlan, CreatePlot, CreateProject, CreateUser,
    InstallmentApplied, ListAuditFilter, ListBookingsFilter, ListPlotsFilter, ListProjectsFilter,
    ListSalesFilter, ListUsersFilter, Payment, PaymentSettlement, PaymentStatus, Plan, Plot,
    Project, ProjectAssignment, ProjectSale, RenewalRecord, Subscription, SubscriptionStatus,
    UpdateBooking, UpdatePlan, UpdateProject, UpdateUser, User,
};
use crate::services::access_scope::Scope;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    users: BTreeMap<i64, User>,
    assignments: BTreeMap<(i64, i64), ProjectAssignment>,
    audit: Vec<AuditEntry>,
    plans: BTreeMap<i64, Plan>,
    subscriptions: BTreeMap<i64, Subscription>,
    payments: BTreeMap<i64, Payment>,
    projects: BTreeMap<i64, Project>,
    plots: BTreeMap<i64, Plot>,
    bookings: BTreeMap<i64, Booking>,
    project_sales: BTreeMap<i64, ProjectSale>,
    agent_sales: BTreeMap<i64, AgentSale>,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn project_of_plot(&self, plot_id: i64) -> Option<&Project> {
        self.plots
            .get(&plot_id)
            .and_then(|plot| self.projects.get(&plot.project_id))
    }

    fn plot_visible(&self, scope: &Scope, plot_id: i64) -> bool {
        self.project_of_plot(plot_id)
            .map(|project| scope.permits_project(project))
            .unwrap_or(false)
    }

    fn insert_payment(&mut self, input: &CreatePayment) -> Result<Payment, AppError> {
        let duplicate = self.payments.values().any(|p| {
            p.merchant_reference == input.merchant_reference
                || (input.order_tracking_id.is_some()
                    && p.order_tracking_id == input.order_tracking_id)
        });
        if duplicate {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Payment reference already recorded"
            )));
        }

        let now = Utc::now();
        let payment = Payment {
            payment_id: self.next_id(),
            user_id: input.user_id,
            subscription_id: input.subscription_id,
            plan_id: input.plan_id,
            amount: input.amount,
            currency: input.currency.clone(),
            payment_type: input.payment_type.as_str().to_string(),
            status: input.status.as_str().to_string(),
            order_tracking_id: input.order_tracking_id.clone(),
            merchant_reference: input.merchant_reference.clone(),
            transaction_id: input.transaction_id.clone(),
            payment_method: input.payment_method.clone(),
            is_recurring: input.is_recurring,
            recurring_frequency: input.recurring_frequency.clone(),
            metadata: input.metadata.clone(),
            created_utc: now,
            updated_utc: now,
        };
        self.payments.insert(payment.payment_id, payment.clone());
        Ok(payment)
    }

    fn write_subscription(&mut self, subscription: &Subscription) -> Result<Subscription, AppError> {
        match self.subscriptions.get_mut(&subscription.subscription_id) {
            Some(stored) => {
                stored.plan_id = subscription.plan_id;
                stored.status = subscription.status.clone();
                stored.start_date = subscription.start_date;
                stored.end_date = subscription.end_date;
                stored.auto_renew = subscription.auto_renew;
                stored.recurring_payment_active = subscription.recurring_payment_active;
                stored.last_recurring_payment_date = subscription.last_recurring_payment_date;
                stored.updated_utc = subscription.updated_utc;
                Ok(stored.clone())
            }
            None => Err(AppError::NotFound(anyhow::anyhow!(
                "Subscription {} not found",
                subscription.subscription_id
            ))),
        }
    }

    fn pending_payment_by_order(&mut self, order_tracking_id: &str) -> Option<&mut Payment> {
        self.payments.values_mut().find(|p| {
            p.order_tracking_id.as_deref() == Some(order_tracking_id)
                && p.status() == PaymentStatus::Pending
        })
    }

    /// Mark the plot available again once no booking holds it.
    fn release_plot(&mut self, plot_id: i64) {
        if self.bookings.values().any(|b| b.plot_id == plot_id) {
            return;
        }
        if let Some(plot) = self.plots.get_mut(&plot_id) {
            plot.is_available = true;
            plot.updated_utc = Utc::now();
        }
    }

    fn remove_project(&mut self, project_id: i64) {
        self.projects.remove(&project_id);
        self.assignments.retain(|(pid, _), _| *pid != project_id);

        let plot_ids: BTreeSet<i64> = self
            .plots
            .values()
            .filter(|plot| plot.project_id == project_id)
            .map(|plot| plot.plot_id)
            .collect();
        self.plots.retain(|id, _| !plot_ids.contains(id));
        self.bookings.retain(|_, b| !plot_ids.contains(&b.plot_id));
        self.project_sales.retain(|_, s| !plot_ids.contains(&s.plot_id));
        self.agent_sales.retain(|_, s| !plot_ids.contains(&s.plot_id));
    }
}

/// Store that keeps everything in process memory.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a user with a fixed role and activity flag, bypassing
    /// validation. Handy for seeding fixtures.
    pub async fn seed_user(&self, username: &str, role: &str, is_active: bool) -> User {
        let mut state = self.state.write().await;
        let user = User {
            user_id: state.next_id(),
            username: username.to_string(),
            email: format!("{username}@example.com"),
            first_name: username.to_string(),
            last_name: String::new(),
            role: role.to_string(),
            created_by: None,
            is_active,
            created_utc: Utc::now(),
        };
        state.users.insert(user.user_id, user.clone());
        user
    }
}

// =========================================================================
// Accounts
// =========================================================================

#[async_trait]
impl AccountStore for InMemoryStore {
    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn create_user(&self, input: &CreateUser) -> Result<User, AppError> {
        let mut state = self.state.write().await;
        if state.users.values().any(|u| u.username == input.username) {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Username '{}' is already taken",
                input.username
            )));
        }

        let user = User {
            user_id: state.next_id(),
            username: input.username.clone(),
            email: input.email.clone(),
            first_name: input.first_name.clone(),
            last_name: input.last_name.clone(),
            role: input.role.as_str().to_string(),
            created_by: input.created_by,
            is_active: true,
            created_utc: Utc::now(),
        };
        state.users.insert(user.user_id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, user_id: i64) -> Result<Option<User>, AppError> {
        Ok(self.state.read().await.users.get(&user_id).cloned())
    }

    async fn list_users(&self, filter: &ListUsersFilter) -> Result<Vec<User>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .users
            .values()
            .filter(|u| filter.role.map(|r| u.role() == r).unwrap_or(true))
            .filter(|u| {
                filter
                    .created_by
                    .map(|c| u.created_by == Some(c))
                    .unwrap_or(true)
            })
            .cloned()
            .collect())
    }

    async fn update_user(
        &self,
        user_id: i64,
        input: &UpdateUser,
    ) -> Result<Option<User>, AppError> {
        let mut state = self.state.write().await;
        let Some(user) = state.users.get_mut(&user_id) else {
            return Ok(None);
        };
        if let Some(email) = &input.email {
            user.email = email.clone();
        }
        if let Some(first_name) = &input.first_name {
            user.first_name = first_name.clone();
        }
        if let Some(last_name) = &input.last_name {
            user.last_name = last_name.clone();
        }
        if let Some(role) = input.role {
            user.role = role.as_str().to_string();
        }
        if let Some(is_active) = input.is_active {
            user.is_active = is_active;
        }
        Ok(Some(user.clone()))
    }

    async fn delete_user(&self, user_id: i64) -> Result<bool, AppError> {
        let mut state = self.state.write().await;
        if state.users.remove(&user_id).is_none() {
            return Ok(false);
        }

        let owned: Vec<i64> = state
            .projects
            .values()
            .filter(|p| p.owner_id == user_id)
            .map(|p| p.project_id)
            .collect();
        for project_id in owned {
            state.remove_project(project_id);
        }

        state.assignments.retain(|(_, uid), _| *uid != user_id);
        let released: BTreeSet<i64> = state
            .bookings
            .values()
            .filter(|b| b.created_by == user_id)
            .map(|b| b.plot_id)
            .collect();
        state.bookings.retain(|_, b| b.created_by != user_id);
        for plot_id in released {
            state.release_plot(plot_id);
        }
        state.subscriptions.retain(|_, s| s.user_id != user_id);
        state.payments.retain(|_, p| p.user_id != user_id);
        for user in state.users.values_mut() {
            if user.created_by == Some(user_id) {
                user.created_by = None;
            }
        }
        for entry in state.audit.iter_mut() {
            if entry.actor_id == Some(user_id) {
                entry.actor_id = None;
            }
        }

        Ok(true)
    }

    async fn assign_project(
        &self,
        project_id: i64,
        user_id: i64,
    ) -> Result<ProjectAssignment, AppError> {
        let mut state = self.state.write().await;
        if !state.projects.contains_key(&project_id) || !state.users.contains_key(&user_id) {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Project or user not found"
            )));
        }

        let assignment = state
            .assignments
            .entry((project_id, user_id))
            .or_insert_with(|| ProjectAssignment {
                project_id,
                user_id,
                assigned_utc: Utc::now(),
            })
            .clone();
        Ok(assignment)
    }

    async fn unassign_project(&self, project_id: i64, user_id: i64) -> Result<bool, AppError> {
        let mut state = self.state.write().await;
        Ok(state.assignments.remove(&(project_id, user_id)).is_some())
    }

    async fn list_assigned_project_ids(&self, user_id: i64) -> Result<Vec<i64>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .assignments
            .keys()
            .filter(|(_, uid)| *uid == user_id)
            .map(|(pid, _)| *pid)
            .collect())
    }

    async fn record_audit(&self, input: &CreateAuditEntry) -> Result<AuditEntry, AppError> {
        let mut state = self.state.write().await;
        let entry = AuditEntry {
            audit_id: state.next_id(),
            actor_id: input.actor_id,
            actor_name: input.actor_name.clone(),
            action: input.action.as_str().to_string(),
            resource_type: input.resource_type.as_str().to_string(),
            resource_id: input.resource_id,
            description: input.description.clone(),
            changes: input.changes.clone(),
            created_utc: Utc::now(),
        };
        state.audit.push(entry.clone());
        Ok(entry)
    }

    async fn list_audit(&self, filter: &ListAuditFilter) -> Result<Vec<AuditEntry>, AppError> {
        let state = self.state.read().await;
        let limit = filter.limit.clamp(1, 500) as usize;
        Ok(state
            .audit
            .iter()
            .rev()
            .filter(|e| {
                filter
                    .resource_type
                    .as_deref()
                    .map(|r| e.resource_type == r)
                    .unwrap_or(true)
            })
            .take(limit)
            .cloned()
            .collect())
    }
}

// =========================================================================
// Billing
// =========================================================================

#[async_trait]
impl BillingStore for InMemoryStore {
    async fn create_plan(&self, input: &CreatePlan) -> Result<Plan, AppError> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let plan = Plan {
            plan_id: state.next_id(),
            name: input.name.clone(),
            description: input.description.clone(),
            amount: input.amount,
            currency: input.currency.clone(),
            period: input.period.as_str().to_string(),
            period_count: input.period_count,
            features: serde_json::json!(input.features),
            is_active: true,
            created_utc: now,
            updated_utc: now,
        };
        state.plans.insert(plan.plan_id, plan.clone());
        Ok(plan)
    }

    async fn get_plan(&self, plan_id: i64) -> Result<Option<Plan>, AppError> {
        Ok(self.state.read().await.plans.get(&plan_id).cloned())
    }

    async fn list_plans(&self, include_inactive: bool) -> Result<Vec<Plan>, AppError> {
        let state = self.state.read().await;
        let mut plans: Vec<Plan> = state
            .plans
            .values()
            .filter(|p| include_inactive || p.is_active)
            .cloned()
            .collect();
        plans.sort_by(|a, b| a.amount.cmp(&b.amount).then(a.plan_id.cmp(&b.plan_id)));
        Ok(plans)
    }

    async fn update_plan(
        &self,
        plan_id: i64,
        input: &UpdatePlan,
    ) -> Result<Option<Plan>, AppError> {
        let mut state = self.state.write().await;
        let Some(plan) = state.plans.get_mut(&plan_id) else {
            return Ok(None);
        };
        if let Some(name) = &input.name {
            plan.name = name.clone();
        }
        if let Some(description) = &input.description {
            plan.description = description.clone();
        }
        if let Some(amount) = input.amount {
            plan.amount = amount;
        }
        if let Some(features) = &input.features {
            plan.features = serde_json::json!(features);
        }
        if let Some(is_active) = input.is_active {
            plan.is_active = is_active;
        }
        plan.updated_utc = Utc::now();
        Ok(Some(plan.clone()))
    }

    async fn get_subscription(
        &self,
        subscription_id: i64,
    ) -> Result<Option<Subscription>, AppError> {
        Ok(self
            .state
            .read()
            .await
            .subscriptions
            .get(&subscription_id)
            .cloned())
    }

    async fn get_subscription_for_user(
        &self,
        user_id: i64,
    ) -> Result<Option<Subscription>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .subscriptions
            .values()
            .find(|s| s.user_id == user_id)
            .cloned())
    }

    async fn ensure_subscription(
        &self,
        user_id: i64,
        plan_id: Option<i64>,
    ) -> Result<Subscription, AppError> {
        let mut state = self.state.write().await;
        let now = Utc::now();

        if let Some(existing) = state
            .subscriptions
            .values_mut()
            .find(|s| s.user_id == user_id)
        {
            if existing.plan_id.is_none() {
                existing.plan_id = plan_id;
            }
            return Ok(existing.clone());
        }

        if !state.users.contains_key(&user_id) {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "User {} not found",
                user_id
            )));
        }

        let subscription = Subscription {
            subscription_id: state.next_id(),
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
        };
        state
            .subscriptions
            .insert(subscription.subscription_id, subscription.clone());
        Ok(subscription)
    }

    async fn save_subscription(
        &self,
        subscription: &Subscription,
    ) -> Result<Subscription, AppError> {
        self.state.write().await.write_subscription(subscription)
    }

    async fn expire_subscription(
        &self,
        subscription_id: i64,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut state = self.state.write().await;
        match state.subscriptions.get_mut(&subscription_id) {
            Some(sub) if sub.has_lapsed(now) => {
                sub.status = SubscriptionStatus::Expired.as_str().to_string();
                sub.updated_utc = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn create_payment(&self, input: &CreatePayment) -> Result<Payment, AppError> {
        self.state.write().await.insert_payment(input)
    }

    async fn attach_order_tracking_id(
        &self,
        payment_id: i64,
        order_tracking_id: &str,
    ) -> Result<Payment, AppError> {
        let mut state = self.state.write().await;
        let taken = state.payments.values().any(|p| {
            p.payment_id != payment_id && p.order_tracking_id.as_deref() == Some(order_tracking_id)
        });
        if taken {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Order tracking id already recorded"
            )));
        }

        let payment = state
            .payments
            .get_mut(&payment_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Payment not found")))?;
        payment.order_tracking_id = Some(order_tracking_id.to_string());
        payment.updated_utc = Utc::now();
        Ok(payment.clone())
    }

    async fn cancel_pending_payment(
        &self,
        payment_id: i64,
        reason: &str,
    ) -> Result<bool, AppError> {
        let mut state = self.state.write().await;
        match state.payments.get_mut(&payment_id) {
            Some(payment) if payment.status() == PaymentStatus::Pending => {
                payment.status = PaymentStatus::Cancelled.as_str().to_string();
                if let Some(map) = payment.metadata.as_object_mut() {
                    map.insert("cancel_reason".to_string(), serde_json::json!(reason));
                }
                payment.updated_utc = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_payment_by_order(
        &self,
        order_tracking_id: &str,
    ) -> Result<Option<Payment>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .payments
            .values()
            .find(|p| p.order_tracking_id.as_deref() == Some(order_tracking_id))
            .cloned())
    }

    async fn list_payments_for_user(&self, user_id: i64) -> Result<Vec<Payment>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .payments
            .values()
            .rev()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn settle_payment(
        &self,
        settlement: &PaymentSettlement,
    ) -> Result<Option<Payment>, AppError> {
        let mut state = self.state.write().await;
        if !state
            .subscriptions
            .contains_key(&settlement.subscription.subscription_id)
        {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Subscription {} not found",
                settlement.subscription.subscription_id
            )));
        }

        let Some(payment) = state.pending_payment_by_order(&settlement.order_tracking_id) else {
            return Ok(None);
        };
        payment.status = PaymentStatus::Successful.as_str().to_string();
        if settlement.transaction_id.is_some() {
            payment.transaction_id = settlement.transaction_id.clone();
        }
        if settlement.payment_method.is_some() {
            payment.payment_method = settlement.payment_method.clone();
        }
        merge_metadata(&mut payment.metadata, &settlement.metadata);
        payment.updated_utc = Utc::now();
        let payment = payment.clone();

        state.write_subscription(&settlement.subscription)?;
        Ok(Some(payment))
    }

    async fn fail_payment(
        &self,
        order_tracking_id: &str,
        metadata: &serde_json::Value,
    ) -> Result<Option<Payment>, AppError> {
        let mut state = self.state.write().await;
        let Some(payment) = state.pending_payment_by_order(order_tracking_id) else {
            return Ok(None);
        };
        payment.status = PaymentStatus::Failed.as_str().to_string();
        merge_metadata(&mut payment.metadata, metadata);
        payment.updated_utc = Utc::now();
        Ok(Some(payment.clone()))
    }

    async fn record_renewal(&self, record: &RenewalRecord) -> Result<Option<Payment>, AppError> {
        let mut state = self.state.write().await;
        if !state
            .subscriptions
            .contains_key(&record.subscription.subscription_id)
        {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Subscription {} not found",
                record.subscription.subscription_id
            )));
        }

        let payment = match state.insert_payment(&record.payment) {
            Ok(payment) => payment,
            Err(AppError::Conflict(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        state.write_subscription(&record.subscription)?;
        Ok(Some(payment))
    }
}

fn merge_metadata(target: &mut serde_json::Value, extra: &serde_json::Value) {
    match (target.as_object_mut(), extra.as_object()) {
        (Some(target), Some(extra)) => {
            for (key, value) in extra {
                target.insert(key.clone(), value.clone());
            }
        }
        _ => *target = extra.clone(),
    }
}

// =========================================================================
// Land
// =========================================================================

#[async_trait]
impl LandStore for InMemoryStore {
    async fn create_project(&self, input: &CreateProject) -> Result<Project, AppError> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let project = Project {
            project_id: state.next_id(),
            owner_id: input.owner_id,
            name: input.name.clone(),
            location: input.location.clone(),
            size: input.size.clone(),
            description: input.description.clone(),
            phases: input.phases.clone(),
            created_utc: now,
            updated_utc: now,
        };
        state.projects.insert(project.project_id, project.clone());
        Ok(project)
    }

    async fn get_project(&self, project_id: i64) -> Result<Option<Project>, AppError> {
        Ok(self.state.read().await.projects.get(&project_id).cloned())
    }

    async fn list_projects(
        &self,
        scope: &Scope,
        filter: &ListProjectsFilter,
    ) -> Result<Vec<Project>, AppError> {
        let state = self.state.read().await;
        let search = filter
            .search
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);
        Ok(state
            .projects
            .values()
            .rev()
            .filter(|p| scope.permits_project(p))
            .filter(|p| match &search {
                Some(s) => {
                    p.name.to_lowercase().contains(s) || p.location.to_lowercase().contains(s)
                }
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn update_project(
        &self,
        project_id: i64,
        input: &UpdateProject,
    ) -> Result<Option<Project>, AppError> {
        let mut state = self.state.write().await;
        let Some(project) = state.projects.get_mut(&project_id) else {
            return Ok(None);
        };
        if let Some(name) = &input.name {
            project.name = name.clone();
        }
        if let Some(location) = &input.location {
            project.location = location.clone();
        }
        if let Some(size) = &input.size {
            project.size = size.clone();
        }
        if let Some(description) = &input.description {
            project.description = description.clone();
        }
        if let Some(phases) = &input.phases {
            project.phases = phases.clone();
        }
        project.updated_utc = Utc::now();
        Ok(Some(project.clone()))
    }

    async fn delete_project(&self, project_id: i64) -> Result<bool, AppError> {
        let mut state = self.state.write().await;
        if !state.projects.contains_key(&project_id) {
            return Ok(false);
        }
        state.remove_project(project_id);
        Ok(true)
    }

    async fn create_plot(&self, input: &CreatePlot) -> Result<Plot, AppError> {
        let mut state = self.state.write().await;
        if !state.projects.contains_key(&input.project_id) {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Project {} not found",
                input.project_id
            )));
        }
        let duplicate = state
            .plots
            .values()
            .any(|p| p.project_id == input.project_id && p.plot_number == input.plot_number);
        if duplicate {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Plot '{}' already exists in this project",
                input.plot_number
            )));
        }

        let now = Utc::now();
        let plot = Plot {
            plot_id: state.next_id(),
            project_id: input.project_id,
            plot_number: input.plot_number.clone(),
            size: input.size,
            price: input.price,
            property_type: input.property_type.as_str().to_string(),
            phases: input.phases.clone(),
            is_available: true,
            created_utc: now,
            updated_utc: now,
        };
        state.plots.insert(plot.plot_id, plot.clone());
        Ok(plot)
    }

    async fn get_plot(&self, plot_id: i64) -> Result<Option<Plot>, AppError> {
        Ok(self.state.read().await.plots.get(&plot_id).cloned())
    }

    async fn list_plots(
        &self,
        scope: &Scope,
        filter: &ListPlotsFilter,
    ) -> Result<Vec<Plot>, AppError> {
        let state = self.state.read().await;
        let mut plots: Vec<Plot> = state
            .plots
            .values()
            .filter(|p| state.plot_visible(scope, p.plot_id))
            .filter(|p| filter.project_id.map(|id| p.project_id == id).unwrap_or(true))
            .filter(|p| {
                filter
                    .is_available
                    .map(|a| p.is_available == a)
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        plots.sort_by(|a, b| {
            a.project_id
                .cmp(&b.project_id)
                .then_with(|| a.plot_number.cmp(&b.plot_number))
        });
        Ok(plots)
    }

    async fn create_booking(&self, input: &CreateBooking) -> Result<Booking, AppError> {
        let mut state = self.state.write().await;
        let plot = state
            .plots
            .get_mut(&input.plot_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Plot not found")))?;
        if !plot.is_available {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Plot {} is not available",
                input.plot_id
            )));
        }
        let now = Utc::now();
        plot.is_available = false;
        plot.updated_utc = now;

        let booking = Booking {
            booking_id: state.next_id(),
            plot_id: input.plot_id,
            created_by: input.created_by,
            customer_name: input.customer_name.clone(),
            customer_contact: input.customer_contact.clone(),
            phase: input.phase.clone(),
            purchase_price: input.purchase_price,
            amount_paid: input.amount_paid,
            status: BookingStatus::Booked.as_str().to_string(),
            payment_reference: input.payment_reference.clone(),
            booking_date: now,
            updated_utc: now,
        };
        state.bookings.insert(booking.booking_id, booking.clone());
        Ok(booking)
    }

    async fn get_booking(&self, booking_id: i64) -> Result<Option<Booking>, AppError> {
        Ok(self.state.read().await.bookings.get(&booking_id).cloned())
    }

    async fn list_bookings(
        &self,
        scope: &Scope,
        filter: &ListBookingsFilter,
    ) -> Result<Vec<Booking>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .bookings
            .values()
            .rev()
            .filter(|b| {
                state
                    .project_of_plot(b.plot_id)
                    .map(|project| {
                        scope.permits_booking(b, project)
                            && filter
                                .project_id
                                .map(|id| project.project_id == id)
                                .unwrap_or(true)
                    })
                    .unwrap_or(false)
            })
            .filter(|b| filter.plot_id.map(|id| b.plot_id == id).unwrap_or(true))
            .filter(|b| filter.status.map(|s| b.status() == s).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn update_booking(
        &self,
        booking_id: i64,
        input: &UpdateBooking,
    ) -> Result<Option<Booking>, AppError> {
        let mut state = self.state.write().await;
        let Some(booking) = state.bookings.get_mut(&booking_id) else {
            return Ok(None);
        };
        if let Some(name) = &input.customer_name {
            booking.customer_name = name.clone();
        }
        if let Some(contact) = &input.customer_contact {
            booking.customer_contact = contact.clone();
        }
        if let Some(status) = input.status {
            booking.status = status.as_str().to_string();
        }
        if let Some(reference) = &input.payment_reference {
            booking.payment_reference = Some(reference.clone());
        }
        booking.updated_utc = Utc::now();
        Ok(Some(booking.clone()))
    }

    async fn delete_booking(&self, booking_id: i64) -> Result<bool, AppError> {
        let mut state = self.state.write().await;
        let Some(booking) = state.bookings.remove(&booking_id) else {
            return Ok(false);
        };
        state.release_plot(booking.plot_id);
        Ok(true)
    }

    async fn apply_installment(
        &self,
        booking_id: i64,
        agent_name: &str,
        amount: Decimal,
    ) -> Result<InstallmentApplied, AppError> {
        let mut state = self.state.write().await;
        let now = Utc::now();

        let booking = state.bookings.get_mut(&booking_id).ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Booking {} not found", booking_id))
        })?;
        let previous_deposit = booking.amount_paid;
        booking.amount_paid += amount;
        booking.updated_utc = now;
        let booking = booking.clone();

        let existing_sale = state
            .project_sales
            .values_mut()
            .find(|s| s.plot_id == booking.plot_id && s.client_name == booking.customer_name);
        match existing_sale {
            Some(sale) => {
                sale.deposit = booking.amount_paid;
                sale.purchase_price = booking.purchase_price;
                sale.phase = booking.phase.clone();
                sale.updated_utc = now;
            }
            None => {
                let sale = ProjectSale {
                    sale_id: state.next_id(),
                    plot_id: booking.plot_id,
                    client_name: booking.customer_name.clone(),
                    phase: booking.phase.clone(),
                    purchase_price: booking.purchase_price,
                    deposit: booking.amount_paid,
                    created_utc: now,
                    updated_utc: now,
                };
                state.project_sales.insert(sale.sale_id, sale);
            }
        }

        let existing_agent = state
            .agent_sales
            .values_mut()
            .find(|s| s.plot_id == booking.plot_id && s.agent_name == agent_name);
        match existing_agent {
            Some(sale) => {
                sale.purchase_price = booking.purchase_price;
                sale.phase = booking.phase.clone();
                sale.updated_utc = now;
            }
            None => {
                let sale = AgentSale {
                    sale_id: state.next_id(),
                    plot_id: booking.plot_id,
                    agent_name: agent_name.to_string(),
                    phase: booking.phase.clone(),
                    purchase_price: booking.purchase_price,
                    commission: default_commission(),
                    created_utc: now,
                    updated_utc: now,
                };
                state.agent_sales.insert(sale.sale_id, sale);
            }
        }

        Ok(InstallmentApplied {
            previous_deposit,
            booking,
        })
    }

    async fn list_project_sales(
        &self,
        scope: &Scope,
        filter: &ListSalesFilter,
    ) -> Result<Vec<ProjectSale>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .project_sales
            .values()
            .filter(|s| state.plot_visible(scope, s.plot_id))
            .filter(|s| sale_matches(&state, filter, s.plot_id))
            .cloned()
            .collect())
    }

    async fn list_agent_sales(
        &self,
        scope: &Scope,
        filter: &ListSalesFilter,
    ) -> Result<Vec<AgentSale>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .agent_sales
            .values()
            .filter(|s| state.plot_visible(scope, s.plot_id))
            .filter(|s| sale_matches(&state, filter, s.plot_id))
            .cloned()
            .collect())
    }

    async fn get_agent_sale(&self, sale_id: i64) -> Result<Option<AgentSale>, AppError> {
        Ok(self.state.read().await.agent_sales.get(&sale_id).cloned())
    }

    async fn update_agent_commission(
        &self,
        sale_id: i64,
        commission: Decimal,
    ) -> Result<Option<AgentSale>, AppError> {
        let mut state = self.state.write().await;
        let Some(sale) = state.agent_sales.get_mut(&sale_id) else {
            return Ok(None);
        };
        sale.commission = commission;
        sale.updated_utc = Utc::now();
        Ok(Some(sale.clone()))
    }
}

fn sale_matches(state: &MemoryState, filter: &ListSalesFilter, plot_id: i64) -> bool {
    let plot_ok = filter.plot_id.map(|id| id == plot_id).unwrap_or(true);
    let project_ok = match filter.project_id {
        Some(project_id) => state
            .plots
            .get(&plot_id)
            .map(|plot| plot.project_id == project_id)
            .unwrap_or(false),
        None => true,
    };
    plot_ok && project_ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PropertyType, Role};

    async fn seeded() -> (InMemoryStore, User, Plot) {
        let store = InMemoryStore::new();
        let admin = store.seed_user("admin", Role::Admin.as_str(), true).await;
        let project = store
            .create_project(&CreateProject {
                owner_id: admin.user_id,
                name: "Acacia Gardens".to_string(),
                location: "Kitengela".to_string(),
                size: "5 acres".to_string(),
                description: String::new(),
                phases: vec!["Phase 1".to_string()],
            })
            .await
            .unwrap();
        let plot = store
            .create_plot(&CreatePlot {
                project_id: project.project_id,
                plot_number: "A-1".to_string(),
                size: Decimal::new(5, 1),
                price: Decimal::from(10_000),
                property_type: PropertyType::Residential,
                phases: vec!["Phase 1".to_string()],
            })
            .await
            .unwrap();
        (store, admin, plot)
    }

    fn booking_for(plot: &Plot, created_by: i64) -> CreateBooking {
        CreateBooking {
            plot_id: plot.plot_id,
            created_by,
            customer_name: "Wanjiru".to_string(),
            customer_contact: "0700000000".to_string(),
            phase: Some("Phase 1".to_string()),
            purchase_price: plot.price,
            amount_paid: Decimal::ZERO,
            payment_reference: None,
        }
    }

    #[tokio::test]
    async fn second_booking_on_same_plot_conflicts() {
        let (store, admin, plot) = seeded().await;

        store.create_booking(&booking_for(&plot, admin.user_id)).await.unwrap();
        let err = store
            .create_booking(&booking_for(&plot, admin.user_id))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn deleting_booking_releases_plot() {
        let (store, admin, plot) = seeded().await;
        let booking = store.create_booking(&booking_for(&plot, admin.user_id)).await.unwrap();
        assert!(!store.get_plot(plot.plot_id).await.unwrap().unwrap().is_available);

        assert!(store.delete_booking(booking.booking_id).await.unwrap());

        assert!(store.get_plot(plot.plot_id).await.unwrap().unwrap().is_available);
    }

    #[tokio::test]
    async fn expire_only_touches_lapsed_active_rows() {
        let store = InMemoryStore::new();
        let user = store.seed_user("admin", "admin", true).await;
        let mut sub = store.ensure_subscription(user.user_id, None).await.unwrap();
        let now = Utc::now();

        assert!(!store.expire_subscription(sub.subscription_id, now).await.unwrap());

        sub.activate(None, now - chrono::Duration::days(40));
        store.save_subscription(&sub).await.unwrap();
        assert!(store.expire_subscription(sub.subscription_id, now).await.unwrap());
        assert!(!store.expire_subscription(sub.subscription_id, now).await.unwrap());
    }

    #[tokio::test]
    async fn ensure_subscription_keeps_a_single_row() {
        let store = InMemoryStore::new();
        let user = store.seed_user("admin", "admin", true).await;

        let first = store.ensure_subscription(user.user_id, None).await.unwrap();
        let second = store.ensure_subscription(user.user_id, Some(9)).await.unwrap();
        let third = store.ensure_subscription(user.user_id, Some(12)).await.unwrap();

        assert_eq!(first.subscription_id, second.subscription_id);
        assert_eq!(second.plan_id, Some(9));
        assert_eq!(third.plan_id, Some(9));
    }
}
