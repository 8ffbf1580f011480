//! PostgreSQL store for land-service.

use super::{AccountStore, BillingStore, LandStore};
use crate::models::{
    default_commission, AgentSale, AuditEntry, Booking, CreateAuditEntry, CreateBooking,
    CreatePayment, CreatePlan, CreatePlot, CreateProject, CreateUser, InstallmentApplied,
    ListAuditFilter, ListBookingsFilter, ListPlotsFilter, ListProjectsFilter, ListSalesFilter,
    ListUsersFilter, Payment, PaymentSettlement, PaymentStatus, Plan, Plot, Project,
    ProjectAssignment, ProjectSale, RenewalRecord, Subscription, SubscriptionStatus,
    UpdateBooking, UpdatePlan, UpdateProject, UpdateUser, User,
};
use crate::services::access_scope::Scope;
use crate::services::metrics::DB_QUERY_DURATION;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Executor, Postgres, QueryBuilder};
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "land-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

/// Append the access predicate for `scope`. The query must alias projects as
/// `p`; a booking scope additionally needs bookings aliased as `b`.
fn push_scope(qb: &mut QueryBuilder<'_, Postgres>, scope: &Scope) {
    match scope {
        Scope::Unrestricted => {}
        Scope::OwnedBy { owner_id } => {
            qb.push(" AND p.owner_id = ").push_bind(*owner_id);
        }
        Scope::Assigned { project_ids } => {
            qb.push(" AND p.project_id = ANY(")
                .push_bind(project_ids.clone())
                .push(")");
        }
        Scope::AssignedAndCreatedBy {
            user_id,
            project_ids,
        } => {
            qb.push(" AND p.project_id = ANY(")
                .push_bind(project_ids.clone())
                .push(")");
            qb.push(" AND b.created_by = ").push_bind(*user_id);
        }
        Scope::Denied => {
            qb.push(" AND FALSE");
        }
    }
}

async fn write_subscription<'c, E>(
    executor: E,
    subscription: &Subscription,
) -> Result<Option<Subscription>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, Subscription>(
        r#"
        UPDATE subscriptions
        SET plan_id = $2,
            status = $3,
            start_date = $4,
            end_date = $5,
            auto_renew = $6,
            recurring_payment_active = $7,
            last_recurring_payment_date = $8,
            updated_utc = $9
        WHERE subscription_id = $1
        RETURNING subscription_id, user_id, plan_id, status, start_date, end_date, auto_renew, recurring_payment_active, last_recurring_payment_date, created_utc, updated_utc
        "#,
    )
    .bind(subscription.subscription_id)
    .bind(subscription.plan_id)
    .bind(&subscription.status)
    .bind(subscription.start_date)
    .bind(subscription.end_date)
    .bind(subscription.auto_renew)
    .bind(subscription.recurring_payment_active)
    .bind(subscription.last_recurring_payment_date)
    .bind(subscription.updated_utc)
    .fetch_optional(executor)
    .await
}

async fn insert_payment<'c, E>(executor: E, input: &CreatePayment) -> Result<Payment, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, Payment>(
        r#"
        INSERT INTO payments (user_id, subscription_id, plan_id, amount, currency, payment_type, status, order_tracking_id, merchant_reference, transaction_id, payment_method, is_recurring, recurring_frequency, metadata)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        RETURNING payment_id, user_id, subscription_id, plan_id, amount, currency, payment_type, status, order_tracking_id, merchant_reference, transaction_id, payment_method, is_recurring, recurring_frequency, metadata, created_utc, updated_utc
        "#,
    )
    .bind(input.user_id)
    .bind(input.subscription_id)
    .bind(input.plan_id)
    .bind(input.amount)
    .bind(&input.currency)
    .bind(input.payment_type.as_str())
    .bind(input.status.as_str())
    .bind(&input.order_tracking_id)
    .bind(&input.merchant_reference)
    .bind(&input.transaction_id)
    .bind(&input.payment_method)
    .bind(input.is_recurring)
    .bind(&input.recurring_frequency)
    .bind(&input.metadata)
    .fetch_one(executor)
    .await
}

// =========================================================================
// Accounts
// =========================================================================

#[async_trait]
impl AccountStore for Database {
    /// Check database health.
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self, input), fields(username = %input.username, role = %input.role.as_str()))]
    async fn create_user(&self, input: &CreateUser) -> Result<User, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_user"])
            .start_timer();

        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, email, first_name, last_name, role, created_by)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING user_id, username, email, first_name, last_name, role, created_by, is_active, created_utc
            "#,
        )
        .bind(&input.username)
        .bind(&input.email)
        .bind(&input.first_name)
        .bind(&input.last_name)
        .bind(input.role.as_str())
        .bind(input.created_by)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "Username '{}' is already taken",
                    input.username
                ))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create user: {}", e)),
        })?;

        timer.observe_duration();
        info!(user_id = user.user_id, "User created");

        Ok(user)
    }

    #[instrument(skip(self))]
    async fn get_user(&self, user_id: i64) -> Result<Option<User>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_user"])
            .start_timer();

        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT user_id, username, email, first_name, last_name, role, created_by, is_active, created_utc
            FROM users
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get user: {}", e)))?;

        timer.observe_duration();

        Ok(user)
    }

    #[instrument(skip(self, filter))]
    async fn list_users(&self, filter: &ListUsersFilter) -> Result<Vec<User>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_users"])
            .start_timer();

        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT user_id, username, email, first_name, last_name, role, created_by, is_active, created_utc FROM users WHERE TRUE",
        );
        if let Some(role) = filter.role {
            qb.push(" AND role = ").push_bind(role.as_str());
        }
        if let Some(created_by) = filter.created_by {
            qb.push(" AND created_by = ").push_bind(created_by);
        }
        qb.push(" ORDER BY user_id");

        let users = qb
            .build_query_as::<User>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list users: {}", e)))?;

        timer.observe_duration();

        Ok(users)
    }

    #[instrument(skip(self, input))]
    async fn update_user(
        &self,
        user_id: i64,
        input: &UpdateUser,
    ) -> Result<Option<User>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_user"])
            .start_timer();

        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET email = COALESCE($2, email),
                first_name = COALESCE($3, first_name),
                last_name = COALESCE($4, last_name),
                role = COALESCE($5, role),
                is_active = COALESCE($6, is_active)
            WHERE user_id = $1
            RETURNING user_id, username, email, first_name, last_name, role, created_by, is_active, created_utc
            "#,
        )
        .bind(user_id)
        .bind(&input.email)
        .bind(&input.first_name)
        .bind(&input.last_name)
        .bind(input.role.map(|r| r.as_str()))
        .bind(input.is_active)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update user: {}", e)))?;

        timer.observe_duration();

        Ok(user)
    }

    #[instrument(skip(self))]
    async fn delete_user(&self, user_id: i64) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_user"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        // Bookings go with their creator; their plots are released first so
        // the cascade below cannot strand them as unavailable.
        let released = sqlx::query_scalar::<_, i64>(
            "DELETE FROM bookings WHERE created_by = $1 RETURNING plot_id",
        )
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to delete user bookings: {}", e))
        })?;

        if !released.is_empty() {
            sqlx::query(
                r#"
                UPDATE plots p
                SET is_available = TRUE, updated_utc = NOW()
                WHERE p.plot_id = ANY($1)
                  AND NOT EXISTS (SELECT 1 FROM bookings b WHERE b.plot_id = p.plot_id)
                "#,
            )
            .bind(&released)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to release plots: {}", e))
            })?;
        }

        let result = sqlx::query("DELETE FROM users WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to delete user: {}", e)))?;

        if result.rows_affected() == 0 {
            tx.rollback().await.ok();
            timer.observe_duration();
            return Ok(false);
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit user delete: {}", e))
        })?;

        timer.observe_duration();

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!(user_id, "User deleted");
        }

        Ok(deleted)
    }

    #[instrument(skip(self))]
    async fn assign_project(
        &self,
        project_id: i64,
        user_id: i64,
    ) -> Result<ProjectAssignment, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["assign_project"])
            .start_timer();

        let assignment = sqlx::query_as::<_, ProjectAssignment>(
            r#"
            INSERT INTO project_assignments (project_id, user_id)
            VALUES ($1, $2)
            ON CONFLICT (project_id, user_id) DO UPDATE SET project_id = EXCLUDED.project_id
            RETURNING project_id, user_id, assigned_utc
            "#,
        )
        .bind(project_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_foreign_key_violation() => {
                AppError::NotFound(anyhow::anyhow!("Project or user not found"))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to assign project: {}", e)),
        })?;

        timer.observe_duration();

        Ok(assignment)
    }

    #[instrument(skip(self))]
    async fn unassign_project(&self, project_id: i64, user_id: i64) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["unassign_project"])
            .start_timer();

        let result =
            sqlx::query("DELETE FROM project_assignments WHERE project_id = $1 AND user_id = $2")
                .bind(project_id)
                .bind(user_id)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to unassign project: {}", e))
                })?;

        timer.observe_duration();

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn list_assigned_project_ids(&self, user_id: i64) -> Result<Vec<i64>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_assigned_project_ids"])
            .start_timer();

        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT project_id FROM project_assignments WHERE user_id = $1 ORDER BY project_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list assignments: {}", e))
        })?;

        timer.observe_duration();

        Ok(ids)
    }

    #[instrument(skip(self, input), fields(action = %input.action.as_str(), resource = %input.resource_type.as_str()))]
    async fn record_audit(&self, input: &CreateAuditEntry) -> Result<AuditEntry, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_audit"])
            .start_timer();

        let entry = sqlx::query_as::<_, AuditEntry>(
            r#"
            INSERT INTO audit_logs (actor_id, actor_name, action, resource_type, resource_id, description, changes)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING audit_id, actor_id, actor_name, action, resource_type, resource_id, description, changes, created_utc
            "#,
        )
        .bind(input.actor_id)
        .bind(&input.actor_name)
        .bind(input.action.as_str())
        .bind(input.resource_type.as_str())
        .bind(input.resource_id)
        .bind(&input.description)
        .bind(&input.changes)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to record audit: {}", e)))?;

        timer.observe_duration();

        Ok(entry)
    }

    #[instrument(skip(self, filter))]
    async fn list_audit(&self, filter: &ListAuditFilter) -> Result<Vec<AuditEntry>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_audit"])
            .start_timer();

        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT audit_id, actor_id, actor_name, action, resource_type, resource_id, description, changes, created_utc FROM audit_logs WHERE TRUE",
        );
        if let Some(resource_type) = &filter.resource_type {
            qb.push(" AND resource_type = ").push_bind(resource_type.clone());
        }
        qb.push(" ORDER BY created_utc DESC, audit_id DESC LIMIT ")
            .push_bind(filter.limit.clamp(1, 500));

        let entries = qb
            .build_query_as::<AuditEntry>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to list audit logs: {}", e))
            })?;

        timer.observe_duration();

        Ok(entries)
    }
}

// =========================================================================
// Billing
// =========================================================================

#[async_trait]
impl BillingStore for Database {
    #[instrument(skip(self, input), fields(name = %input.name))]
    async fn create_plan(&self, input: &CreatePlan) -> Result<Plan, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_plan"])
            .start_timer();

        let plan = sqlx::query_as::<_, Plan>(
            r#"
            INSERT INTO subscription_plans (name, description, amount, currency, period, period_count, features)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING plan_id, name, description, amount, currency, period, period_count, features, is_active, created_utc, updated_utc
            "#,
        )
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.amount)
        .bind(&input.currency)
        .bind(input.period.as_str())
        .bind(input.period_count)
        .bind(serde_json::json!(input.features))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create plan: {}", e)))?;

        timer.observe_duration();
        info!(plan_id = plan.plan_id, name = %plan.name, "Plan created");

        Ok(plan)
    }

    #[instrument(skip(self))]
    async fn get_plan(&self, plan_id: i64) -> Result<Option<Plan>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_plan"])
            .start_timer();

        let plan = sqlx::query_as::<_, Plan>(
            r#"
            SELECT plan_id, name, description, amount, currency, period, period_count, features, is_active, created_utc, updated_utc
            FROM subscription_plans
            WHERE plan_id = $1
            "#,
        )
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get plan: {}", e)))?;

        timer.observe_duration();

        Ok(plan)
    }

    #[instrument(skip(self))]
    async fn list_plans(&self, include_inactive: bool) -> Result<Vec<Plan>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_plans"])
            .start_timer();

        let plans = sqlx::query_as::<_, Plan>(
            r#"
            SELECT plan_id, name, description, amount, currency, period, period_count, features, is_active, created_utc, updated_utc
            FROM subscription_plans
            WHERE ($1::bool = TRUE OR is_active = TRUE)
            ORDER BY amount, plan_id
            "#,
        )
        .bind(include_inactive)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list plans: {}", e)))?;

        timer.observe_duration();

        Ok(plans)
    }

    #[instrument(skip(self, input))]
    async fn update_plan(
        &self,
        plan_id: i64,
        input: &UpdatePlan,
    ) -> Result<Option<Plan>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_plan"])
            .start_timer();

        let features = input.features.as_ref().map(|f| serde_json::json!(f));

        let plan = sqlx::query_as::<_, Plan>(
            r#"
            UPDATE subscription_plans
            SET name = COALESCE($2, name),
                description = COALESCE($3, description),
                amount = COALESCE($4, amount),
                features = COALESCE($5, features),
                is_active = COALESCE($6, is_active),
                updated_utc = NOW()
            WHERE plan_id = $1
            RETURNING plan_id, name, description, amount, currency, period, period_count, features, is_active, created_utc, updated_utc
            "#,
        )
        .bind(plan_id)
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.amount)
        .bind(features)
        .bind(input.is_active)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update plan: {}", e)))?;

        timer.observe_duration();

        Ok(plan)
    }

    #[instrument(skip(self))]
    async fn get_subscription(
        &self,
        subscription_id: i64,
    ) -> Result<Option<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_subscription"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT subscription_id, user_id, plan_id, status, start_date, end_date, auto_renew, recurring_payment_active, last_recurring_payment_date, created_utc, updated_utc
            FROM subscriptions
            WHERE subscription_id = $1
            "#,
        )
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get subscription: {}", e))
        })?;

        timer.observe_duration();

        Ok(subscription)
    }

    #[instrument(skip(self))]
    async fn get_subscription_for_user(
        &self,
        user_id: i64,
    ) -> Result<Option<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_subscription_for_user"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT subscription_id, user_id, plan_id, status, start_date, end_date, auto_renew, recurring_payment_active, last_recurring_payment_date, created_utc, updated_utc
            FROM subscriptions
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get subscription: {}", e))
        })?;

        timer.observe_duration();

        Ok(subscription)
    }

    #[instrument(skip(self))]
    async fn ensure_subscription(
        &self,
        user_id: i64,
        plan_id: Option<i64>,
    ) -> Result<Subscription, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["ensure_subscription"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            INSERT INTO subscriptions (user_id, plan_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE
            SET plan_id = COALESCE(subscriptions.plan_id, EXCLUDED.plan_id)
            RETURNING subscription_id, user_id, plan_id, status, start_date, end_date, auto_renew, recurring_payment_active, last_recurring_payment_date, created_utc, updated_utc
            "#,
        )
        .bind(user_id)
        .bind(plan_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to ensure subscription: {}", e))
        })?;

        timer.observe_duration();

        Ok(subscription)
    }

    #[instrument(skip(self, subscription), fields(subscription_id = subscription.subscription_id, status = %subscription.status))]
    async fn save_subscription(
        &self,
        subscription: &Subscription,
    ) -> Result<Subscription, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["save_subscription"])
            .start_timer();

        let saved = write_subscription(&self.pool, subscription)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to save subscription: {}", e))
            })?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Subscription not found")))?;

        timer.observe_duration();

        Ok(saved)
    }

    #[instrument(skip(self))]
    async fn expire_subscription(
        &self,
        subscription_id: i64,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["expire_subscription"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = $3, updated_utc = $2
            WHERE subscription_id = $1
              AND status = $4
              AND (end_date IS NULL OR end_date <= $2)
            "#,
        )
        .bind(subscription_id)
        .bind(now)
        .bind(SubscriptionStatus::Expired.as_str())
        .bind(SubscriptionStatus::Active.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to expire subscription: {}", e))
        })?;

        timer.observe_duration();

        let expired = result.rows_affected() > 0;
        if expired {
            info!(subscription_id, "Subscription expired");
        }

        Ok(expired)
    }

    #[instrument(skip(self, input), fields(user_id = input.user_id, merchant_reference = %input.merchant_reference))]
    async fn create_payment(&self, input: &CreatePayment) -> Result<Payment, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_payment"])
            .start_timer();

        let payment = insert_payment(&self.pool, input)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                    AppError::Conflict(anyhow::anyhow!("Payment reference already recorded"))
                }
                _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create payment: {}", e)),
            })?;

        timer.observe_duration();
        info!(payment_id = payment.payment_id, "Payment created");

        Ok(payment)
    }

    #[instrument(skip(self))]
    async fn attach_order_tracking_id(
        &self,
        payment_id: i64,
        order_tracking_id: &str,
    ) -> Result<Payment, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["attach_order_tracking_id"])
            .start_timer();

        let payment = sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payments
            SET order_tracking_id = $2, updated_utc = NOW()
            WHERE payment_id = $1
            RETURNING payment_id, user_id, subscription_id, plan_id, amount, currency, payment_type, status, order_tracking_id, merchant_reference, transaction_id, payment_method, is_recurring, recurring_frequency, metadata, created_utc, updated_utc
            "#,
        )
        .bind(payment_id)
        .bind(order_tracking_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!("Order tracking id already recorded"))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to attach order: {}", e)),
        })?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Payment not found")))?;

        timer.observe_duration();

        Ok(payment)
    }

    #[instrument(skip(self))]
    async fn cancel_pending_payment(
        &self,
        payment_id: i64,
        reason: &str,
    ) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["cancel_pending_payment"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = $3,
                metadata = metadata || jsonb_build_object('cancel_reason', $2::text),
                updated_utc = NOW()
            WHERE payment_id = $1 AND status = $4
            "#,
        )
        .bind(payment_id)
        .bind(reason)
        .bind(PaymentStatus::Cancelled.as_str())
        .bind(PaymentStatus::Pending.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to cancel payment: {}", e)))?;

        timer.observe_duration();

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn get_payment_by_order(
        &self,
        order_tracking_id: &str,
    ) -> Result<Option<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_payment_by_order"])
            .start_timer();

        let payment = sqlx::query_as::<_, Payment>(
            r#"
            SELECT payment_id, user_id, subscription_id, plan_id, amount, currency, payment_type, status, order_tracking_id, merchant_reference, transaction_id, payment_method, is_recurring, recurring_frequency, metadata, created_utc, updated_utc
            FROM payments
            WHERE order_tracking_id = $1
            "#,
        )
        .bind(order_tracking_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get payment: {}", e)))?;

        timer.observe_duration();

        Ok(payment)
    }

    #[instrument(skip(self))]
    async fn list_payments_for_user(&self, user_id: i64) -> Result<Vec<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_payments_for_user"])
            .start_timer();

        let payments = sqlx::query_as::<_, Payment>(
            r#"
            SELECT payment_id, user_id, subscription_id, plan_id, amount, currency, payment_type, status, order_tracking_id, merchant_reference, transaction_id, payment_method, is_recurring, recurring_frequency, metadata, created_utc, updated_utc
            FROM payments
            WHERE user_id = $1
            ORDER BY created_utc DESC, payment_id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list payments: {}", e)))?;

        timer.observe_duration();

        Ok(payments)
    }

    #[instrument(skip(self, settlement), fields(order_tracking_id = %settlement.order_tracking_id))]
    async fn settle_payment(
        &self,
        settlement: &PaymentSettlement,
    ) -> Result<Option<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["settle_payment"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        // Only a pending payment may settle; a lost race leaves no trace.
        let payment = sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payments
            SET status = $2,
                transaction_id = COALESCE($3, transaction_id),
                payment_method = COALESCE($4, payment_method),
                metadata = metadata || $5,
                updated_utc = NOW()
            WHERE order_tracking_id = $1 AND status = $6
            RETURNING payment_id, user_id, subscription_id, plan_id, amount, currency, payment_type, status, order_tracking_id, merchant_reference, transaction_id, payment_method, is_recurring, recurring_frequency, metadata, created_utc, updated_utc
            "#,
        )
        .bind(&settlement.order_tracking_id)
        .bind(PaymentStatus::Successful.as_str())
        .bind(&settlement.transaction_id)
        .bind(&settlement.payment_method)
        .bind(&settlement.metadata)
        .bind(PaymentStatus::Pending.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to settle payment: {}", e)))?;

        let Some(payment) = payment else {
            tx.rollback().await.ok();
            timer.observe_duration();
            return Ok(None);
        };

        let saved = write_subscription(&mut *tx, &settlement.subscription)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to save subscription: {}", e))
            })?;

        if saved.is_none() {
            tx.rollback().await.ok();
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Subscription {} not found",
                settlement.subscription.subscription_id
            )));
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit settlement: {}", e))
        })?;

        timer.observe_duration();
        info!(payment_id = payment.payment_id, "Payment settled");

        Ok(Some(payment))
    }

    #[instrument(skip(self, metadata))]
    async fn fail_payment(
        &self,
        order_tracking_id: &str,
        metadata: &serde_json::Value,
    ) -> Result<Option<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["fail_payment"])
            .start_timer();

        let payment = sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payments
            SET status = $2, metadata = metadata || $3, updated_utc = NOW()
            WHERE order_tracking_id = $1 AND status = $4
            RETURNING payment_id, user_id, subscription_id, plan_id, amount, currency, payment_type, status, order_tracking_id, merchant_reference, transaction_id, payment_method, is_recurring, recurring_frequency, metadata, created_utc, updated_utc
            "#,
        )
        .bind(order_tracking_id)
        .bind(PaymentStatus::Failed.as_str())
        .bind(metadata)
        .bind(PaymentStatus::Pending.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to fail payment: {}", e)))?;

        timer.observe_duration();

        Ok(payment)
    }

    #[instrument(skip(self, record), fields(user_id = record.payment.user_id))]
    async fn record_renewal(&self, record: &RenewalRecord) -> Result<Option<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_renewal"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let payment = match insert_payment(&mut *tx, &record.payment).await {
            Ok(payment) => payment,
            Err(sqlx::Error::Database(ref db_err)) if db_err.is_unique_violation() => {
                // A concurrent delivery of the same order already recorded it.
                tx.rollback().await.ok();
                timer.observe_duration();
                warn!("Renewal already recorded for this order");
                return Ok(None);
            }
            Err(e) => {
                tx.rollback().await.ok();
                return Err(AppError::DatabaseError(anyhow::anyhow!(
                    "Failed to record renewal payment: {}",
                    e
                )));
            }
        };

        let saved = write_subscription(&mut *tx, &record.subscription)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to save subscription: {}", e))
            })?;

        if saved.is_none() {
            tx.rollback().await.ok();
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Subscription {} not found",
                record.subscription.subscription_id
            )));
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit renewal: {}", e))
        })?;

        timer.observe_duration();
        info!(payment_id = payment.payment_id, "Renewal recorded");

        Ok(Some(payment))
    }
}

// =========================================================================
// Land
// =========================================================================

#[async_trait]
impl LandStore for Database {
    #[instrument(skip(self, input), fields(owner_id = input.owner_id))]
    async fn create_project(&self, input: &CreateProject) -> Result<Project, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_project"])
            .start_timer();

        let project = sqlx::query_as::<_, Project>(
            r#"
            INSERT INTO projects (owner_id, name, location, size, description, phases)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING project_id, owner_id, name, location, size, description, phases, created_utc, updated_utc
            "#,
        )
        .bind(input.owner_id)
        .bind(&input.name)
        .bind(&input.location)
        .bind(&input.size)
        .bind(&input.description)
        .bind(&input.phases)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create project: {}", e)))?;

        timer.observe_duration();
        info!(project_id = project.project_id, "Project created");

        Ok(project)
    }

    #[instrument(skip(self))]
    async fn get_project(&self, project_id: i64) -> Result<Option<Project>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_project"])
            .start_timer();

        let project = sqlx::query_as::<_, Project>(
            r#"
            SELECT project_id, owner_id, name, location, size, description, phases, created_utc, updated_utc
            FROM projects
            WHERE project_id = $1
            "#,
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get project: {}", e)))?;

        timer.observe_duration();

        Ok(project)
    }

    #[instrument(skip(self, scope, filter))]
    async fn list_projects(
        &self,
        scope: &Scope,
        filter: &ListProjectsFilter,
    ) -> Result<Vec<Project>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_projects"])
            .start_timer();

        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT p.project_id, p.owner_id, p.name, p.location, p.size, p.description, p.phases, p.created_utc, p.updated_utc FROM projects p WHERE TRUE",
        );
        push_scope(&mut qb, scope);
        if let Some(search) = filter.search.as_deref().filter(|s| !s.is_empty()) {
            let pattern = format!("%{}%", search);
            qb.push(" AND (p.name ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR p.location ILIKE ")
                .push_bind(pattern)
                .push(")");
        }
        qb.push(" ORDER BY p.created_utc DESC, p.project_id DESC");

        let projects = qb
            .build_query_as::<Project>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to list projects: {}", e))
            })?;

        timer.observe_duration();

        Ok(projects)
    }

    #[instrument(skip(self, input))]
    async fn update_project(
        &self,
        project_id: i64,
        input: &UpdateProject,
    ) -> Result<Option<Project>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_project"])
            .start_timer();

        let project = sqlx::query_as::<_, Project>(
            r#"
            UPDATE projects
            SET name = COALESCE($2, name),
                location = COALESCE($3, location),
                size = COALESCE($4, size),
                description = COALESCE($5, description),
                phases = COALESCE($6, phases),
                updated_utc = NOW()
            WHERE project_id = $1
            RETURNING project_id, owner_id, name, location, size, description, phases, created_utc, updated_utc
            "#,
        )
        .bind(project_id)
        .bind(&input.name)
        .bind(&input.location)
        .bind(&input.size)
        .bind(&input.description)
        .bind(&input.phases)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update project: {}", e)))?;

        timer.observe_duration();

        Ok(project)
    }

    #[instrument(skip(self))]
    async fn delete_project(&self, project_id: i64) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_project"])
            .start_timer();

        let result = sqlx::query("DELETE FROM projects WHERE project_id = $1")
            .bind(project_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to delete project: {}", e))
            })?;

        timer.observe_duration();

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, input), fields(project_id = input.project_id, plot_number = %input.plot_number))]
    async fn create_plot(&self, input: &CreatePlot) -> Result<Plot, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_plot"])
            .start_timer();

        let plot = sqlx::query_as::<_, Plot>(
            r#"
            INSERT INTO plots (project_id, plot_number, size, price, property_type, phases)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING plot_id, project_id, plot_number, size, price, property_type, phases, is_available, created_utc, updated_utc
            "#,
        )
        .bind(input.project_id)
        .bind(&input.plot_number)
        .bind(input.size)
        .bind(input.price)
        .bind(input.property_type.as_str())
        .bind(&input.phases)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "Plot '{}' already exists in this project",
                    input.plot_number
                ))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create plot: {}", e)),
        })?;

        timer.observe_duration();
        info!(plot_id = plot.plot_id, "Plot created");

        Ok(plot)
    }

    #[instrument(skip(self))]
    async fn get_plot(&self, plot_id: i64) -> Result<Option<Plot>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_plot"])
            .start_timer();

        let plot = sqlx::query_as::<_, Plot>(
            r#"
            SELECT plot_id, project_id, plot_number, size, price, property_type, phases, is_available, created_utc, updated_utc
            FROM plots
            WHERE plot_id = $1
            "#,
        )
        .bind(plot_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get plot: {}", e)))?;

        timer.observe_duration();

        Ok(plot)
    }

    #[instrument(skip(self, scope, filter))]
    async fn list_plots(
        &self,
        scope: &Scope,
        filter: &ListPlotsFilter,
    ) -> Result<Vec<Plot>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_plots"])
            .start_timer();

        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT pl.plot_id, pl.project_id, pl.plot_number, pl.size, pl.price, pl.property_type, pl.phases, pl.is_available, pl.created_utc, pl.updated_utc \
             FROM plots pl JOIN projects p ON p.project_id = pl.project_id WHERE TRUE",
        );
        push_scope(&mut qb, scope);
        if let Some(project_id) = filter.project_id {
            qb.push(" AND pl.project_id = ").push_bind(project_id);
        }
        if let Some(is_available) = filter.is_available {
            qb.push(" AND pl.is_available = ").push_bind(is_available);
        }
        qb.push(" ORDER BY pl.project_id, pl.plot_number");

        let plots = qb
            .build_query_as::<Plot>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list plots: {}", e)))?;

        timer.observe_duration();

        Ok(plots)
    }

    #[instrument(skip(self, input), fields(plot_id = input.plot_id, created_by = input.created_by))]
    async fn create_booking(&self, input: &CreateBooking) -> Result<Booking, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_booking"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let claimed = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE plots
            SET is_available = FALSE, updated_utc = NOW()
            WHERE plot_id = $1 AND is_available = TRUE
            RETURNING plot_id
            "#,
        )
        .bind(input.plot_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to claim plot: {}", e)))?;

        if claimed.is_none() {
            tx.rollback().await.ok();
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Plot {} is not available",
                input.plot_id
            )));
        }

        let booking = sqlx::query_as::<_, Booking>(
            r#"
            INSERT INTO bookings (plot_id, created_by, customer_name, customer_contact, phase, purchase_price, amount_paid, payment_reference)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING booking_id, plot_id, created_by, customer_name, customer_contact, phase, purchase_price, amount_paid, status, payment_reference, booking_date, updated_utc
            "#,
        )
        .bind(input.plot_id)
        .bind(input.created_by)
        .bind(&input.customer_name)
        .bind(&input.customer_contact)
        .bind(&input.phase)
        .bind(input.purchase_price)
        .bind(input.amount_paid)
        .bind(&input.payment_reference)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create booking: {}", e)))?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit booking: {}", e))
        })?;

        timer.observe_duration();
        info!(booking_id = booking.booking_id, "Booking created");

        Ok(booking)
    }

    #[instrument(skip(self))]
    async fn get_booking(&self, booking_id: i64) -> Result<Option<Booking>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_booking"])
            .start_timer();

        let booking = sqlx::query_as::<_, Booking>(
            r#"
            SELECT booking_id, plot_id, created_by, customer_name, customer_contact, phase, purchase_price, amount_paid, status, payment_reference, booking_date, updated_utc
            FROM bookings
            WHERE booking_id = $1
            "#,
        )
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get booking: {}", e)))?;

        timer.observe_duration();

        Ok(booking)
    }

    #[instrument(skip(self, scope, filter))]
    async fn list_bookings(
        &self,
        scope: &Scope,
        filter: &ListBookingsFilter,
    ) -> Result<Vec<Booking>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_bookings"])
            .start_timer();

        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT b.booking_id, b.plot_id, b.created_by, b.customer_name, b.customer_contact, b.phase, b.purchase_price, b.amount_paid, b.status, b.payment_reference, b.booking_date, b.updated_utc \
             FROM bookings b \
             JOIN plots pl ON pl.plot_id = b.plot_id \
             JOIN projects p ON p.project_id = pl.project_id WHERE TRUE",
        );
        push_scope(&mut qb, scope);
        if let Some(project_id) = filter.project_id {
            qb.push(" AND p.project_id = ").push_bind(project_id);
        }
        if let Some(plot_id) = filter.plot_id {
            qb.push(" AND b.plot_id = ").push_bind(plot_id);
        }
        if let Some(status) = filter.status {
            qb.push(" AND b.status = ").push_bind(status.as_str());
        }
        qb.push(" ORDER BY b.booking_date DESC, b.booking_id DESC");

        let bookings = qb
            .build_query_as::<Booking>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to list bookings: {}", e))
            })?;

        timer.observe_duration();

        Ok(bookings)
    }

    #[instrument(skip(self, input))]
    async fn update_booking(
        &self,
        booking_id: i64,
        input: &UpdateBooking,
    ) -> Result<Option<Booking>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_booking"])
            .start_timer();

        let booking = sqlx::query_as::<_, Booking>(
            r#"
            UPDATE bookings
            SET customer_name = COALESCE($2, customer_name),
                customer_contact = COALESCE($3, customer_contact),
                status = COALESCE($4, status),
                payment_reference = COALESCE($5, payment_reference),
                updated_utc = NOW()
            WHERE booking_id = $1
            RETURNING booking_id, plot_id, created_by, customer_name, customer_contact, phase, purchase_price, amount_paid, status, payment_reference, booking_date, updated_utc
            "#,
        )
        .bind(booking_id)
        .bind(&input.customer_name)
        .bind(&input.customer_contact)
        .bind(input.status.map(|s| s.as_str()))
        .bind(&input.payment_reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update booking: {}", e)))?;

        timer.observe_duration();

        Ok(booking)
    }

    #[instrument(skip(self))]
    async fn delete_booking(&self, booking_id: i64) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_booking"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let plot_id = sqlx::query_scalar::<_, i64>(
            "DELETE FROM bookings WHERE booking_id = $1 RETURNING plot_id",
        )
        .bind(booking_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to delete booking: {}", e)))?;

        let Some(plot_id) = plot_id else {
            tx.rollback().await.ok();
            timer.observe_duration();
            return Ok(false);
        };

        sqlx::query(
            r#"
            UPDATE plots
            SET is_available = TRUE, updated_utc = NOW()
            WHERE plot_id = $1
              AND NOT EXISTS (SELECT 1 FROM bookings WHERE plot_id = $1)
            "#,
        )
        .bind(plot_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to release plot: {}", e)))?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit booking delete: {}", e))
        })?;

        timer.observe_duration();
        info!(booking_id, plot_id, "Booking deleted, plot released");

        Ok(true)
    }

    #[instrument(skip(self, amount), fields(amount = %amount))]
    async fn apply_installment(
        &self,
        booking_id: i64,
        agent_name: &str,
        amount: Decimal,
    ) -> Result<InstallmentApplied, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["apply_installment"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        // Row lock serializes concurrent installments on the same booking.
        let previous_deposit = sqlx::query_scalar::<_, Decimal>(
            "SELECT amount_paid FROM bookings WHERE booking_id = $1 FOR UPDATE",
        )
        .bind(booking_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock booking: {}", e)))?;

        let Some(previous_deposit) = previous_deposit else {
            tx.rollback().await.ok();
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Booking {} not found",
                booking_id
            )));
        };

        let booking = sqlx::query_as::<_, Booking>(
            r#"
            UPDATE bookings
            SET amount_paid = amount_paid + $2, updated_utc = NOW()
            WHERE booking_id = $1
            RETURNING booking_id, plot_id, created_by, customer_name, customer_contact, phase, purchase_price, amount_paid, status, payment_reference, booking_date, updated_utc
            "#,
        )
        .bind(booking_id)
        .bind(amount)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to apply installment: {}", e))
        })?;

        sqlx::query(
            r#"
            INSERT INTO project_sales (plot_id, client_name, phase, purchase_price, deposit)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (plot_id, client_name) DO UPDATE
            SET deposit = EXCLUDED.deposit,
                purchase_price = EXCLUDED.purchase_price,
                phase = EXCLUDED.phase,
                updated_utc = NOW()
            "#,
        )
        .bind(booking.plot_id)
        .bind(&booking.customer_name)
        .bind(&booking.phase)
        .bind(booking.purchase_price)
        .bind(booking.amount_paid)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to upsert project sale: {}", e))
        })?;

        // Commission is only set on first insert; later installments keep
        // whatever an admin has configured.
        sqlx::query(
            r#"
            INSERT INTO agent_sales (plot_id, agent_name, phase, purchase_price, commission)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (plot_id, agent_name) DO UPDATE
            SET purchase_price = EXCLUDED.purchase_price,
                phase = EXCLUDED.phase,
                updated_utc = NOW()
            "#,
        )
        .bind(booking.plot_id)
        .bind(agent_name)
        .bind(&booking.phase)
        .bind(booking.purchase_price)
        .bind(default_commission())
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to upsert agent sale: {}", e))
        })?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit installment: {}", e))
        })?;

        timer.observe_duration();
        info!(
            booking_id,
            previous_deposit = %previous_deposit,
            new_deposit = %booking.amount_paid,
            "Installment applied"
        );

        Ok(InstallmentApplied {
            previous_deposit,
            booking,
        })
    }

    #[instrument(skip(self, scope, filter))]
    async fn list_project_sales(
        &self,
        scope: &Scope,
        filter: &ListSalesFilter,
    ) -> Result<Vec<ProjectSale>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_project_sales"])
            .start_timer();

        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT s.sale_id, s.plot_id, s.client_name, s.phase, s.purchase_price, s.deposit, s.created_utc, s.updated_utc \
             FROM project_sales s \
             JOIN plots pl ON pl.plot_id = s.plot_id \
             JOIN projects p ON p.project_id = pl.project_id WHERE TRUE",
        );
        push_scope(&mut qb, scope);
        if let Some(project_id) = filter.project_id {
            qb.push(" AND p.project_id = ").push_bind(project_id);
        }
        if let Some(plot_id) = filter.plot_id {
            qb.push(" AND s.plot_id = ").push_bind(plot_id);
        }
        qb.push(" ORDER BY s.sale_id");

        let sales = qb
            .build_query_as::<ProjectSale>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to list project sales: {}", e))
            })?;

        timer.observe_duration();

        Ok(sales)
    }

    #[instrument(skip(self, scope, filter))]
    async fn list_agent_sales(
        &self,
        scope: &Scope,
        filter: &ListSalesFilter,
    ) -> Result<Vec<AgentSale>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_agent_sales"])
            .start_timer();

        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT s.sale_id, s.plot_id, s.agent_name, s.phase, s.purchase_price, s.commission, s.created_utc, s.updated_utc \
             FROM agent_sales s \
             JOIN plots pl ON pl.plot_id = s.plot_id \
             JOIN projects p ON p.project_id = pl.project_id WHERE TRUE",
        );
        push_scope(&mut qb, scope);
        if let Some(project_id) = filter.project_id {
            qb.push(" AND p.project_id = ").push_bind(project_id);
        }
        if let Some(plot_id) = filter.plot_id {
            qb.push(" AND s.plot_id = ").push_bind(plot_id);
        }
        qb.push(" ORDER BY s.sale_id");

        let sales = qb
            .build_query_as::<AgentSale>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to list agent sales: {}", e))
            })?;

        timer.observe_duration();

        Ok(sales)
    }

    #[instrument(skip(self))]
    async fn get_agent_sale(&self, sale_id: i64) -> Result<Option<AgentSale>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_agent_sale"])
            .start_timer();

        let sale = sqlx::query_as::<_, AgentSale>(
            r#"
            SELECT sale_id, plot_id, agent_name, phase, purchase_price, commission, created_utc, updated_utc
            FROM agent_sales
            WHERE sale_id = $1
            "#,
        )
        .bind(sale_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get agent sale: {}", e)))?;

        timer.observe_duration();

        Ok(sale)
    }

    #[instrument(skip(self, commission), fields(commission = %commission))]
    async fn update_agent_commission(
        &self,
        sale_id: i64,
        commission: Decimal,
    ) -> Result<Option<AgentSale>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_agent_commission"])
            .start_timer();

        let sale = sqlx::query_as::<_, AgentSale>(
            r#"
            UPDATE agent_sales
            SET commission = $2, updated_utc = NOW()
            WHERE sale_id = $1
            RETURNING sale_id, plot_id, agent_name, phase, purchase_price, commission, created_utc, updated_utc
            "#,
        )
        .bind(sale_id)
        .bind(commission)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to update commission: {}", e))
        })?;

        timer.observe_duration();

        Ok(sale)
    }
}
