//! Application startup and lifecycle management.

use crate::config::LandConfig;
use crate::handlers;
use crate::services::store::AccountStore;
use crate::services::{
    get_metrics, init_metrics, AuditTrail, Database, InstallmentLedger, PesapalClient,
    ReconciliationEngine, Store, SubscriptionLifecycle,
};
use axum::{
    extract::State,
    http::StatusCode,
    middleware::{from_fn, from_fn_with_state},
    response::IntoResponse,
    routing::{delete, get, patch, post},
    Json, Router,
};
use dashmap::DashMap;
use secrecy::ExposeSecret;
use serde_json::json;
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware,
    security_headers::security_headers_middleware,
    signature::{signature_validation_middleware, SignatureConfig, SignatureStore},
    tracing::request_id_middleware,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: LandConfig,
    pub store: Arc<dyn Store>,
    pub pesapal: PesapalClient,
    pub lifecycle: SubscriptionLifecycle,
    pub reconciliation: ReconciliationEngine,
    pub installments: InstallmentLedger,
    pub audit: AuditTrail,
    pub signature_config: SignatureConfig,
    nonces: Arc<DashMap<String, Instant>>,
}

impl AppState {
    pub fn new(config: LandConfig, store: Arc<dyn Store>) -> Result<Self, AppError> {
        let pesapal = PesapalClient::new(config.pesapal.clone()).map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("Failed to build Pesapal client: {}", e))
        })?;
        if pesapal.is_configured() {
            tracing::info!(base_url = %config.pesapal.base_url, "Pesapal client initialized");
        } else {
            tracing::warn!("Pesapal credentials not configured - checkout is disabled");
        }

        let lifecycle = SubscriptionLifecycle::new(store.clone());
        let reconciliation =
            ReconciliationEngine::new(store.clone(), pesapal.clone(), lifecycle.clone());

        let signature_config = SignatureConfig {
            require_signatures: config.signature.enabled,
            excluded_paths: vec![
                "/health".to_string(),
                "/ready".to_string(),
                "/metrics".to_string(),
                "/subscription-plans".to_string(),
                "/webhooks/pesapal".to_string(), // Pesapal IPN, not the gateway
            ],
            ..SignatureConfig::default()
        };

        Ok(Self {
            installments: InstallmentLedger::new(store.clone()),
            audit: AuditTrail::new(store.clone()),
            config,
            store,
            pesapal,
            lifecycle,
            reconciliation,
            signature_config,
            nonces: Arc::new(DashMap::new()),
        })
    }
}

impl AsRef<SignatureConfig> for AppState {
    fn as_ref(&self) -> &SignatureConfig {
        &self.signature_config
    }
}

#[async_trait::async_trait]
impl SignatureStore for AppState {
    async fn validate_nonce(&self, nonce: &str) -> Result<bool, AppError> {
        let ttl = Duration::from_secs(self.config.signature.nonce_ttl_secs);
        let now = Instant::now();

        self.nonces.retain(|_, seen| now.duration_since(*seen) < ttl);

        match self.nonces.entry(nonce.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(now);
                Ok(true)
            }
        }
    }

    async fn get_signing_secret(&self, _client_id: &str) -> Result<Option<String>, AppError> {
        // Single shared secret for the gateway; per-client secrets are not needed yet.
        Ok(Some(self.config.signature.secret.expose_secret().clone()))
    }
}

// ============================================================================
// Probes
// ============================================================================

/// Health check endpoint for Docker/K8s liveness probes.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.health_check().await {
        Ok(_) => {
            tracing::debug!("Health check passed");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "service": state.config.service_name,
                    "version": env!("CARGO_PKG_VERSION")
                })),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed - database unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": state.config.service_name,
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Readiness check endpoint for K8s readiness probes.
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.health_check().await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Metrics endpoint for Prometheus scraping.
async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}

// ============================================================================
// Router
// ============================================================================

pub fn router(state: AppState) -> Router {
    use handlers::{
        audit, bookings, gateway, payments, plans, plots, projects, sales, subscriptions, users,
        webhooks,
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        // Plans
        .route("/subscription-plans", get(plans::list_plans))
        .route("/subscription-plans/:id", get(plans::get_plan))
        .route("/admin/subscription-plans", post(plans::create_plan))
        .route(
            "/admin/subscription-plans/:id",
            patch(plans::update_plan).delete(plans::deactivate_plan),
        )
        // Subscription and payments
        .route("/subscription", get(subscriptions::get_subscription))
        .route("/subscription/subscribe", post(subscriptions::subscribe))
        .route("/subscription/cancel", post(subscriptions::cancel_subscription))
        .route("/payments/history", get(payments::payment_history))
        .route(
            "/payments/verify/:order_tracking_id",
            get(payments::verify_payment),
        )
        .route(
            "/webhooks/pesapal",
            get(webhooks::pesapal_ipn).post(webhooks::pesapal_ipn_post),
        )
        // Administration
        .route("/admin/gateway/ipn", post(gateway::register_ipn))
        .route("/admin/users", get(users::list_users).post(users::create_user))
        .route(
            "/admin/users/:id",
            get(users::get_user)
                .patch(users::update_user)
                .delete(users::delete_user),
        )
        .route(
            "/admin/users/:id/subscription",
            post(subscriptions::grant_subscription),
        )
        .route("/admin/audit-logs", get(audit::list_audit_logs))
        .route("/users/subagents", post(users::create_subagent))
        // Land
        .route(
            "/projects",
            get(projects::list_projects).post(projects::create_project),
        )
        .route(
            "/projects/:id",
            get(projects::get_project)
                .patch(projects::update_project)
                .delete(projects::delete_project),
        )
        .route("/projects/:id/assignments", post(projects::assign_user))
        .route(
            "/projects/:id/assignments/:user_id",
            delete(projects::unassign_user),
        )
        .route("/plots", get(plots::list_plots).post(plots::create_plot))
        .route("/plots/:id", get(plots::get_plot))
        .route(
            "/bookings",
            get(bookings::list_bookings).post(bookings::create_booking),
        )
        .route(
            "/bookings/:id",
            get(bookings::get_booking)
                .patch(bookings::update_booking)
                .delete(bookings::delete_booking),
        )
        .route(
            "/bookings/:id/installments",
            post(bookings::pay_installment),
        )
        .route("/sales/projects", get(sales::list_project_sales))
        .route("/sales/agents", get(sales::list_agent_sales))
        .route("/sales/agents/:id", patch(sales::update_commission))
        .layer(from_fn_with_state(
            state.clone(),
            signature_validation_middleware::<AppState>,
        ))
        .layer(from_fn(security_headers_middleware))
        .layer(from_fn(metrics_middleware))
        .layer(from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(request_span::<axum::body::Body>))
        .with_state(state)
}

/// Root span for a request. `user_id` is filled in once the caller is known.
fn request_span<B>(request: &axum::http::Request<B>) -> tracing::Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-");

    tracing::info_span!(
        "http_request",
        request_id = %request_id,
        method = %request.method(),
        uri = %request.uri(),
        version = ?request.version(),
        user_id = tracing::field::Empty,
    )
}

// ============================================================================
// Application
// ============================================================================

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    http_listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Connect to PostgreSQL, apply migrations and bind the listener.
    pub async fn build(config: LandConfig) -> Result<Self, AppError> {
        let db = Database::new(
            config.database.url.expose_secret(),
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        db.run_migrations().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run migrations");
            e
        })?;

        Self::build_with_store(config, Arc::new(db)).await
    }

    /// Bind the listener over an already constructed store.
    /// Tests use this with the in-memory store and port 0.
    pub async fn build_with_store(
        config: LandConfig,
        store: Arc<dyn Store>,
    ) -> Result<Self, AppError> {
        init_metrics();

        let http_addr = config.common.bind_address();
        let http_listener = TcpListener::bind(&http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        let state = AppState::new(config, store)?;

        tracing::info!(http_port = http_port, "Land service listener bound");

        Ok(Self {
            http_port,
            http_listener,
            state,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let app = router(self.state);

        tracing::info!(
            service = "land-service",
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.http_port,
            "Service ready to accept connections"
        );

        axum::serve(self.http_listener, app).await.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replayed_nonce_is_rejected() {
        let mut config = test_config();
        config.signature.nonce_ttl_secs = 60;
        let state = AppState::new(config, Arc::new(crate::services::InMemoryStore::new())).unwrap();

        assert!(state.validate_nonce("abc").await.unwrap());
        assert!(!state.validate_nonce("abc").await.unwrap());
        assert!(state.validate_nonce("def").await.unwrap());
    }

    #[test]
    fn request_span_has_room_for_the_caller() {
        let request = axum::http::Request::builder()
            .uri("/bookings")
            .header("x-request-id", "req-7")
            .body(())
            .unwrap();

        tracing::subscriber::with_default(tracing_subscriber::registry(), || {
            let span = request_span(&request);
            assert!(span.field("user_id").is_some());
            assert!(span.field("request_id").is_some());
        });
    }

    fn test_config() -> LandConfig {
        use crate::config::{DatabaseConfig, PesapalConfig, ServiceSignatureConfig};
        use secrecy::Secret;

        LandConfig {
            common: service_core::config::Config::default(),
            service_name: "land-service".to_string(),
            service_version: "test".to_string(),
            log_level: "info".to_string(),
            otlp_endpoint: None,
            database: DatabaseConfig {
                url: Secret::new(String::new()),
                max_connections: 1,
                min_connections: 1,
            },
            pesapal: PesapalConfig {
                consumer_key: String::new(),
                consumer_secret: Secret::new(String::new()),
                base_url: "http://localhost".to_string(),
                callback_url: String::new(),
                ipn_id: String::new(),
                ipn_url: String::new(),
                currency: "KES".to_string(),
                country_code: "KE".to_string(),
                timeout_secs: 5,
                token_ttl_secs: 300,
            },
            signature: ServiceSignatureConfig {
                enabled: false,
                secret: Secret::new("secret".to_string()),
                nonce_ttl_secs: 300,
            },
        }
    }
}
