//! Services module for land-service.

pub mod access_scope;
pub mod audit;
pub mod installments;
pub mod lifecycle;
pub mod metrics;
pub mod pesapal;
pub mod reconciliation;
pub mod store;

pub use access_scope::{scope_for, EntityKind, Scope};
pub use audit::AuditTrail;
pub use installments::{InstallmentLedger, InstallmentReceipt};
pub use lifecycle::SubscriptionLifecycle;
pub use metrics::{
    get_metrics, init_metrics, record_booking_operation, record_gateway_request,
    record_installment, record_reconciliation, record_subscription_operation,
};
pub use pesapal::{GatewayError, GatewayStatus, PesapalClient};
pub use reconciliation::{ReconcileError, ReconcileOutcome, ReconcileSource, ReconciliationEngine};
pub use store::{Database, InMemoryStore, Store};
