//! Metrics module for land-service.
//! Prometheus counters for billing, reconciliation and the installment ledger,
//! plus the `metrics` recorder behind the shared HTTP middleware.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec,
    IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

/// Database query duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!("land_db_query_duration_seconds", "Database query duration"),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Recorder for the HTTP middleware counters.
pub static METRICS_HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

/// Reconciliation outcomes by trigger (verification, notification).
pub static RECONCILIATION_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Outbound gateway calls by operation and outcome.
pub static GATEWAY_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Outbound gateway call latency.
pub static GATEWAY_REQUEST_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Subscription lifecycle operations.
pub static SUBSCRIPTION_OPERATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Installments applied to bookings.
pub static INSTALLMENTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Booking create/delete operations.
pub static BOOKING_OPERATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics. Safe to call more than once.
pub fn init_metrics() {
    METRICS_HANDLE.get_or_init(|| match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "HTTP metrics recorder not installed");
            None
        }
    });

    RECONCILIATION_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "land_payment_reconciliations_total",
                "Payment reconciliations by trigger and outcome"
            ),
            &["source", "outcome"]
        )
        .expect("Failed to register RECONCILIATION_TOTAL")
    });

    GATEWAY_REQUESTS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "land_gateway_requests_total",
                "Pesapal API calls by operation and outcome"
            ),
            &["operation", "outcome"]
        )
        .expect("Failed to register GATEWAY_REQUESTS_TOTAL")
    });

    GATEWAY_REQUEST_DURATION.get_or_init(|| {
        register_histogram_vec!(
            histogram_opts!(
                "land_gateway_request_duration_seconds",
                "Pesapal API call duration",
                vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
            ),
            &["operation"]
        )
        .expect("Failed to register GATEWAY_REQUEST_DURATION")
    });

    SUBSCRIPTION_OPERATIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "land_subscription_operations_total",
                "Subscription lifecycle operations"
            ),
            &["operation"]
        )
        .expect("Failed to register SUBSCRIPTION_OPERATIONS_TOTAL")
    });

    INSTALLMENTS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("land_installments_total", "Installments applied to bookings"),
            &["outcome"]
        )
        .expect("Failed to register INSTALLMENTS_TOTAL")
    });

    BOOKING_OPERATIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("land_booking_operations_total", "Booking operations"),
            &["operation"]
        )
        .expect("Failed to register BOOKING_OPERATIONS_TOTAL")
    });

    // Force initialization of lazy statics
    let _ = &*DB_QUERY_DURATION;
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let mut output = METRICS_HANDLE
        .get()
        .and_then(|handle| handle.as_ref())
        .map(|handle| handle.render())
        .unwrap_or_default();

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&prometheus::gather(), &mut buffer).is_ok() {
        output.push_str(&String::from_utf8_lossy(&buffer));
    }

    output
}

pub fn record_reconciliation(source: &str, outcome: &str) {
    if let Some(counter) = RECONCILIATION_TOTAL.get() {
        counter.with_label_values(&[source, outcome]).inc();
    }
}

pub fn record_gateway_request(operation: &str, outcome: &str, duration_secs: f64) {
    if let Some(counter) = GATEWAY_REQUESTS_TOTAL.get() {
        counter.with_label_values(&[operation, outcome]).inc();
    }
    if let Some(histogram) = GATEWAY_REQUEST_DURATION.get() {
        histogram
            .with_label_values(&[operation])
            .observe(duration_secs);
    }
}

pub fn record_subscription_operation(operation: &str) {
    if let Some(counter) = SUBSCRIPTION_OPERATIONS_TOTAL.get() {
        counter.with_label_values(&[operation]).inc();
    }
}

pub fn record_installment(outcome: &str) {
    if let Some(counter) = INSTALLMENTS_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

pub fn record_booking_operation(operation: &str) {
    if let Some(counter) = BOOKING_OPERATIONS_TOTAL.get() {
        counter.with_label_values(&[operation]).inc();
    }
}
