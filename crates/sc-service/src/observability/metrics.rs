//! Metrics definitions for the Session Coordinator.
//!
//! All metrics follow Prometheus naming conventions:
//! - `sc_` prefix for Session Coordinator
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `outcome`: admitted, re-acknowledged, plus one value per rejection reason
//! - `kind`: session, ward
//! - `operation`: bounded by store methods (~10 values)

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus metrics recorder and return the handle used to
/// serve `/metrics`.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Admission touches the registry and one store query
        .set_buckets_for_metric(
            Matcher::Prefix("sc_admission".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set admission buckets: {e}"))?
        // Expiry ticks walk every active session
        .set_buckets_for_metric(
            Matcher::Prefix("sc_expiry_tick".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000,
            ],
        )
        .map_err(|e| format!("Failed to set expiry tick buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

/// Set the number of live WebSocket connections across both namespaces.
///
/// Metric: `sc_connections_active`
pub fn set_connections_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("sc_connections_active").set(count as f64);
}

/// Record an event dropped because a connection's mailbox was full.
///
/// Metric: `sc_events_dropped_total`
pub fn record_event_dropped() {
    counter!("sc_events_dropped_total").increment(1);
}

/// Record the outcome and latency of one admission decision.
///
/// Metrics: `sc_admissions_total{outcome}`, `sc_admission_duration_seconds`
pub fn record_admission(outcome: &str, duration: Duration) {
    counter!("sc_admissions_total", "outcome" => outcome.to_string()).increment(1);
    histogram!("sc_admission_duration_seconds").record(duration.as_secs_f64());
}

/// Record a session or ward session transitioned by the scheduler.
///
/// Metric: `sc_sessions_expired_total{kind}`
pub fn record_session_expired(kind: &str) {
    counter!("sc_sessions_expired_total", "kind" => kind.to_string()).increment(1);
}

/// Record how long one expiry pass took.
///
/// Metric: `sc_expiry_tick_duration_seconds{kind}`
pub fn record_expiry_tick(kind: &str, duration: Duration) {
    histogram!("sc_expiry_tick_duration_seconds", "kind" => kind.to_string())
        .record(duration.as_secs_f64());
}

/// Record a removal request.
///
/// Metric: `sc_evictions_total{outcome}` (removed, not_found, denied)
pub fn record_eviction(outcome: &str) {
    counter!("sc_evictions_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record a failed store call.
///
/// Metric: `sc_store_errors_total{operation}`
pub fn record_store_error(operation: &str) {
    counter!("sc_store_errors_total", "operation" => operation.to_string()).increment(1);
}
