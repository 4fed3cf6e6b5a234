//! Observability for the Session Coordinator.
//!
//! All instrumentation uses `#[instrument(skip_all)]` with explicit safe
//! fields. Payloads, display names and emails are never logged.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `sc_connections_active` | Gauge | none | Live WebSocket connections |
//! | `sc_events_dropped_total` | Counter | none | Events dropped on full connection mailboxes |
//! | `sc_admissions_total` | Counter | `outcome` | Admission decisions |
//! | `sc_admission_duration_seconds` | Histogram | none | Admission latency |
//! | `sc_sessions_expired_total` | Counter | `kind` | Scheduler transitions |
//! | `sc_expiry_tick_duration_seconds` | Histogram | `kind` | Expiry pass latency |
//! | `sc_evictions_total` | Counter | `outcome` | Participant removals |
//! | `sc_store_errors_total` | Counter | `operation` | Failed store calls |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::{
    init_metrics_recorder, record_admission, record_event_dropped, record_eviction,
    record_expiry_tick, record_session_expired, record_store_error, set_connections_active,
};
