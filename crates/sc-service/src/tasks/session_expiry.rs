//! Session expiry background task.
//!
//! Every `check_interval_seconds` the task ends active sessions whose
//! `start_time + duration` has passed and broadcasts `sessionEnded` to the
//! creator's organisation room. A session therefore closes within one
//! interval of its scheduled end, whether or not anyone is connected.
//!
//! # Graceful Shutdown
//!
//! When the cancellation token fires the task finishes its current pass and
//! exits.

use crate::observability::metrics;
use crate::services::LifecycleCoordinator;
use chrono::Utc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// Default check interval in seconds.
const DEFAULT_CHECK_INTERVAL_SECONDS: u64 = 60;

/// Configuration for the session expiry task.
#[derive(Debug, Clone)]
pub struct SessionExpiryConfig {
    pub check_interval_seconds: u64,
}

impl Default for SessionExpiryConfig {
    fn default() -> Self {
        Self {
            check_interval_seconds: DEFAULT_CHECK_INTERVAL_SECONDS,
        }
    }
}

/// Start the session expiry loop. Returns when `cancel_token` fires.
#[instrument(skip_all, name = "sc.task.session_expiry")]
pub async fn start_session_expiry(
    lifecycle: LifecycleCoordinator,
    config: SessionExpiryConfig,
    cancel_token: CancellationToken,
) {
    info!(
        target: "sc.task.session_expiry",
        check_interval_seconds = config.check_interval_seconds,
        "Starting session expiry task"
    );

    let mut interval = tokio::time::interval(Duration::from_secs(config.check_interval_seconds));

    loop {
        tokio::select! {
            _ = interval.tick() => {
                run_session_expiry(&lifecycle).await;
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "sc.task.session_expiry",
                    "Session expiry task received shutdown signal, exiting"
                );
                break;
            }
        }
    }

    info!(
        target: "sc.task.session_expiry",
        "Session expiry task stopped"
    );
}

/// Run a single expiry pass. Errors are logged, never propagated.
pub(crate) async fn run_session_expiry(lifecycle: &LifecycleCoordinator) {
    let start = Instant::now();

    match lifecycle.expire_due(Utc::now()).await {
        Ok(count) => {
            if count > 0 {
                info!(
                    target: "sc.task.session_expiry",
                    expired_count = count,
                    "Expired sessions"
                );
            }
        }
        Err(e) => {
            tracing::error!(
                target: "sc.task.session_expiry",
                error = %e,
                "Failed to load active sessions"
            );
        }
    }

    metrics::record_expiry_tick("session", start.elapsed());
}
