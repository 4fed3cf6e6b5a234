//! Ward session expiry background task.
//!
//! Auto-completes ward sessions past `start_time + duration + grace`,
//! recording `endedBy = "auto"` and notifying the ward's base room.

use crate::observability::metrics;
use crate::services::WardCoordinator;
use chrono::Utc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// Default check interval in seconds.
const DEFAULT_CHECK_INTERVAL_SECONDS: u64 = 60;

#[derive(Debug, Clone)]
pub struct WardExpiryConfig {
    pub check_interval_seconds: u64,
}

impl Default for WardExpiryConfig {
    fn default() -> Self {
        Self {
            check_interval_seconds: DEFAULT_CHECK_INTERVAL_SECONDS,
        }
    }
}

/// Start the ward expiry loop. Returns when `cancel_token` fires.
#[instrument(skip_all, name = "sc.task.ward_expiry")]
pub async fn start_ward_expiry(
    ward: WardCoordinator,
    config: WardExpiryConfig,
    cancel_token: CancellationToken,
) {
    info!(
        target: "sc.task.ward_expiry",
        check_interval_seconds = config.check_interval_seconds,
        "Starting ward expiry task"
    );

    let mut interval = tokio::time::interval(Duration::from_secs(config.check_interval_seconds));

    loop {
        tokio::select! {
            _ = interval.tick() => {
                run_ward_expiry(&ward).await;
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "sc.task.ward_expiry",
                    "Ward expiry task received shutdown signal, exiting"
                );
                break;
            }
        }
    }

    info!(target: "sc.task.ward_expiry", "Ward expiry task stopped");
}

pub(crate) async fn run_ward_expiry(ward: &WardCoordinator) {
    let start = Instant::now();

    match ward.expire_overdue(Utc::now()).await {
        Ok(count) if count > 0 => {
            info!(
                target: "sc.task.ward_expiry",
                expired_count = count,
                "Auto-completed ward sessions"
            );
        }
        Ok(_) => {}
        Err(e) => {
            tracing::error!(
                target: "sc.task.ward_expiry",
                error = %e,
                "Failed to load active ward sessions"
            );
        }
    }

    metrics::record_expiry_tick("ward", start.elapsed());
}
