//! Session Coordinator
//!
//! # Servers
//!
//! - WebSocket + internal HTTP server (default: 0.0.0.0:8080)
//! - HTTP server for health and metrics (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Connect to PostgreSQL
//! 4. Build registries, services and application state
//! 5. Start health server, expiry schedulers and the main server
//! 6. Wait for shutdown signal, drain, close every connection

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use common::secret::ExposeSecret;
use sc_service::actors::ActorMetrics;
use sc_service::config::Config;
use sc_service::observability::{health_router, init_metrics_recorder, HealthState};
use sc_service::repositories::{PgIdentityStore, PgSessionStore, PgWardSessionStore};
use sc_service::routes::{self, AppState, CoordinatorSettings, Stores};
use sc_service::tasks::{
    start_session_expiry, start_ward_expiry, SessionExpiryConfig, WardExpiryConfig,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration first so the log format can follow it
    let config = Config::from_env()?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "sc_service=debug,tower_http=debug".into());
    if config.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!("Starting Session Coordinator");
    info!(
        bind_address = %config.bind_address,
        health_bind_address = %config.health_bind_address,
        expiry_check_interval_seconds = config.expiry_check_interval_seconds,
        ward_expiry_check_interval_seconds = config.ward_expiry_check_interval_seconds,
        eligibility_window_hours = config.eligibility_window_hours,
        "Configuration loaded successfully"
    );

    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    let health_state = Arc::new(HealthState::new());

    info!("Connecting to database...");
    let db_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(config.database_url.expose_secret())
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to connect to database");
            e
        })?;
    info!("Database connection established");

    let stores = Stores {
        identities: Arc::new(PgIdentityStore::new(db_pool.clone())),
        sessions: Arc::new(PgSessionStore::new(db_pool.clone())),
        ward_sessions: Arc::new(PgWardSessionStore::new(db_pool)),
    };
    let state = Arc::new(AppState::new(
        stores,
        CoordinatorSettings::from_config(&config),
        ActorMetrics::new(),
    ));

    let shutdown_token = CancellationToken::new();

    // Health server binds first so a bad address fails startup
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;
    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let health_app = health_router(Arc::clone(&health_state)).merge(metrics_router);
    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;

    let health_shutdown_token = shutdown_token.child_token();
    tokio::spawn(async move {
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });
    info!(addr = %health_addr, "Health server started");

    let session_expiry = tokio::spawn(start_session_expiry(
        state.lifecycle.clone(),
        SessionExpiryConfig {
            check_interval_seconds: config.expiry_check_interval_seconds,
        },
        shutdown_token.child_token(),
    ));
    let ward_expiry = tokio::spawn(start_ward_expiry(
        state.ward.clone(),
        WardExpiryConfig {
            check_interval_seconds: config.ward_expiry_check_interval_seconds,
        },
        shutdown_token.child_token(),
    ));

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid bind address");
        format!("Invalid bind address: {e}")
    })?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let app = routes::build_routes(Arc::clone(&state));

    health_state.set_ready();
    info!(addr = %addr, "Session Coordinator listening");

    let drain_period = config.drain_period();
    let server_token = shutdown_token.clone();
    let server_health = Arc::clone(&health_state);
    let server_state = Arc::clone(&state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Shutdown signal received, initiating graceful shutdown...");

            // Mark as not ready immediately so k8s stops sending traffic
            server_health.set_not_ready();
            server_token.cancel();

            if drain_period.is_zero() {
                info!("Skipping drain period");
            } else {
                warn!(drain_seconds = drain_period.as_secs(), "Draining connections...");
                tokio::time::sleep(drain_period).await;
            }

            // Open sockets keep the server alive until their actors stop
            if let Err(e) = server_state.shutdown().await {
                warn!(error = %e, "Registry shutdown error");
            }
        })
        .await?;

    shutdown_token.cancel();
    for task in [session_expiry, ward_expiry] {
        if let Err(e) = task.await {
            warn!(error = %e, "Expiry task ended abnormally");
        }
    }

    info!("Session Coordinator shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT"),
            Err(e) => error!(error = %e, "Failed to listen for SIGINT"),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM");
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
