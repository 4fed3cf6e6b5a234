//! HTTP routes for the Session Coordinator.
//!
//! Defines the Axum router and application state.

use crate::actors::{ActorMetrics, RoomRegistryHandle};
use crate::config::Config;
use crate::errors::ScError;
use crate::handlers;
use crate::models::RoleCapacityPolicy;
use crate::repositories::{IdentityStore, SessionStore, WardSessionStore};
use crate::services::{
    AdmissionController, EvictionCoordinator, Gatekeeper, LifecycleCoordinator, LoginMode,
    PresenceRegistry, WardCoordinator,
};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Registry namespace for clinical sessions.
pub const SESSIONS_NAMESPACE: &str = "sessions";

/// Registry namespace for ward sessions.
pub const WARD_NAMESPACE: &str = "ward";

/// The stores the coordinator reads and updates.
#[derive(Clone)]
pub struct Stores {
    pub identities: Arc<dyn IdentityStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub ward_sessions: Arc<dyn WardSessionStore>,
}

/// Coordinator tunables derived from [`Config`].
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub capacity_policy: RoleCapacityPolicy,
    pub eligibility_window: chrono::Duration,
    pub ward_expiry_grace: chrono::Duration,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            capacity_policy: RoleCapacityPolicy::default(),
            eligibility_window: chrono::Duration::hours(6),
            ward_expiry_grace: chrono::Duration::seconds(60),
        }
    }
}

impl CoordinatorSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            capacity_policy: config.capacity_policy(),
            eligibility_window: config.eligibility_window(),
            ward_expiry_grace: config.ward_expiry_grace(),
        }
    }
}

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub session_gatekeeper: Gatekeeper,
    pub ward_gatekeeper: Gatekeeper,
    pub admission: AdmissionController,
    pub presence: PresenceRegistry,
    pub eviction: EvictionCoordinator,
    pub lifecycle: LifecycleCoordinator,
    pub ward: WardCoordinator,
    session_registry: RoomRegistryHandle,
    ward_registry: RoomRegistryHandle,
}

impl AppState {
    /// Spawn both room registries and wire the services onto them.
    #[must_use]
    pub fn new(stores: Stores, settings: CoordinatorSettings, metrics: Arc<ActorMetrics>) -> Self {
        let session_registry = RoomRegistryHandle::new(SESSIONS_NAMESPACE, Arc::clone(&metrics));
        let ward_registry = RoomRegistryHandle::new(WARD_NAMESPACE, metrics);

        let presence = PresenceRegistry::new(session_registry.clone());

        Self {
            session_gatekeeper: Gatekeeper::new(
                Arc::clone(&stores.identities),
                session_registry.clone(),
                LoginMode::UsernameOrEmail,
            ),
            ward_gatekeeper: Gatekeeper::new(
                Arc::clone(&stores.identities),
                ward_registry.clone(),
                LoginMode::Username,
            ),
            admission: AdmissionController::new(
                Arc::clone(&stores.sessions),
                Arc::clone(&stores.identities),
                session_registry.clone(),
                settings.capacity_policy,
                settings.eligibility_window,
            ),
            eviction: EvictionCoordinator::new(
                Arc::clone(&stores.sessions),
                session_registry.clone(),
                presence.clone(),
            ),
            lifecycle: LifecycleCoordinator::new(
                Arc::clone(&stores.sessions),
                Arc::clone(&stores.identities),
                session_registry.clone(),
            ),
            ward: WardCoordinator::new(
                Arc::clone(&stores.ward_sessions),
                ward_registry.clone(),
                settings.ward_expiry_grace,
            ),
            presence,
            session_registry,
            ward_registry,
        }
    }

    #[must_use]
    pub fn session_registry(&self) -> &RoomRegistryHandle {
        &self.session_registry
    }

    #[must_use]
    pub fn ward_registry(&self) -> &RoomRegistryHandle {
        &self.ward_registry
    }

    /// Close every connection in both namespaces and stop the registries.
    ///
    /// # Errors
    ///
    /// Returns the first registry error; both registries are always asked
    /// to shut down.
    pub async fn shutdown(&self) -> Result<(), ScError> {
        let sessions = self.session_registry.shutdown().await;
        let ward = self.ward_registry.shutdown().await;
        sessions.and(ward)
    }
}

/// Build the application routes.
///
/// - `GET /ws/sessions?identity=...` - clinical session socket
/// - `GET /ws/ward?identity=...` - ward socket
/// - `POST /internal/topics/{topic_id}` - publish an entity update
/// - TraceLayer for request logging
/// - 30 second request timeout (upgraded sockets are not affected)
pub fn build_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws/sessions", get(handlers::session_socket))
        .route("/ws/ward", get(handlers::ward_socket))
        .route("/internal/topics/:topic_id", post(handlers::publish_topic))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }

    #[test]
    fn test_default_settings_match_policy_defaults() {
        let settings = CoordinatorSettings::default();
        assert_eq!(
            settings.capacity_policy.limit_for(crate::models::RoleKind::User),
            Some(3)
        );
        assert_eq!(settings.eligibility_window, chrono::Duration::hours(6));
    }
}
