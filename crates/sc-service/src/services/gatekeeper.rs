//! Connection Gatekeeper.
//!
//! Authenticates a new connection against the identity store, binds the
//! identity to a fresh connection actor and auto-joins the identity and
//! organisation rooms. A failed lookup refuses the connection before any
//! room is joined.

use crate::actors::{ConnectionSnapshot, Room, RoomRegistryHandle};
use crate::errors::ScError;
use crate::models::Identity;
use crate::protocol::ServerEvent;
use crate::repositories::IdentityStore;
use common::types::ConnectionId;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

/// How a connection token is matched against identity records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginMode {
    /// Clinical sessions: username or email.
    UsernameOrEmail,
    /// Ward namespace: username only.
    Username,
}

/// The identity bound to one live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionContext {
    pub connection_id: ConnectionId,
    pub identity: Identity,
}

/// Gatekeeper for one namespace.
#[derive(Clone)]
pub struct Gatekeeper {
    identities: Arc<dyn IdentityStore>,
    registry: RoomRegistryHandle,
    mode: LoginMode,
}

impl Gatekeeper {
    #[must_use]
    pub fn new(
        identities: Arc<dyn IdentityStore>,
        registry: RoomRegistryHandle,
        mode: LoginMode,
    ) -> Self {
        Self {
            identities,
            registry,
            mode,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &RoomRegistryHandle {
        &self.registry
    }

    /// Resolve a connection token to an identity.
    ///
    /// # Errors
    ///
    /// - `ScError::Authentication` - empty token or no matching identity
    /// - `ScError::TransientStore` - identity lookup failed
    #[instrument(skip_all, fields(namespace = %self.registry.namespace()))]
    pub async fn authenticate(&self, token: &str) -> Result<Identity, ScError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(ScError::Authentication("missing identity".to_string()));
        }

        let identity = match self.mode {
            LoginMode::UsernameOrEmail => self.identities.find_by_login(token).await?,
            LoginMode::Username => self.identities.find_by_username(token).await?,
        };

        identity.ok_or_else(|| {
            warn!(
                target: "sc.gatekeeper",
                namespace = %self.registry.namespace(),
                "Connection refused: unknown identity"
            );
            ScError::Authentication("unknown identity".to_string())
        })
    }

    /// Bind an authenticated identity to a new connection.
    ///
    /// Spawns the connection actor forwarding to `outbound`, registers it,
    /// joins the identity and organisation rooms and sends `connected`.
    #[instrument(skip_all, fields(identity_id = %identity.id))]
    pub async fn bind(
        &self,
        identity: Identity,
        outbound: mpsc::Sender<ServerEvent>,
    ) -> Result<ConnectionContext, ScError> {
        let connection_id = ConnectionId::new();
        let (handle, _task) = self.registry.spawn_connection(connection_id, outbound);

        if let Err(e) = self.registry.register(handle.clone(), identity.clone()).await {
            handle.cancel();
            return Err(e);
        }

        self.registry
            .join(connection_id, Room::Identity(identity.id))
            .await?;
        self.registry
            .join(connection_id, Room::Organisation(identity.organisation_id))
            .await?;

        self.registry
            .send_to(
                connection_id,
                ServerEvent::Connected {
                    connection_id,
                    identity: identity.id,
                    organisation_id: identity.organisation_id,
                },
            )
            .await?;

        info!(
            target: "sc.gatekeeper",
            namespace = %self.registry.namespace(),
            connection_id = %connection_id,
            identity_id = %identity.id,
            role = %identity.role,
            "Connection bound"
        );

        Ok(ConnectionContext {
            connection_id,
            identity,
        })
    }

    /// Drop a connection from the registry. Returns what it held, or `None`
    /// if it had already been removed (e.g. evicted).
    pub async fn disconnect(
        &self,
        connection_id: ConnectionId,
    ) -> Result<Option<ConnectionSnapshot>, ScError> {
        let snapshot = self.registry.unregister(connection_id).await?;
        debug!(
            target: "sc.gatekeeper",
            namespace = %self.registry.namespace(),
            connection_id = %connection_id,
            was_registered = snapshot.is_some(),
            "Connection closed"
        );
        Ok(snapshot)
    }
}
