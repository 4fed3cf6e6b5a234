//! Eviction Coordinator.
//!
//! Server-initiated removal of a participant from a session: the target's
//! connections in the session room receive `removalNotice`, leave the
//! session and supervisor rooms and are terminated. The remaining members
//! then hear `participantRemoved` and a refreshed participant list.
//!
//! An unknown session, or a target that is no longer in the room, is a
//! logged no-op.

use super::gatekeeper::ConnectionContext;
use super::presence::PresenceRegistry;
use crate::actors::{Room, RoomKind, RoomRegistryHandle};
use crate::errors::ScError;
use crate::observability::metrics;
use crate::protocol::ServerEvent;
use crate::repositories::SessionStore;
use common::types::{IdentityId, SessionId};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Result of a removal request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eviction {
    /// The target's connections in the room were terminated.
    Removed { connections: usize },
    /// The session does not exist or the target was not in the room.
    NotFound,
}

#[derive(Clone)]
pub struct EvictionCoordinator {
    sessions: Arc<dyn SessionStore>,
    registry: RoomRegistryHandle,
    presence: PresenceRegistry,
}

impl EvictionCoordinator {
    #[must_use]
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        registry: RoomRegistryHandle,
        presence: PresenceRegistry,
    ) -> Self {
        Self {
            sessions,
            registry,
            presence,
        }
    }

    /// Remove `target` from `session_id`.
    ///
    /// Only the session's creator or a role allowed to remove participants
    /// may do this.
    ///
    /// # Errors
    ///
    /// - `ScError::PermissionDenied` - requester may not remove participants
    #[instrument(skip_all, fields(session_id = %session_id, target = %target))]
    pub async fn remove(
        &self,
        requester: &ConnectionContext,
        session_id: SessionId,
        target: IdentityId,
    ) -> Result<Eviction, ScError> {
        let Some(session) = self.sessions.find(session_id).await? else {
            metrics::record_eviction("not_found");
            info!(
                target: "sc.eviction",
                session_id = %session_id,
                target = %target,
                "Removal requested for unknown session, nothing to do"
            );
            return Ok(Eviction::NotFound);
        };

        let identity = &requester.identity;
        if identity.id != session.created_by && !identity.role.can_remove_participants() {
            metrics::record_eviction("denied");
            warn!(
                target: "sc.eviction",
                session_id = %session_id,
                requester = %identity.id,
                "Removal denied"
            );
            return Err(ScError::PermissionDenied(
                "not allowed to remove participants".to_string(),
            ));
        }

        let targets: Vec<_> = self
            .registry
            .members(Room::Session(session_id))
            .await?
            .into_iter()
            .filter(|member| member.identity.id == target)
            .map(|member| member.connection_id)
            .collect();

        if targets.is_empty() {
            metrics::record_eviction("not_found");
            info!(
                target: "sc.eviction",
                session_id = %session_id,
                target = %target,
                "Removal target not in session, nothing to do"
            );
            return Ok(Eviction::NotFound);
        }

        for connection_id in &targets {
            self.registry
                .send_to(*connection_id, ServerEvent::RemovalNotice { session_id })
                .await?;
            self.registry
                .leave_kind(*connection_id, RoomKind::Session)
                .await?;
            self.registry
                .leave(*connection_id, Room::Supervisor(session_id))
                .await?;
            self.registry.terminate(*connection_id, "removed").await?;
        }

        self.registry
            .broadcast(
                Room::Session(session_id),
                ServerEvent::ParticipantRemoved {
                    session_id,
                    identity: target,
                },
                None,
            )
            .await?;
        self.presence
            .broadcast_list(session_id, session.organisation_id)
            .await?;

        metrics::record_eviction("removed");
        info!(
            target: "sc.eviction",
            session_id = %session_id,
            target = %target,
            connections = targets.len(),
            "Participant removed"
        );
        Ok(Eviction::Removed {
            connections: targets.len(),
        })
    }
}
