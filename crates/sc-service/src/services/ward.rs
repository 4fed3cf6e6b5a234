//! Ward variant: zone-based placement, tagged updates and ward session
//! termination.
//!
//! On connect, each ACTIVE ward session places the connection as:
//! - supervisor (starter or listed supervisor): base room + supervisor room
//! - zone occupant: base room + that zone's room
//! - bystander: nothing, until the client sends `rejoin`
//!
//! A tagged update always reaches the supervisor room, plus the named zone
//! room, or the base room when no zone is named.

use super::gatekeeper::ConnectionContext;
use crate::actors::{Room, RoomRegistryHandle};
use crate::errors::ScError;
use crate::models::{EndedBy, RoleKind, WardRole, WardSession, ZoneId};
use crate::observability::metrics;
use crate::protocol::ServerEvent;
use crate::repositories::WardSessionStore;
use chrono::{DateTime, Utc};
use common::types::WardSessionId;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Where a connection was placed in one ward session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WardPlacement {
    pub ward_session_id: WardSessionId,
    pub role: WardRole,
}

/// Rooms a placement joins, base room first.
#[must_use]
pub fn placement_rooms(ward_session_id: WardSessionId, role: &WardRole) -> Vec<Room> {
    match role {
        WardRole::Supervisor => vec![
            Room::Ward(ward_session_id),
            Room::WardSupervisor(ward_session_id),
        ],
        WardRole::Zone(zone) => vec![
            Room::Ward(ward_session_id),
            Room::Zone(ward_session_id, zone.clone()),
        ],
        WardRole::Bystander => Vec::new(),
    }
}

/// Rooms a tagged update is routed to.
#[must_use]
pub fn update_rooms(ward_session_id: WardSessionId, zone: Option<&ZoneId>) -> Vec<Room> {
    let scoped = zone.map_or(Room::Ward(ward_session_id), |zone| {
        Room::Zone(ward_session_id, zone.clone())
    });
    vec![Room::WardSupervisor(ward_session_id), scoped]
}

#[derive(Clone)]
pub struct WardCoordinator {
    ward_sessions: Arc<dyn WardSessionStore>,
    registry: RoomRegistryHandle,
    grace: chrono::Duration,
}

impl WardCoordinator {
    #[must_use]
    pub fn new(
        ward_sessions: Arc<dyn WardSessionStore>,
        registry: RoomRegistryHandle,
        grace: chrono::Duration,
    ) -> Self {
        Self {
            ward_sessions,
            registry,
            grace,
        }
    }

    /// Place a connection in every active ward session.
    #[instrument(skip_all, fields(identity_id = %ctx.identity.id))]
    pub async fn place(&self, ctx: &ConnectionContext) -> Result<Vec<WardPlacement>, ScError> {
        let active = self.ward_sessions.list_active().await?;
        let mut placements = Vec::with_capacity(active.len());

        for ward_session in active.iter().filter(|ws| ws.is_active()) {
            let role = ward_session.resolve(ctx.identity.id);
            for room in placement_rooms(ward_session.id, &role) {
                self.registry.join(ctx.connection_id, room).await?;
            }

            match &role {
                WardRole::Supervisor => {
                    self.send_joined(ctx, ward_session.id, true, None).await?;
                }
                WardRole::Zone(zone) => {
                    self.send_joined(ctx, ward_session.id, false, Some(zone.clone()))
                        .await?;
                }
                WardRole::Bystander => {}
            }

            debug!(
                target: "sc.ward",
                ward_session_id = %ward_session.id,
                connection_id = %ctx.connection_id,
                placement = ?role,
                "Ward placement resolved"
            );
            placements.push(WardPlacement {
                ward_session_id: ward_session.id,
                role,
            });
        }
        Ok(placements)
    }

    /// Drop every ward room the connection holds and resolve placement
    /// again against current assignments.
    pub async fn rejoin(&self, ctx: &ConnectionContext) -> Result<Vec<WardPlacement>, ScError> {
        let rooms = self
            .registry
            .rooms_of(ctx.connection_id)
            .await?
            .ok_or_else(|| ScError::ConnectionNotFound(ctx.connection_id.to_string()))?;

        for room in rooms
            .into_iter()
            .filter(|room| matches!(room, Room::Ward(_) | Room::WardSupervisor(_) | Room::Zone(..)))
        {
            self.registry.leave(ctx.connection_id, room).await?;
        }
        self.place(ctx).await
    }

    /// Route a tagged update. The sender must be placed in the ward session.
    #[instrument(skip_all, fields(ward_session_id = %ward_session_id))]
    pub async fn route_update(
        &self,
        ctx: &ConnectionContext,
        ward_session_id: WardSessionId,
        zone: Option<ZoneId>,
        payload: Value,
    ) -> Result<usize, ScError> {
        let placed = self
            .registry
            .rooms_of(ctx.connection_id)
            .await?
            .is_some_and(|rooms| rooms.iter().any(|room| room.is_ward_room_of(ward_session_id)));
        if !placed {
            return Err(ScError::PermissionDenied(
                "not placed in this ward session".to_string(),
            ));
        }

        let rooms = update_rooms(ward_session_id, zone.as_ref());
        self.registry
            .broadcast_many(
                rooms,
                ServerEvent::WardUpdate {
                    ward_session_id,
                    zone,
                    from: ctx.identity.id,
                    payload,
                },
                Some(ctx.connection_id),
            )
            .await
    }

    /// Manually end a ward session. Allowed for the starter, a listed
    /// supervisor or an admin. Returns false if it was already completed or
    /// does not exist.
    #[instrument(skip_all, fields(ward_session_id = %ward_session_id, identity_id = %ctx.identity.id))]
    pub async fn end(
        &self,
        ctx: &ConnectionContext,
        ward_session_id: WardSessionId,
    ) -> Result<bool, ScError> {
        let Some(ward_session) = self.ward_sessions.find(ward_session_id).await? else {
            info!(
                target: "sc.ward",
                ward_session_id = %ward_session_id,
                "End requested for unknown ward session, nothing to do"
            );
            return Ok(false);
        };

        let identity = &ctx.identity;
        let allowed = ward_session.resolve(identity.id) == WardRole::Supervisor
            || identity.role == RoleKind::Admin;
        if !allowed {
            return Err(ScError::PermissionDenied(
                "not allowed to end this ward session".to_string(),
            ));
        }

        let completed = self
            .ward_sessions
            .complete_if_active(ward_session_id, EndedBy::Identity(identity.id), Utc::now())
            .await?;
        match completed {
            Some(done) => {
                info!(
                    target: "sc.ward",
                    ward_session_id = %ward_session_id,
                    ended_by = %identity.id,
                    "Ward session ended by request"
                );
                self.announce_end(&done, EndedBy::Identity(identity.id))
                    .await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Complete every active ward session past its end plus grace.
    ///
    /// Per-session failures are logged and retried on the next tick.
    pub async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<usize, ScError> {
        let active = self.ward_sessions.list_active().await?;
        let mut expired = 0;

        for ward_session in active
            .iter()
            .filter(|ws| ws.is_overdue(now, self.grace))
        {
            match self
                .ward_sessions
                .complete_if_active(ward_session.id, EndedBy::Auto, now)
                .await
            {
                Ok(Some(done)) => {
                    info!(
                        target: "sc.task.ward_expiry",
                        ward_session_id = %done.id,
                        "Ward session auto-completed"
                    );
                    metrics::record_session_expired("ward");
                    expired += 1;
                    if let Err(e) = self.announce_end(&done, EndedBy::Auto).await {
                        warn!(
                            target: "sc.task.ward_expiry",
                            ward_session_id = %done.id,
                            error = %e,
                            "Failed to announce ward session end"
                        );
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    error!(
                        target: "sc.task.ward_expiry",
                        ward_session_id = %ward_session.id,
                        error = %e,
                        "Failed to complete ward session, will retry next tick"
                    );
                }
            }
        }
        Ok(expired)
    }

    async fn send_joined(
        &self,
        ctx: &ConnectionContext,
        ward_session_id: WardSessionId,
        supervisor: bool,
        zone: Option<ZoneId>,
    ) -> Result<(), ScError> {
        self.registry
            .send_to(
                ctx.connection_id,
                ServerEvent::WardJoined {
                    ward_session_id,
                    supervisor,
                    zone,
                },
            )
            .await
    }

    async fn announce_end(&self, ward_session: &WardSession, ended_by: EndedBy) -> Result<(), ScError> {
        let base = Room::Ward(ward_session.id);
        self.registry
            .broadcast(
                base.clone(),
                ServerEvent::WardSessionEnded {
                    ward_session_id: ward_session.id,
                    ended_by,
                },
                None,
            )
            .await?;

        for member in self.registry.members(base).await? {
            for room in member
                .rooms
                .into_iter()
                .filter(|room| room.is_ward_room_of(ward_session.id))
            {
                self.registry.leave(member.connection_id, room).await?;
            }
        }
        Ok(())
    }
}
