//! Presence Registry.
//!
//! Participant lists are computed from the registry's live connection state,
//! never stored. For `(session, organisation)` every live identity of the
//! organisation appears once:
//!
//! - `inRoom` is true if any of its connections occupies the session room
//! - identities occupying only a different session room are omitted

use super::gatekeeper::ConnectionContext;
use crate::actors::{ConnectionSnapshot, Room, RoomRegistryHandle};
use crate::errors::ScError;
use crate::protocol::{ParticipantEntry, ServerEvent};
use common::types::{IdentityId, OrganisationId, SessionId};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// Build the participant list for `session_id` scoped to `organisation_id`.
#[must_use]
pub fn participant_list(
    snapshot: &[ConnectionSnapshot],
    session_id: SessionId,
    organisation_id: OrganisationId,
) -> Vec<ParticipantEntry> {
    struct Presence<'a> {
        conn: &'a ConnectionSnapshot,
        in_room: bool,
        elsewhere: bool,
    }

    let mut by_identity: BTreeMap<IdentityId, Presence<'_>> = BTreeMap::new();
    for conn in snapshot
        .iter()
        .filter(|conn| conn.identity.organisation_id == organisation_id)
    {
        let room = conn.session_room();
        let entry = by_identity.entry(conn.identity.id).or_insert(Presence {
            conn,
            in_room: false,
            elsewhere: false,
        });
        match room {
            Some(id) if id == session_id => entry.in_room = true,
            Some(_) => entry.elsewhere = true,
            None => {}
        }
    }

    let mut list: Vec<ParticipantEntry> = by_identity
        .into_values()
        .filter(|presence| presence.in_room || !presence.elsewhere)
        .map(|presence| ParticipantEntry {
            identity: presence.conn.identity.id,
            display_name: presence.conn.identity.display_name.clone(),
            role: presence.conn.identity.role,
            in_room: presence.in_room,
        })
        .collect();

    list.sort_by(|a, b| {
        a.display_name
            .cmp(&b.display_name)
            .then_with(|| a.identity.cmp(&b.identity))
    });
    list
}

/// Presence queries and membership broadcasts for clinical sessions.
#[derive(Clone)]
pub struct PresenceRegistry {
    registry: RoomRegistryHandle,
}

impl PresenceRegistry {
    #[must_use]
    pub fn new(registry: RoomRegistryHandle) -> Self {
        Self { registry }
    }

    #[instrument(skip_all, fields(session_id = %session_id, organisation_id = %organisation_id))]
    pub async fn participants(
        &self,
        session_id: SessionId,
        organisation_id: OrganisationId,
    ) -> Result<Vec<ParticipantEntry>, ScError> {
        let snapshot = self.registry.snapshot().await?;
        Ok(participant_list(&snapshot, session_id, organisation_id))
    }

    /// Send a fresh `participantListUpdated` to the session room.
    pub async fn broadcast_list(
        &self,
        session_id: SessionId,
        organisation_id: OrganisationId,
    ) -> Result<usize, ScError> {
        let participants = self.participants(session_id, organisation_id).await?;
        self.registry
            .broadcast(
                Room::Session(session_id),
                ServerEvent::ParticipantListUpdated {
                    session_id,
                    participants,
                },
                None,
            )
            .await
    }

    /// Voluntary exit from a session room. Returns false if the connection
    /// was not in it.
    #[instrument(skip_all, fields(session_id = %session_id, identity_id = %ctx.identity.id))]
    pub async fn leave(&self, ctx: &ConnectionContext, session_id: SessionId) -> Result<bool, ScError> {
        let left = self
            .registry
            .leave(ctx.connection_id, Room::Session(session_id))
            .await?;
        self.registry
            .leave(ctx.connection_id, Room::Supervisor(session_id))
            .await?;

        if left {
            self.announce_departure(ctx.identity.id, ctx.identity.organisation_id, session_id)
                .await?;
        }
        Ok(left)
    }

    /// Reconcile a closed connection: the session room it occupied hears
    /// `participantLeft` (unless the identity is still present on another
    /// connection) and a refreshed list.
    pub async fn reconcile_departure(&self, snapshot: &ConnectionSnapshot) -> Result<(), ScError> {
        let Some(session_id) = snapshot.session_room() else {
            return Ok(());
        };

        debug!(
            target: "sc.presence",
            session_id = %session_id,
            connection_id = %snapshot.connection_id,
            "Reconciling departed connection"
        );
        self.announce_departure(
            snapshot.identity.id,
            snapshot.identity.organisation_id,
            session_id,
        )
        .await
    }

    async fn announce_departure(
        &self,
        identity: IdentityId,
        organisation_id: OrganisationId,
        session_id: SessionId,
    ) -> Result<(), ScError> {
        let still_present = self
            .registry
            .members(Room::Session(session_id))
            .await?
            .iter()
            .any(|member| member.identity.id == identity);

        if !still_present {
            self.registry
                .broadcast(
                    Room::Session(session_id),
                    ServerEvent::ParticipantLeft {
                        session_id,
                        identity,
                    },
                    None,
                )
                .await?;
        }
        self.broadcast_list(session_id, organisation_id).await?;
        Ok(())
    }
}
