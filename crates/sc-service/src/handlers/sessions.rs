//! Command handling for the clinical session namespace.
//!
//! Replies addressed to the requester (acknowledgements, rejections, lists)
//! go through the registry like every other event, so they stay ordered
//! with broadcasts to the same connection.

use crate::actors::Room;
use crate::errors::ScError;
use crate::protocol::{ClientCommand, ServerEvent};
use crate::routes::AppState;
use crate::services::ConnectionContext;
use common::types::{OrganisationId, SessionId};
use serde_json::Value;
use tracing::{debug, instrument};

/// Maximum accepted length of a topic id.
const MAX_TOPIC_ID_LEN: usize = 256;

/// Handle one command from a clinical session connection.
///
/// # Errors
///
/// Errors are reported to the requester as an `error` event by the caller.
#[instrument(skip_all, fields(command = cmd.name(), connection_id = %ctx.connection_id))]
pub async fn handle_session_command(
    state: &AppState,
    ctx: &ConnectionContext,
    cmd: ClientCommand,
) -> Result<(), ScError> {
    match cmd {
        ClientCommand::Join {
            session_id,
            session,
        } => join(state, ctx, session_id, session).await,
        ClientCommand::Leave { session_id } => {
            state.presence.leave(ctx, session_id).await?;
            Ok(())
        }
        ClientCommand::RequestParticipants {
            session_id,
            organisation_id,
        } => request_participants(state, ctx, session_id, organisation_id).await,
        ClientCommand::Update {
            session_id,
            payload,
        } => relay_update(state, ctx, session_id, payload).await,
        ClientCommand::RemoveParticipant { session_id, target } => {
            state.eviction.remove(ctx, session_id, target).await?;
            Ok(())
        }
        ClientCommand::EndSession { session_id } => {
            let ended = state.lifecycle.end_session(ctx, session_id).await?;
            if !ended {
                debug!(
                    target: "sc.ws",
                    session_id = %session_id,
                    "endSession on an ended or unknown session ignored"
                );
            }
            Ok(())
        }
        ClientCommand::Subscribe { topic_id } => {
            let registry = state.session_registry();
            subscribe(registry, ctx, topic_id).await
        }
        other @ (ClientCommand::Rejoin
        | ClientCommand::WardUpdate { .. }
        | ClientCommand::EndWardSession { .. }) => Err(ScError::BadRequest(format!(
            "{} is only supported on the ward endpoint",
            other.name()
        ))),
    }
}

async fn join(
    state: &AppState,
    ctx: &ConnectionContext,
    session_id: SessionId,
    session: Option<Value>,
) -> Result<(), ScError> {
    let registry = state.session_registry();
    match state.admission.admit(ctx, session_id).await {
        Ok(_) => {
            registry
                .send_to(ctx.connection_id, ServerEvent::Joined { session_id, session })
                .await
        }
        Err(ScError::Rejected(rejection)) => {
            registry
                .send_to(
                    ctx.connection_id,
                    ServerEvent::join_rejected(session_id, rejection),
                )
                .await
        }
        Err(e) => Err(e),
    }
}

async fn request_participants(
    state: &AppState,
    ctx: &ConnectionContext,
    session_id: SessionId,
    organisation_id: OrganisationId,
) -> Result<(), ScError> {
    if organisation_id != ctx.identity.organisation_id && !ctx.identity.role.is_elevated() {
        return Err(ScError::PermissionDenied(
            "participants of another organisation are not visible".to_string(),
        ));
    }

    let participants = state
        .presence
        .participants(session_id, organisation_id)
        .await?;
    state
        .session_registry()
        .send_to(
            ctx.connection_id,
            ServerEvent::ParticipantListUpdated {
                session_id,
                participants,
            },
        )
        .await
}

async fn relay_update(
    state: &AppState,
    ctx: &ConnectionContext,
    session_id: SessionId,
    payload: Value,
) -> Result<(), ScError> {
    let registry = state.session_registry();
    let in_room = registry
        .rooms_of(ctx.connection_id)
        .await?
        .is_some_and(|rooms| rooms.contains(&Room::Session(session_id)));
    if !in_room {
        return Err(ScError::PermissionDenied(
            "join the session before sending updates".to_string(),
        ));
    }

    registry
        .broadcast(
            Room::Session(session_id),
            ServerEvent::UpdateBroadcast {
                session_id,
                from: ctx.identity.id,
                payload,
            },
            Some(ctx.connection_id),
        )
        .await?;
    Ok(())
}

/// Join a topic room and acknowledge. Shared by both namespaces.
pub(crate) async fn subscribe(
    registry: &crate::actors::RoomRegistryHandle,
    ctx: &ConnectionContext,
    topic_id: String,
) -> Result<(), ScError> {
    let topic_id = topic_id.trim().to_string();
    if topic_id.is_empty() || topic_id.len() > MAX_TOPIC_ID_LEN {
        return Err(ScError::BadRequest("invalid topic id".to_string()));
    }

    registry
        .join(ctx.connection_id, Room::Topic(topic_id.clone()))
        .await?;
    registry
        .send_to(ctx.connection_id, ServerEvent::Subscribed { topic_id })
        .await
}
