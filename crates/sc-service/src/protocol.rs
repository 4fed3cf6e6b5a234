//! Wire protocol for the coordinator's WebSocket endpoints.
//!
//! Every frame is a JSON text message tagged by `type` (camelCase), with
//! camelCase field names:
//!
//! ```json
//! {"type": "join", "sessionId": "6f1c...", "session": {"title": "Sepsis sim"}}
//! {"type": "joinRejected", "sessionId": "6f1c...", "reason": "capacityExceeded", "code": 7}
//! ```

use crate::errors::{JoinRejection, ScError};
use crate::models::{EndedBy, RoleKind, ZoneId};
use common::types::{ConnectionId, IdentityId, OrganisationId, SessionId, WardSessionId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Commands sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientCommand {
    /// Request admission to a session room. The acting identity is always
    /// the one bound to the connection.
    Join {
        session_id: SessionId,
        #[serde(default)]
        session: Option<Value>,
    },
    /// Voluntarily leave a session room.
    Leave { session_id: SessionId },
    /// Ask for the participant list of a session, scoped to an organisation.
    RequestParticipants {
        session_id: SessionId,
        organisation_id: OrganisationId,
    },
    /// Relay a payload to the other members of the session room.
    Update { session_id: SessionId, payload: Value },
    /// Remove a participant from a session.
    RemoveParticipant {
        session_id: SessionId,
        target: IdentityId,
    },
    /// End a session before its scheduled expiry.
    EndSession { session_id: SessionId },
    /// Subscribe to an entity update feed.
    Subscribe { topic_id: String },
    /// Re-run ward zone resolution for this connection.
    Rejoin,
    /// Tagged ward update.
    WardUpdate {
        ward_session_id: WardSessionId,
        #[serde(default)]
        zone: Option<ZoneId>,
        payload: Value,
    },
    /// End a ward session manually.
    EndWardSession { ward_session_id: WardSessionId },
}

impl ClientCommand {
    /// Bounded label for logs and metrics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            ClientCommand::Join { .. } => "join",
            ClientCommand::Leave { .. } => "leave",
            ClientCommand::RequestParticipants { .. } => "request_participants",
            ClientCommand::Update { .. } => "update",
            ClientCommand::RemoveParticipant { .. } => "remove_participant",
            ClientCommand::EndSession { .. } => "end_session",
            ClientCommand::Subscribe { .. } => "subscribe",
            ClientCommand::Rejoin => "rejoin",
            ClientCommand::WardUpdate { .. } => "ward_update",
            ClientCommand::EndWardSession { .. } => "end_ward_session",
        }
    }
}

/// One row of a participant list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantEntry {
    pub identity: IdentityId,
    pub display_name: String,
    pub role: RoleKind,
    /// True only if the identity currently occupies the requested session room.
    pub in_room: bool,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EndReason {
    /// Ended by the creator or an admin.
    Ended,
    /// Ended by the expiry scheduler.
    Expired,
}

impl EndReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            EndReason::Ended => "ended",
            EndReason::Expired => "expired",
        }
    }
}

/// Events sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// First frame after a successful connect.
    Connected {
        connection_id: ConnectionId,
        identity: IdentityId,
        organisation_id: OrganisationId,
    },
    Joined {
        session_id: SessionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session: Option<Value>,
    },
    JoinRejected {
        session_id: SessionId,
        reason: JoinRejection,
        code: i32,
    },
    ParticipantJoined {
        session_id: SessionId,
        identity: IdentityId,
        display_name: String,
        role: RoleKind,
    },
    ParticipantLeft {
        session_id: SessionId,
        identity: IdentityId,
    },
    ParticipantListUpdated {
        session_id: SessionId,
        participants: Vec<ParticipantEntry>,
    },
    ParticipantRemoved {
        session_id: SessionId,
        identity: IdentityId,
    },
    UpdateBroadcast {
        session_id: SessionId,
        from: IdentityId,
        payload: Value,
    },
    SessionEnded {
        session_id: SessionId,
        reason: EndReason,
    },
    /// Sent to a removed participant just before its connection closes.
    RemovalNotice { session_id: SessionId },
    Subscribed { topic_id: String },
    TopicUpdate { topic_id: String, payload: Value },
    /// Placement within an active ward session.
    WardJoined {
        ward_session_id: WardSessionId,
        supervisor: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        zone: Option<ZoneId>,
    },
    WardUpdate {
        ward_session_id: WardSessionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        zone: Option<ZoneId>,
        from: IdentityId,
        payload: Value,
    },
    WardSessionEnded {
        ward_session_id: WardSessionId,
        ended_by: EndedBy,
    },
    Error { code: i32, message: String },
}

impl ServerEvent {
    /// Rejection addressed only to the requester.
    #[must_use]
    pub fn join_rejected(session_id: SessionId, rejection: JoinRejection) -> Self {
        ServerEvent::JoinRejected {
            session_id,
            reason: rejection,
            code: rejection.code(),
        }
    }

    /// Client-safe error frame.
    #[must_use]
    pub fn error(err: &ScError) -> Self {
        ServerEvent::Error {
            code: err.error_code(),
            message: err.client_message(),
        }
    }

    /// Bounded label for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            ServerEvent::Connected { .. } => "connected",
            ServerEvent::Joined { .. } => "joined",
            ServerEvent::JoinRejected { .. } => "join_rejected",
            ServerEvent::ParticipantJoined { .. } => "participant_joined",
            ServerEvent::ParticipantLeft { .. } => "participant_left",
            ServerEvent::ParticipantListUpdated { .. } => "participant_list_updated",
            ServerEvent::ParticipantRemoved { .. } => "participant_removed",
            ServerEvent::UpdateBroadcast { .. } => "update_broadcast",
            ServerEvent::SessionEnded { .. } => "session_ended",
            ServerEvent::RemovalNotice { .. } => "removal_notice",
            ServerEvent::Subscribed { .. } => "subscribed",
            ServerEvent::TopicUpdate { .. } => "topic_update",
            ServerEvent::WardJoined { .. } => "ward_joined",
            ServerEvent::WardUpdate { .. } => "ward_update",
            ServerEvent::WardSessionEnded { .. } => "ward_session_ended",
            ServerEvent::Error { .. } => "error",
        }
    }
}
