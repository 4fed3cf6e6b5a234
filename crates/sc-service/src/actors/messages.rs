//! Message types for actor communication.
//!
//! All inter-actor communication uses strongly-typed message passing via
//! `tokio::sync::mpsc`. Request-reply uses `tokio::sync::oneshot`.

use super::connection::ConnectionActorHandle;
use crate::errors::ScError;
use crate::models::{Identity, ZoneId};
use crate::protocol::ServerEvent;
use chrono::{DateTime, Utc};
use common::types::{ConnectionId, IdentityId, OrganisationId, SessionId, WardSessionId};
use std::collections::BTreeSet;
use std::fmt;
use tokio::sync::oneshot;

/// A broadcast scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Room {
    /// Every connection of one identity.
    Identity(IdentityId),
    /// Every connection of one organisation.
    Organisation(OrganisationId),
    /// Admitted participants of a clinical session.
    Session(SessionId),
    /// Creator and supervisory participants of a clinical session.
    Supervisor(SessionId),
    /// Every placed connection of a ward session.
    Ward(WardSessionId),
    /// Supervisors of a ward session.
    WardSupervisor(WardSessionId),
    /// Occupants of one zone in a ward session.
    Zone(WardSessionId, ZoneId),
    /// Subscribers of an entity update feed.
    Topic(String),
}

/// Discriminant of [`Room`], used to leave every room of one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomKind {
    Identity,
    Organisation,
    Session,
    Supervisor,
    Ward,
    WardSupervisor,
    Zone,
    Topic,
}

impl Room {
    #[must_use]
    pub const fn kind(&self) -> RoomKind {
        match self {
            Room::Identity(_) => RoomKind::Identity,
            Room::Organisation(_) => RoomKind::Organisation,
            Room::Session(_) => RoomKind::Session,
            Room::Supervisor(_) => RoomKind::Supervisor,
            Room::Ward(_) => RoomKind::Ward,
            Room::WardSupervisor(_) => RoomKind::WardSupervisor,
            Room::Zone(..) => RoomKind::Zone,
            Room::Topic(_) => RoomKind::Topic,
        }
    }

    /// Whether this room belongs to the given ward session.
    #[must_use]
    pub fn is_ward_room_of(&self, ward_session_id: WardSessionId) -> bool {
        match self {
            Room::Ward(id) | Room::WardSupervisor(id) | Room::Zone(id, _) => *id == ward_session_id,
            _ => false,
        }
    }
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::Identity(id) => write!(f, "identity:{id}"),
            Room::Organisation(id) => write!(f, "org:{id}"),
            Room::Session(id) => write!(f, "session:{id}"),
            Room::Supervisor(id) => write!(f, "session:{id}:supervisor"),
            Room::Ward(id) => write!(f, "ward:{id}"),
            Room::WardSupervisor(id) => write!(f, "ward:{id}:supervisor"),
            Room::Zone(id, zone) => write!(f, "ward:{id}:zone:{zone}"),
            Room::Topic(topic) => write!(f, "topic:{topic}"),
        }
    }
}

/// Point-in-time view of one live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub connection_id: ConnectionId,
    pub identity: Identity,
    pub rooms: BTreeSet<Room>,
    pub connected_at: DateTime<Utc>,
}

impl ConnectionSnapshot {
    /// The session room this connection occupies, if any.
    #[must_use]
    pub fn session_room(&self) -> Option<SessionId> {
        self.rooms.iter().find_map(|room| match room {
            Room::Session(id) => Some(*id),
            _ => None,
        })
    }
}

/// Result of a join request against the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The connection was added to the room.
    Joined,
    /// The connection was already a member; nothing changed.
    AlreadyMember,
}

/// Registry status (for health checks and tests).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStatus {
    pub connection_count: usize,
    pub room_count: usize,
    pub mailbox_depth: usize,
    pub is_shutting_down: bool,
}

/// Messages sent to `RoomRegistryActor`.
#[derive(Debug)]
pub enum RegistryMessage {
    /// Add a live connection. Fails if the registry is shutting down.
    Register {
        handle: ConnectionActorHandle,
        identity: Identity,
        respond_to: oneshot::Sender<Result<(), ScError>>,
    },

    /// Remove a connection from every room. Returns what it held, or `None`
    /// if it was already gone.
    Unregister {
        connection_id: ConnectionId,
        respond_to: oneshot::Sender<Option<ConnectionSnapshot>>,
    },

    /// Add a connection to a room. A connection may hold at most one
    /// session room; joining a second fails with `AlreadyInSession`.
    Join {
        connection_id: ConnectionId,
        room: Room,
        respond_to: oneshot::Sender<Result<JoinOutcome, ScError>>,
    },

    /// Remove a connection from a room. Responds whether it was a member.
    Leave {
        connection_id: ConnectionId,
        room: Room,
        respond_to: oneshot::Sender<bool>,
    },

    /// Remove a connection from every room of one kind.
    LeaveKind {
        connection_id: ConnectionId,
        kind: RoomKind,
        respond_to: oneshot::Sender<Vec<Room>>,
    },

    /// Rooms held by a connection.
    RoomsOf {
        connection_id: ConnectionId,
        respond_to: oneshot::Sender<Option<BTreeSet<Room>>>,
    },

    /// Connections currently in a room.
    Members {
        room: Room,
        respond_to: oneshot::Sender<Vec<ConnectionSnapshot>>,
    },

    /// Every live connection.
    Snapshot {
        respond_to: oneshot::Sender<Vec<ConnectionSnapshot>>,
    },

    /// Deliver an event to a single connection (fire-and-forget).
    SendTo {
        connection_id: ConnectionId,
        event: ServerEvent,
    },

    /// Deliver an event to every member of a room. Responds with the number
    /// of connections it was handed to.
    Broadcast {
        room: Room,
        event: ServerEvent,
        except: Option<ConnectionId>,
        respond_to: oneshot::Sender<usize>,
    },

    /// Deliver an event once to every connection in the union of rooms.
    BroadcastMany {
        rooms: Vec<Room>,
        event: ServerEvent,
        except: Option<ConnectionId>,
        respond_to: oneshot::Sender<usize>,
    },

    /// Close a connection's actor and drop it from every room.
    Terminate {
        connection_id: ConnectionId,
        reason: String,
        respond_to: oneshot::Sender<Option<ConnectionSnapshot>>,
    },

    /// Current registry status.
    GetStatus {
        respond_to: oneshot::Sender<RegistryStatus>,
    },

    /// Close every connection and stop the registry.
    Shutdown {
        respond_to: oneshot::Sender<Result<(), ScError>>,
    },
}

/// Messages sent to `ConnectionActor`.
#[derive(Debug)]
pub enum ConnectionMessage {
    /// Forward an event to the socket writer.
    Deliver { event: ServerEvent },

    /// Stop after everything queued before this message has been forwarded.
    Close { reason: String },
}
