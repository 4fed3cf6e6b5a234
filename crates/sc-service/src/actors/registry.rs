//! `RoomRegistryActor` - owns every live connection and room membership in
//! one namespace.
//!
//! The registry is an injectable service rather than a process-wide
//! singleton: each namespace (clinical sessions, ward) gets its own
//! instance, created with [`RoomRegistryHandle::new`] and torn down with
//! [`RoomRegistryHandle::shutdown`].
//!
//! All membership changes and deliveries are serialized through the actor's
//! mailbox, so a broadcast always sees a consistent membership snapshot and
//! events to one connection keep the order in which they were requested.
//! Delivery to connection actors is non-blocking; a full connection mailbox
//! drops the event for that connection only.
//!
//! Rooms are process-local. Running more than one coordinator instance
//! requires a shared backplane, which this registry does not provide.

use crate::errors::{JoinRejection, ScError};
use crate::models::Identity;
use crate::protocol::ServerEvent;

use super::connection::{ConnectionActor, ConnectionActorHandle, Delivery};
use super::messages::{
    ConnectionSnapshot, JoinOutcome, RegistryMessage, RegistryStatus, Room, RoomKind,
};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use chrono::{DateTime, Utc};
use common::types::ConnectionId;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the registry mailbox.
const REGISTRY_CHANNEL_BUFFER: usize = 1000;

/// Handle to a `RoomRegistryActor`.
///
/// Cheap to clone; every clone talks to the same actor.
#[derive(Clone, Debug)]
pub struct RoomRegistryHandle {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
    metrics: Arc<ActorMetrics>,
    namespace: Arc<str>,
}

impl RoomRegistryHandle {
    /// Spawn a registry actor for `namespace` and return a handle to it.
    #[must_use]
    pub fn new(namespace: &str, metrics: Arc<ActorMetrics>) -> Self {
        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = RoomRegistryActor {
            namespace: namespace.to_string(),
            receiver,
            cancel_token: cancel_token.clone(),
            connections: HashMap::new(),
            rooms: HashMap::new(),
            shutting_down: false,
            metrics: Arc::clone(&metrics),
            mailbox: MailboxMonitor::new(ActorType::Registry, namespace),
        };

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
            metrics,
            namespace: Arc::from(namespace),
        }
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<ActorMetrics> {
        &self.metrics
    }

    /// Spawn a connection actor tied to this registry's lifetime.
    pub fn spawn_connection(
        &self,
        connection_id: ConnectionId,
        outbound: mpsc::Sender<ServerEvent>,
    ) -> (ConnectionActorHandle, JoinHandle<()>) {
        ConnectionActor::spawn(
            connection_id,
            outbound,
            self.child_token(),
            Arc::clone(&self.metrics),
        )
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RegistryMessage,
    ) -> Result<T, ScError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| ScError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| ScError::Internal(format!("response receive failed: {e}")))
    }

    /// Add a live connection.
    pub async fn register(
        &self,
        handle: ConnectionActorHandle,
        identity: Identity,
    ) -> Result<(), ScError> {
        self.request(|respond_to| RegistryMessage::Register {
            handle,
            identity,
            respond_to,
        })
        .await?
    }

    /// Remove a connection from every room and return what it held.
    pub async fn unregister(
        &self,
        connection_id: ConnectionId,
    ) -> Result<Option<ConnectionSnapshot>, ScError> {
        self.request(|respond_to| RegistryMessage::Unregister {
            connection_id,
            respond_to,
        })
        .await
    }

    /// Add a connection to a room (idempotent).
    pub async fn join(
        &self,
        connection_id: ConnectionId,
        room: Room,
    ) -> Result<JoinOutcome, ScError> {
        self.request(|respond_to| RegistryMessage::Join {
            connection_id,
            room,
            respond_to,
        })
        .await?
    }

    /// Remove a connection from a room (idempotent).
    pub async fn leave(&self, connection_id: ConnectionId, room: Room) -> Result<bool, ScError> {
        self.request(|respond_to| RegistryMessage::Leave {
            connection_id,
            room,
            respond_to,
        })
        .await
    }

    /// Remove a connection from every room of `kind`; returns the rooms left.
    pub async fn leave_kind(
        &self,
        connection_id: ConnectionId,
        kind: RoomKind,
    ) -> Result<Vec<Room>, ScError> {
        self.request(|respond_to| RegistryMessage::LeaveKind {
            connection_id,
            kind,
            respond_to,
        })
        .await
    }

    pub async fn rooms_of(
        &self,
        connection_id: ConnectionId,
    ) -> Result<Option<BTreeSet<Room>>, ScError> {
        self.request(|respond_to| RegistryMessage::RoomsOf {
            connection_id,
            respond_to,
        })
        .await
    }

    pub async fn members(&self, room: Room) -> Result<Vec<ConnectionSnapshot>, ScError> {
        self.request(|respond_to| RegistryMessage::Members { room, respond_to })
            .await
    }

    pub async fn snapshot(&self) -> Result<Vec<ConnectionSnapshot>, ScError> {
        self.request(|respond_to| RegistryMessage::Snapshot { respond_to })
            .await
    }

    /// Deliver an event to one connection.
    pub async fn send_to(
        &self,
        connection_id: ConnectionId,
        event: ServerEvent,
    ) -> Result<(), ScError> {
        self.sender
            .send(RegistryMessage::SendTo {
                connection_id,
                event,
            })
            .await
            .map_err(|e| ScError::Internal(format!("channel send failed: {e}")))
    }

    /// Deliver an event to every member of `room` except `except`.
    pub async fn broadcast(
        &self,
        room: Room,
        event: ServerEvent,
        except: Option<ConnectionId>,
    ) -> Result<usize, ScError> {
        self.request(|respond_to| RegistryMessage::Broadcast {
            room,
            event,
            except,
            respond_to,
        })
        .await
    }

    /// Deliver an event once to every connection in the union of `rooms`.
    pub async fn broadcast_many(
        &self,
        rooms: Vec<Room>,
        event: ServerEvent,
        except: Option<ConnectionId>,
    ) -> Result<usize, ScError> {
        self.request(|respond_to| RegistryMessage::BroadcastMany {
            rooms,
            event,
            except,
            respond_to,
        })
        .await
    }

    /// Close a connection and drop it from every room.
    pub async fn terminate(
        &self,
        connection_id: ConnectionId,
        reason: &str,
    ) -> Result<Option<ConnectionSnapshot>, ScError> {
        let reason = reason.to_string();
        self.request(|respond_to| RegistryMessage::Terminate {
            connection_id,
            reason,
            respond_to,
        })
        .await
    }

    pub async fn status(&self) -> Result<RegistryStatus, ScError> {
        self.request(|respond_to| RegistryMessage::GetStatus { respond_to })
            .await
    }

    /// Close every connection and stop the registry.
    pub async fn shutdown(&self) -> Result<(), ScError> {
        self.request(|respond_to| RegistryMessage::Shutdown { respond_to })
            .await?
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Get a child token for dependants (connection actors, servers).
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

struct ConnectionEntry {
    handle: ConnectionActorHandle,
    identity: Identity,
    rooms: BTreeSet<Room>,
    connected_at: DateTime<Utc>,
}

impl ConnectionEntry {
    fn snapshot(&self, connection_id: ConnectionId) -> ConnectionSnapshot {
        ConnectionSnapshot {
            connection_id,
            identity: self.identity.clone(),
            rooms: self.rooms.clone(),
            connected_at: self.connected_at,
        }
    }
}

/// The `RoomRegistryActor` implementation.
struct RoomRegistryActor {
    namespace: String,
    receiver: mpsc::Receiver<RegistryMessage>,
    cancel_token: CancellationToken,
    connections: HashMap<ConnectionId, ConnectionEntry>,
    rooms: HashMap<Room, BTreeSet<ConnectionId>>,
    shutting_down: bool,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl RoomRegistryActor {
    #[instrument(skip_all, name = "sc.registry", fields(namespace = %self.namespace))]
    async fn run(mut self) {
        info!(
            target: "sc.registry",
            namespace = %self.namespace,
            "RoomRegistryActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "sc.registry",
                        namespace = %self.namespace,
                        "RoomRegistryActor received cancellation signal"
                    );
                    self.close_all("cancelled");
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            let should_exit = self.handle_message(message);
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();

                            if should_exit {
                                break;
                            }
                        }
                        None => {
                            info!(
                                target: "sc.registry",
                                namespace = %self.namespace,
                                "RoomRegistryActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "sc.registry",
            namespace = %self.namespace,
            messages_processed = self.mailbox.messages_processed(),
            "RoomRegistryActor stopped"
        );
    }

    /// Handle a single message. Returns true if the actor should exit.
    fn handle_message(&mut self, message: RegistryMessage) -> bool {
        match message {
            RegistryMessage::Register {
                handle,
                identity,
                respond_to,
            } => {
                let _ = respond_to.send(self.register(handle, identity));
            }

            RegistryMessage::Unregister {
                connection_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.remove(connection_id));
            }

            RegistryMessage::Join {
                connection_id,
                room,
                respond_to,
            } => {
                let _ = respond_to.send(self.join(connection_id, room));
            }

            RegistryMessage::Leave {
                connection_id,
                room,
                respond_to,
            } => {
                let _ = respond_to.send(self.leave(connection_id, &room));
            }

            RegistryMessage::LeaveKind {
                connection_id,
                kind,
                respond_to,
            } => {
                let _ = respond_to.send(self.leave_kind(connection_id, kind));
            }

            RegistryMessage::RoomsOf {
                connection_id,
                respond_to,
            } => {
                let rooms = self
                    .connections
                    .get(&connection_id)
                    .map(|entry| entry.rooms.clone());
                let _ = respond_to.send(rooms);
            }

            RegistryMessage::Members { room, respond_to } => {
                let _ = respond_to.send(self.members(&room));
            }

            RegistryMessage::Snapshot { respond_to } => {
                let snapshot = self
                    .connections
                    .iter()
                    .map(|(id, entry)| entry.snapshot(*id))
                    .collect();
                let _ = respond_to.send(snapshot);
            }

            RegistryMessage::SendTo {
                connection_id,
                event,
            } => {
                if !self.deliver(connection_id, event) {
                    debug!(
                        target: "sc.registry",
                        namespace = %self.namespace,
                        connection_id = %connection_id,
                        "SendTo target not delivered"
                    );
                }
            }

            RegistryMessage::Broadcast {
                room,
                event,
                except,
                respond_to,
            } => {
                let targets = self.rooms.get(&room).cloned().unwrap_or_default();
                let _ = respond_to.send(self.deliver_all(targets, &event, except));
            }

            RegistryMessage::BroadcastMany {
                rooms,
                event,
                except,
                respond_to,
            } => {
                let targets: BTreeSet<ConnectionId> = rooms
                    .iter()
                    .filter_map(|room| self.rooms.get(room))
                    .flatten()
                    .copied()
                    .collect();
                let _ = respond_to.send(self.deliver_all(targets, &event, except));
            }

            RegistryMessage::Terminate {
                connection_id,
                reason,
                respond_to,
            } => {
                let handle = self
                    .connections
                    .get(&connection_id)
                    .map(|entry| entry.handle.clone());
                let removed = self.remove(connection_id);
                if let Some(handle) = handle {
                    handle.request_close(reason);
                }
                let _ = respond_to.send(removed);
            }

            RegistryMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(RegistryStatus {
                    connection_count: self.connections.len(),
                    room_count: self.rooms.len(),
                    mailbox_depth: self.mailbox.current_depth(),
                    is_shutting_down: self.shutting_down,
                });
            }

            RegistryMessage::Shutdown { respond_to } => {
                info!(
                    target: "sc.registry",
                    namespace = %self.namespace,
                    connection_count = self.connections.len(),
                    "Initiating registry shutdown"
                );
                self.close_all("shutdown");
                let _ = respond_to.send(Ok(()));
                return true;
            }
        }
        false
    }

    fn register(&mut self, handle: ConnectionActorHandle, identity: Identity) -> Result<(), ScError> {
        if self.shutting_down {
            return Err(ScError::Internal("registry is shutting down".to_string()));
        }

        let connection_id = handle.connection_id();
        debug!(
            target: "sc.registry",
            namespace = %self.namespace,
            connection_id = %connection_id,
            identity = %identity.id,
            "Connection registered"
        );
        let previous = self.connections.insert(
            connection_id,
            ConnectionEntry {
                handle,
                identity,
                rooms: BTreeSet::new(),
                connected_at: Utc::now(),
            },
        );
        if previous.is_none() {
            self.metrics.connection_created();
        }
        Ok(())
    }

    fn remove(&mut self, connection_id: ConnectionId) -> Option<ConnectionSnapshot> {
        let entry = self.connections.remove(&connection_id)?;
        for room in &entry.rooms {
            self.drop_member(room, connection_id);
        }
        self.metrics.connection_closed();

        debug!(
            target: "sc.registry",
            namespace = %self.namespace,
            connection_id = %connection_id,
            rooms = entry.rooms.len(),
            "Connection removed"
        );
        Some(entry.snapshot(connection_id))
    }

    fn join(&mut self, connection_id: ConnectionId, room: Room) -> Result<JoinOutcome, ScError> {
        let entry = self
            .connections
            .get_mut(&connection_id)
            .ok_or_else(|| ScError::ConnectionNotFound(connection_id.to_string()))?;

        if entry.rooms.contains(&room) {
            return Ok(JoinOutcome::AlreadyMember);
        }

        if let Room::Session(target) = &room {
            let occupied = entry.rooms.iter().any(|held| {
                matches!(held, Room::Session(current) if current != target)
            });
            if occupied {
                return Err(ScError::Rejected(JoinRejection::AlreadyInSession));
            }
        }

        entry.rooms.insert(room.clone());
        self.rooms.entry(room).or_default().insert(connection_id);
        Ok(JoinOutcome::Joined)
    }

    fn leave(&mut self, connection_id: ConnectionId, room: &Room) -> bool {
        let removed = self
            .connections
            .get_mut(&connection_id)
            .is_some_and(|entry| entry.rooms.remove(room));
        if removed {
            self.drop_member(room, connection_id);
        }
        removed
    }

    fn leave_kind(&mut self, connection_id: ConnectionId, kind: RoomKind) -> Vec<Room> {
        let Some(entry) = self.connections.get_mut(&connection_id) else {
            return Vec::new();
        };

        let left: Vec<Room> = entry
            .rooms
            .iter()
            .filter(|room| room.kind() == kind)
            .cloned()
            .collect();
        for room in &left {
            entry.rooms.remove(room);
        }
        for room in &left {
            self.drop_member(room, connection_id);
        }
        left
    }

    fn members(&self, room: &Room) -> Vec<ConnectionSnapshot> {
        self.rooms
            .get(room)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.connections.get(id).map(|entry| entry.snapshot(*id)))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn drop_member(&mut self, room: &Room, connection_id: ConnectionId) {
        if let Some(members) = self.rooms.get_mut(room) {
            members.remove(&connection_id);
            if members.is_empty() {
                self.rooms.remove(room);
            }
        }
    }

    /// Returns true if the event was queued for the connection.
    fn deliver(&self, connection_id: ConnectionId, event: ServerEvent) -> bool {
        let Some(entry) = self.connections.get(&connection_id) else {
            return false;
        };

        match entry.handle.try_deliver(event) {
            Delivery::Queued => true,
            Delivery::Dropped => {
                self.mailbox.record_drop();
                self.metrics.record_event_dropped();
                false
            }
            Delivery::Closed => false,
        }
    }

    fn deliver_all(
        &self,
        targets: BTreeSet<ConnectionId>,
        event: &ServerEvent,
        except: Option<ConnectionId>,
    ) -> usize {
        targets
            .into_iter()
            .filter(|id| Some(*id) != except)
            .filter(|id| self.deliver(*id, event.clone()))
            .count()
    }

    fn close_all(&mut self, reason: &str) {
        self.shutting_down = true;
        for (_, entry) in self.connections.drain() {
            entry.handle.request_close(reason);
            self.metrics.connection_closed();
        }
        self.rooms.clear();
    }
}
