//! `ConnectionActor` - one per live socket.
//!
//! Each `ConnectionActor`:
//! - Owns the mailbox of outbound events for exactly one connection
//! - Forwards events, in order, to the transport's outbound queue
//! - Stops on `Close`, on cancellation, or when the transport goes away
//!
//! Dropping the outbound sender on exit is what ends the socket writer, so
//! a `Close` queued after a `Deliver` still flushes that event first.

use crate::protocol::ServerEvent;

use super::messages::ConnectionMessage;
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use common::types::ConnectionId;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Default channel buffer size for the connection mailbox.
pub const CONNECTION_CHANNEL_BUFFER: usize = 200;

/// Result of a non-blocking delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// Mailbox full; the event was dropped.
    Dropped,
    /// The actor has stopped.
    Closed,
}

/// Handle to a `ConnectionActor`.
#[derive(Clone, Debug)]
pub struct ConnectionActorHandle {
    sender: mpsc::Sender<ConnectionMessage>,
    cancel_token: CancellationToken,
    connection_id: ConnectionId,
}

impl ConnectionActorHandle {
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Queue an event without waiting. Used by the registry so that one slow
    /// socket never stalls a broadcast.
    pub fn try_deliver(&self, event: ServerEvent) -> Delivery {
        match self.sender.try_send(ConnectionMessage::Deliver { event }) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => Delivery::Dropped,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Ask the actor to stop once queued events are flushed. Falls back to
    /// cancellation if the mailbox is full.
    pub fn request_close(&self, reason: impl Into<String>) {
        let reason = reason.into();
        if let Err(TrySendError::Full(_)) = self.sender.try_send(ConnectionMessage::Close { reason })
        {
            self.cancel_token.cancel();
        }
    }

    /// Cancel the connection actor immediately.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// The `ConnectionActor` implementation.
pub struct ConnectionActor {
    connection_id: ConnectionId,
    receiver: mpsc::Receiver<ConnectionMessage>,
    outbound: mpsc::Sender<ServerEvent>,
    cancel_token: CancellationToken,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl ConnectionActor {
    /// Spawn a new connection actor forwarding to `outbound`.
    ///
    /// `cancel_token` should be a child of the registry's token so that
    /// registry shutdown reaches every socket.
    pub fn spawn(
        connection_id: ConnectionId,
        outbound: mpsc::Sender<ServerEvent>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (ConnectionActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(CONNECTION_CHANNEL_BUFFER);

        let actor = Self {
            connection_id,
            receiver,
            outbound,
            cancel_token: cancel_token.clone(),
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Connection, connection_id.to_string()),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = ConnectionActorHandle {
            sender,
            cancel_token,
            connection_id,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "sc.actor.connection", fields(connection_id = %self.connection_id))]
    async fn run(mut self) {
        debug!(
            target: "sc.actor.connection",
            connection_id = %self.connection_id,
            "ConnectionActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "sc.actor.connection",
                        connection_id = %self.connection_id,
                        "ConnectionActor received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            let should_exit = self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();

                            if should_exit {
                                break;
                            }
                        }
                        None => {
                            debug!(
                                target: "sc.actor.connection",
                                connection_id = %self.connection_id,
                                "ConnectionActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        debug!(
            target: "sc.actor.connection",
            connection_id = %self.connection_id,
            messages_processed = self.mailbox.messages_processed(),
            "ConnectionActor stopped"
        );
    }

    /// Handle a single message. Returns true if the actor should exit.
    async fn handle_message(&mut self, message: ConnectionMessage) -> bool {
        match message {
            ConnectionMessage::Deliver { event } => {
                let name = event.name();
                if self.outbound.send(event).await.is_err() {
                    warn!(
                        target: "sc.actor.connection",
                        connection_id = %self.connection_id,
                        event = name,
                        "Transport gone, stopping connection actor"
                    );
                    return true;
                }
                false
            }

            ConnectionMessage::Close { reason } => {
                debug!(
                    target: "sc.actor.connection",
                    connection_id = %self.connection_id,
                    reason = %reason,
                    "Closing connection"
                );
                true
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::types::IdentityId;
    use common::types::SessionId;
    use std::time::Duration;

    fn spawn_actor() -> (
        ConnectionActorHandle,
        JoinHandle<()>,
        mpsc::Receiver<ServerEvent>,
    ) {
        let (outbound_tx, outbound_rx) = mpsc::channel(16);
        let (handle, task) = ConnectionActor::spawn(
            ConnectionId::new(),
            outbound_tx,
            CancellationToken::new(),
            ActorMetrics::new(),
        );
        (handle, task, outbound_rx)
    }

    #[tokio::test]
    async fn test_deliver_forwards_in_order() {
        let (handle, _task, mut rx) = spawn_actor();
        let session_id = SessionId::new();

        assert_eq!(
            handle.try_deliver(ServerEvent::RemovalNotice { session_id }),
            Delivery::Queued
        );
        assert_eq!(
            handle.try_deliver(ServerEvent::ParticipantLeft {
                session_id,
                identity: IdentityId::new()
            }),
            Delivery::Queued
        );

        assert!(matches!(
            rx.recv().await,
            Some(ServerEvent::RemovalNotice { .. })
        ));
        assert!(matches!(
            rx.recv().await,
            Some(ServerEvent::ParticipantLeft { .. })
        ));

        handle.cancel();
    }

    #[tokio::test]
    async fn test_close_flushes_then_ends_outbound() {
        let (handle, task, mut rx) = spawn_actor();
        let session_id = SessionId::new();

        handle.try_deliver(ServerEvent::RemovalNotice { session_id });
        handle.request_close("removed");

        assert!(matches!(
            rx.recv().await,
            Some(ServerEvent::RemovalNotice { .. })
        ));
        // Outbound sender dropped once the actor exits.
        assert!(rx.recv().await.is_none());

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("actor should stop")
            .expect("actor should not panic");
        assert!(handle.is_closed());
        assert_eq!(
            handle.try_deliver(ServerEvent::RemovalNotice { session_id }),
            Delivery::Closed
        );
    }

    #[tokio::test]
    async fn test_stops_when_transport_dropped() {
        let (handle, task, rx) = spawn_actor();
        drop(rx);

        handle.try_deliver(ServerEvent::Subscribed {
            topic_id: "patient:7".to_string(),
        });

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("actor should stop")
            .expect("actor should not panic");
    }

    #[tokio::test]
    async fn test_cancellation_token() {
        let (handle, task, _rx) = spawn_actor();
        assert!(!handle.is_cancelled());

        handle.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("actor should stop")
            .expect("actor should not panic");
        assert!(handle.is_cancelled());
    }
}
