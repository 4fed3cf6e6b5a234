//! Coordinator harness for integration tests.
//!
//! `TestCoordinator` builds the real [`AppState`] over an [`InMemoryStore`].
//! `TestClient` stands in for a WebSocket: it authenticates through the
//! namespace's gatekeeper, then drives `open`, `dispatch` and `close` from
//! the WebSocket handler, reading the outbound queue the socket writer would
//! drain.

use crate::in_memory_store::InMemoryStore;
use common::types::{ConnectionId, IdentityId, SessionId};
use sc_service::actors::{ActorMetrics, Room, RoomRegistryHandle};
use sc_service::errors::ScError;
use sc_service::handlers::ws::{self, Namespace, OUTBOUND_BUFFER};
use sc_service::models::Identity;
use sc_service::protocol::{ClientCommand, ServerEvent};
use sc_service::routes::{AppState, CoordinatorSettings, Stores};
use sc_service::services::ConnectionContext;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// How long `next_event` waits before failing the test.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

/// How long `assert_silent` listens.
pub const SILENCE_WINDOW: Duration = Duration::from_millis(100);

pub struct TestCoordinator {
    state: Arc<AppState>,
    store: InMemoryStore,
}

impl TestCoordinator {
    #[must_use]
    pub fn new(store: InMemoryStore) -> Self {
        Self::with_settings(store, CoordinatorSettings::default())
    }

    #[must_use]
    pub fn with_settings(store: InMemoryStore, settings: CoordinatorSettings) -> Self {
        let stores = Stores {
            identities: Arc::new(store.clone()),
            sessions: Arc::new(store.clone()),
            ward_sessions: Arc::new(store.clone()),
        };
        let state = Arc::new(AppState::new(stores, settings, ActorMetrics::new()));
        Self { state, store }
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    pub fn store(&self) -> &InMemoryStore {
        &self.store
    }

    /// Connect to `ns` with an identity token. Consumes the `connected`
    /// frame.
    pub async fn connect(&self, ns: Namespace, token: &str) -> Result<TestClient, ScError> {
        let gatekeeper = match ns {
            Namespace::Sessions => &self.state.session_gatekeeper,
            Namespace::Ward => &self.state.ward_gatekeeper,
        };
        let identity = gatekeeper.authenticate(token).await?;

        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        let ctx = ws::open(&self.state, ns, identity, tx).await?;

        let mut client = TestClient {
            state: Arc::clone(&self.state),
            ns,
            ctx,
            rx,
        };
        match client.next_event().await {
            ServerEvent::Connected { connection_id, .. } => {
                assert_eq!(connection_id, client.connection_id());
            }
            other => panic!("expected connected, got {other:?}"),
        }
        Ok(client)
    }

    pub async fn connect_sessions(&self, token: &str) -> Result<TestClient, ScError> {
        self.connect(Namespace::Sessions, token).await
    }

    pub async fn connect_ward(&self, token: &str) -> Result<TestClient, ScError> {
        self.connect(Namespace::Ward, token).await
    }

    pub fn session_registry(&self) -> &RoomRegistryHandle {
        self.state.session_registry()
    }

    pub fn ward_registry(&self) -> &RoomRegistryHandle {
        self.state.ward_registry()
    }

    /// Connections currently in a clinical session room.
    pub async fn session_members(&self, session_id: SessionId) -> Vec<IdentityId> {
        self.session_registry()
            .members(Room::Session(session_id))
            .await
            .unwrap()
            .into_iter()
            .map(|member| member.identity.id)
            .collect()
    }
}

impl Drop for TestCoordinator {
    fn drop(&mut self) {
        self.state.session_registry().cancel();
        self.state.ward_registry().cancel();
    }
}

/// One fake socket.
pub struct TestClient {
    state: Arc<AppState>,
    ns: Namespace,
    ctx: ConnectionContext,
    rx: mpsc::Receiver<ServerEvent>,
}

impl TestClient {
    pub fn context(&self) -> &ConnectionContext {
        &self.ctx
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.ctx.connection_id
    }

    pub fn identity(&self) -> &Identity {
        &self.ctx.identity
    }

    fn registry(&self) -> &RoomRegistryHandle {
        match self.ns {
            Namespace::Sessions => self.state.session_registry(),
            Namespace::Ward => self.state.ward_registry(),
        }
    }

    /// Send a command as a JSON text frame.
    pub async fn send(&self, cmd: &ClientCommand) {
        let text = serde_json::to_string(cmd).unwrap();
        self.send_raw(&text).await;
    }

    pub async fn send_raw(&self, text: &str) {
        ws::dispatch(&self.state, self.ns, &self.ctx, text).await;
    }

    pub async fn join(&self, session_id: SessionId) {
        self.send(&ClientCommand::Join {
            session_id,
            session: None,
        })
        .await;
    }

    /// Next outbound event. Panics on timeout or if the connection closed.
    pub async fn next_event(&mut self) -> ServerEvent {
        tokio::time::timeout(EVENT_TIMEOUT, self.rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("connection closed")
    }

    /// Skip events until one matches `pred`.
    pub async fn next_matching(&mut self, pred: impl Fn(&ServerEvent) -> bool) -> ServerEvent {
        loop {
            let event = self.next_event().await;
            if pred(&event) {
                return event;
            }
        }
    }

    /// Next event if one arrives within `wait`.
    pub async fn try_next_event(&mut self, wait: Duration) -> Option<ServerEvent> {
        tokio::time::timeout(wait, self.rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Panics if any event arrives within [`SILENCE_WINDOW`].
    pub async fn assert_silent(&mut self) {
        // Round-trip the registry so everything already queued is delivered.
        self.registry().status().await.unwrap();
        if let Some(event) = self.try_next_event(SILENCE_WINDOW).await {
            panic!("expected no event, got {event:?}");
        }
    }

    /// Drain events until the server closes the connection. Returns what
    /// arrived before the close.
    pub async fn until_closed(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        loop {
            match tokio::time::timeout(EVENT_TIMEOUT, self.rx.recv())
                .await
                .expect("timed out waiting for close")
            {
                Some(event) => events.push(event),
                None => return events,
            }
        }
    }

    /// Rooms this connection holds, or `None` once it is gone.
    pub async fn rooms(&self) -> Option<BTreeSet<Room>> {
        self.registry().rooms_of(self.ctx.connection_id).await.unwrap()
    }

    /// Client-side disconnect.
    pub async fn close(self) {
        ws::close(&self.state, self.ns, &self.ctx).await;
    }
}
