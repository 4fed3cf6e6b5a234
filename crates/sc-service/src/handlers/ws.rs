//! WebSocket transport for both namespaces.
//!
//! Connect with `GET /ws/sessions?identity=<login>` or
//! `GET /ws/ward?identity=<username>`. The identity is resolved before the
//! upgrade, so an unknown identity gets a plain 401 and no socket.
//!
//! Per socket:
//! - a writer task drains the connection's outbound queue as JSON text
//!   frames and pings on an interval
//! - the reader dispatches commands one at a time, in arrival order
//!
//! Whichever side finishes first ends the connection, after which it is
//! unregistered and presence is reconciled.

use super::sessions::handle_session_command;
use super::ward::handle_ward_command;
use crate::errors::ScError;
use crate::models::Identity;
use crate::protocol::{ClientCommand, ServerEvent};
use crate::routes::AppState;
use crate::services::{ConnectionContext, Gatekeeper};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Outbound events buffered between the connection actor and the socket.
pub const OUTBOUND_BUFFER: usize = 256;

/// Interval between keepalive pings.
pub const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Query string of a connect request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectQuery {
    pub identity: Option<String>,
}

/// Which endpoint a connection arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Sessions,
    Ward,
}

impl Namespace {
    fn gatekeeper(self, state: &AppState) -> &Gatekeeper {
        match self {
            Namespace::Sessions => &state.session_gatekeeper,
            Namespace::Ward => &state.ward_gatekeeper,
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Namespace::Sessions => write!(f, "sessions"),
            Namespace::Ward => write!(f, "ward"),
        }
    }
}

pub async fn session_socket(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConnectQuery>,
) -> Response {
    upgrade(ws, state, query, Namespace::Sessions).await
}

pub async fn ward_socket(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConnectQuery>,
) -> Response {
    upgrade(ws, state, query, Namespace::Ward).await
}

async fn upgrade(
    ws: WebSocketUpgrade,
    state: Arc<AppState>,
    query: ConnectQuery,
    ns: Namespace,
) -> Response {
    let token = query.identity.unwrap_or_default();
    let identity = match ns.gatekeeper(&state).authenticate(&token).await {
        Ok(identity) => identity,
        Err(e) => return e.into_response(),
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, ns, identity))
}

/// Bind an authenticated identity to a new connection in `ns`.
///
/// Ward connections are also placed into every active ward session they
/// belong to. A placement failure is logged; the connection stays up and
/// the client can `rejoin`.
///
/// # Errors
///
/// Fails if the connection could not be registered.
pub async fn open(
    state: &AppState,
    ns: Namespace,
    identity: Identity,
    outbound: mpsc::Sender<ServerEvent>,
) -> Result<ConnectionContext, ScError> {
    let ctx = ns.gatekeeper(state).bind(identity, outbound).await?;

    if ns == Namespace::Ward {
        if let Err(e) = state.ward.place(&ctx).await {
            warn!(
                target: "sc.ws",
                connection_id = %ctx.connection_id,
                error = %e,
                "Ward placement failed"
            );
        }
    }

    Ok(ctx)
}

/// Parse and handle one text frame. Failures are reported to the sender
/// as an `error` event and never close the connection.
pub async fn dispatch(state: &AppState, ns: Namespace, ctx: &ConnectionContext, text: &str) {
    let result = match serde_json::from_str::<ClientCommand>(text) {
        Ok(cmd) => match ns {
            Namespace::Sessions => handle_session_command(state, ctx, cmd).await,
            Namespace::Ward => handle_ward_command(state, ctx, cmd).await,
        },
        Err(e) => Err(ScError::BadRequest(format!("malformed command: {e}"))),
    };

    let Err(err) = result else {
        return;
    };

    debug!(
        target: "sc.ws",
        namespace = %ns,
        connection_id = %ctx.connection_id,
        error = %err,
        "Command failed"
    );
    let registry = ns.gatekeeper(state).registry();
    if let Err(e) = registry
        .send_to(ctx.connection_id, ServerEvent::error(&err))
        .await
    {
        warn!(
            target: "sc.ws",
            connection_id = %ctx.connection_id,
            error = %e,
            "Failed to report command error"
        );
    }
}

/// Tear down a connection and reconcile presence for the session it held.
pub async fn close(state: &AppState, ns: Namespace, ctx: &ConnectionContext) {
    let snapshot = match ns.gatekeeper(state).disconnect(ctx.connection_id).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(
                target: "sc.ws",
                connection_id = %ctx.connection_id,
                error = %e,
                "Disconnect failed"
            );
            return;
        }
    };

    if let (Namespace::Sessions, Some(snapshot)) = (ns, snapshot) {
        if let Err(e) = state.presence.reconcile_departure(&snapshot).await {
            warn!(
                target: "sc.ws",
                connection_id = %ctx.connection_id,
                error = %e,
                "Presence reconciliation failed"
            );
        }
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, ns: Namespace, identity: Identity) {
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerEvent>(OUTBOUND_BUFFER);

    let ctx = match open(&state, ns, identity, outbound_tx).await {
        Ok(ctx) => ctx,
        Err(e) => {
            warn!(target: "sc.ws", namespace = %ns, error = %e, "Failed to open connection");
            return;
        }
    };

    info!(
        target: "sc.ws",
        namespace = %ns,
        connection_id = %ctx.connection_id,
        "WebSocket connected"
    );

    let (mut ws_tx, mut ws_rx) = socket.split();

    let mut writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.tick().await;

        loop {
            tokio::select! {
                event = outbound_rx.recv() => {
                    let Some(event) = event else {
                        break;
                    };
                    match serde_json::to_string(&event) {
                        Ok(text) => {
                            if ws_tx.send(Message::Text(text)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(target: "sc.ws", event = event.name(), error = %e, "Failed to serialize event");
                        }
                    }
                }
                _ = ping.tick() => {
                    if ws_tx.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }

        let _ = ws_tx.send(Message::Close(None)).await;
    });

    let reader = async {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                Message::Text(text) => dispatch(&state, ns, &ctx, &text).await,
                Message::Close(_) => break,
                _ => {}
            }
        }
    };

    tokio::select! {
        () = reader => {}
        _ = &mut writer => {}
    }

    close(&state, ns, &ctx).await;
    writer.abort();

    info!(
        target: "sc.ws",
        namespace = %ns,
        connection_id = %ctx.connection_id,
        "WebSocket disconnected"
    );
}
