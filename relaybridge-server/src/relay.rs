//! Relay server core: shared state, WebSocket handler, and channel fan-out.
//!
//! Clients connect to `GET /connect/<channel>/<password>` (the password
//! segment may be empty). The password is checked before the websocket
//! upgrade, so a refused client sees a plain HTTP 403. Once joined, every
//! text or binary frame a client sends is forwarded, with its frame type
//! intact, to the other clients of the channel.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use relaybridge_proto::{ChannelName, parse_connect_path};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::channels::{ChannelHub, JoinError};

/// Default interval between server pings.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(10);

/// Shared relay server state.
pub struct RelayState {
    /// Live channels and their clients.
    pub hub: ChannelHub,
    /// Ping interval; a client silent for two intervals is dropped.
    heartbeat: Duration,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates a relay state with no channels and the default heartbeat.
    #[must_use]
    pub fn new() -> Self {
        Self::with_heartbeat(DEFAULT_HEARTBEAT)
    }

    /// Creates a relay state with a custom heartbeat interval.
    #[must_use]
    pub fn with_heartbeat(heartbeat: Duration) -> Self {
        Self {
            hub: ChannelHub::new(),
            heartbeat,
        }
    }

    /// The configured heartbeat interval.
    #[must_use]
    pub const fn heartbeat(&self) -> Duration {
        self.heartbeat
    }

    /// Send a close frame to every client of `channel` and forget the
    /// channel. Returns the number of clients disconnected.
    pub fn disconnect_channel(&self, channel: &str) -> usize {
        let count = self.hub.close_channel(channel);
        tracing::info!(channel, clients = count, "channel disconnected");
        count
    }

    /// Send a close frame to all connected clients.
    ///
    /// Useful for graceful shutdown and testing.
    pub fn close_all_connections(&self) -> usize {
        let count = self.hub.close_all();
        tracing::info!(clients = count, "closed all connections");
        count
    }
}

/// Starts the relay server on `addr` with a pre-configured [`RelayState`],
/// returning the bound address and a join handle.
///
/// Keep a clone of `state` to inspect or disconnect channels from outside.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/connect/{*tail}", axum::routing::get(connect_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "relay server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler: validate the path, join the channel, then upgrade.
async fn connect_handler(
    Path(tail): Path<String>,
    State(state): State<Arc<RelayState>>,
    ws: axum::extract::ws::WebSocketUpgrade,
) -> Response {
    let (channel, password) = match parse_connect_path(&tail) {
        Ok(parts) => parts,
        Err(e) => {
            tracing::debug!(error = %e, "rejecting malformed connect path");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let (tx, rx) = mpsc::unbounded_channel::<Message>();
    let client = match state.hub.join(&channel, password.as_ref(), tx) {
        Ok(client) => client,
        Err(JoinError::Forbidden) => {
            tracing::info!(channel = %channel, "refusing client with wrong password");
            return StatusCode::FORBIDDEN.into_response();
        }
    };
    tracing::info!(channel = %channel, client = %client, "client joined");

    let failed_state = Arc::clone(&state);
    let failed_channel = channel.clone();
    ws.on_failed_upgrade(move |e| {
        tracing::warn!(channel = %failed_channel, error = %e, "websocket upgrade failed");
        failed_state.hub.leave(&failed_channel, client);
    })
    .on_upgrade(move |socket| handle_socket(socket, state, channel, client, rx))
}

/// Handles an upgraded WebSocket connection for a single client.
///
/// A writer task drains the client's queue and sends heartbeat pings; a
/// reader task fans inbound frames out to the rest of the channel. When
/// either finishes the other is aborted and the client leaves the channel.
pub async fn handle_socket(
    socket: WebSocket,
    state: Arc<RelayState>,
    channel: ChannelName,
    client: Uuid,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let last_seen = Arc::new(Mutex::new(Instant::now()));
    let heartbeat = state.heartbeat();

    let writer_last_seen = Arc::clone(&last_seen);
    let writer_channel = channel.clone();
    let mut write_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat);
        ticker.tick().await;
        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else { break };
                    let closing = matches!(msg, Message::Close(_));
                    if ws_sender.send(msg).await.is_err() {
                        tracing::warn!(channel = %writer_channel, client = %client, "WebSocket write failed");
                        break;
                    }
                    if closing {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if writer_last_seen.lock().elapsed() > heartbeat * 2 {
                        tracing::info!(channel = %writer_channel, client = %client, "client missed heartbeats, dropping");
                        break;
                    }
                    if ws_sender.send(Message::Ping(axum::body::Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let reader_state = Arc::clone(&state);
    let reader_channel = channel.clone();
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            *last_seen.lock() = Instant::now();
            match msg {
                Message::Text(_) | Message::Binary(_) => {
                    let delivered = reader_state.hub.broadcast(&reader_channel, client, &msg);
                    tracing::debug!(channel = %reader_channel, client = %client, delivered, "fan-out");
                }
                Message::Close(_) => {
                    tracing::info!(channel = %reader_channel, client = %client, "received close frame");
                    break;
                }
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
    });

    // Wait for either task to finish, then abort the other.
    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    state.hub.leave(&channel, client);
    tracing::info!(channel = %channel, client = %client, "client disconnected");
}

/// Starts the relay server in-process for testing.
#[cfg(test)]
pub async fn start_test_server(state: Arc<RelayState>) -> std::net::SocketAddr {
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", state)
        .await
        .expect("failed to start test server");
    addr
}
