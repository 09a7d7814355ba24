//! WebSocket transport to a relay server.
//!
//! One websocket per channel, addressed as `<base>/connect/<channel>/<password>`.
//! A background reader task per connection drains the socket and hands each
//! text frame to the [`InboundRouter`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use relaybridge_proto::{ChannelName, Endpoint};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::{Connection, Connector, InboundRouter, TransportError, deliver_inbound};

/// Type alias for the write half of a WebSocket connection.
type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Type alias for the read half of a WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Default timeout for connecting to the relay server.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default capacity of each connection's inbound queue.
pub const DEFAULT_INBOUND_BUFFER: usize = 256;

/// Opens websocket connections to a relay server.
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
    inbound_buffer: usize,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl WsConnector {
    /// Create a connector with the given connect timeout.
    #[must_use]
    pub const fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            inbound_buffer: DEFAULT_INBOUND_BUFFER,
        }
    }

    /// Override the per-connection inbound queue capacity (at least 1).
    #[must_use]
    pub fn with_inbound_buffer(mut self, inbound_buffer: usize) -> Self {
        self.inbound_buffer = inbound_buffer.max(1);
        self
    }
}

impl Connector for WsConnector {
    type Connection = WsConnection;

    /// Perform the websocket handshake and spawn the reader task.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Timeout`] if the handshake does not finish in time.
    /// - [`TransportError::Forbidden`] if the relay answers 403.
    /// - [`TransportError::Http`], [`TransportError::Io`] or
    ///   [`TransportError::Protocol`] for every other failure.
    async fn connect(
        &self,
        endpoint: &Endpoint,
        router: InboundRouter,
    ) -> Result<WsConnection, TransportError> {
        let shown = endpoint.redacted_url();
        let url = endpoint.url();

        let (ws_stream, _response) =
            tokio::time::timeout(self.connect_timeout, connect_async(url.as_str()))
                .await
                .map_err(|_| {
                    tracing::warn!(url = %shown, "relay websocket connect timed out");
                    TransportError::Timeout
                })?
                .map_err(|e| {
                    let err = map_ws_connect_error(e);
                    tracing::warn!(url = %shown, err = %err, "relay websocket connect failed");
                    err
                })?;

        let (ws_sender, ws_reader) = ws_stream.split();
        let (direct_tx, direct_rx) = mpsc::channel(self.inbound_buffer);
        let connected = Arc::new(AtomicBool::new(true));
        let channel = endpoint.channel().clone();

        let reader_handle = tokio::spawn(reader_loop(
            ws_reader,
            channel.clone(),
            router,
            direct_tx,
            Arc::clone(&connected),
        ));

        tracing::info!(channel = %channel, url = %shown, "connected to relay");

        Ok(WsConnection {
            channel,
            ws_sender: Mutex::new(ws_sender),
            inbound: Mutex::new(direct_rx),
            connected,
            reader_handle,
        })
    }
}

/// A websocket connection to one relay channel.
pub struct WsConnection {
    /// Channel this socket is joined to.
    channel: ChannelName,
    /// Write half of the websocket.
    ws_sender: Mutex<WsSender>,
    /// Messages queued by the reader task while in direct-delivery mode.
    inbound: Mutex<mpsc::Receiver<String>>,
    /// Cleared by the reader task when the socket closes or errors out.
    connected: Arc<AtomicBool>,
    /// Background reader; aborted on close and on drop.
    reader_handle: tokio::task::JoinHandle<()>,
}

impl WsConnection {
    /// Channel this connection is joined to.
    #[must_use]
    pub const fn channel(&self) -> &ChannelName {
        &self.channel
    }
}

impl Connection for WsConnection {
    async fn send(&self, message: &str) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::Relaxed) {
            return Err(TransportError::ConnectionClosed);
        }

        let mut sender = self.ws_sender.lock().await;
        sender
            .send(Message::text(message.to_owned()))
            .await
            .map_err(|e| {
                tracing::warn!(channel = %self.channel, err = %e, "relay send failed");
                self.connected.store(false, Ordering::Relaxed);
                TransportError::ConnectionClosed
            })
    }

    async fn recv(&self) -> Result<String, TransportError> {
        let mut rx = self.inbound.lock().await;
        rx.recv().await.ok_or(TransportError::ConnectionClosed)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::Relaxed);
        let result = self.ws_sender.lock().await.close().await;
        self.reader_handle.abort();
        result.map_err(|e| TransportError::Protocol(e.to_string()))
    }

    async fn take_pending(&self) -> Vec<String> {
        // The reader is aborted by `close`; stop accepting and drain.
        let mut rx = self.inbound.lock().await;
        rx.close();
        let mut pending = Vec::new();
        while let Some(message) = rx.recv().await {
            pending.push(message);
        }
        pending
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

impl Drop for WsConnection {
    fn drop(&mut self) {
        self.reader_handle.abort();
    }
}

/// Background task that reads frames off the socket and routes them.
///
/// Binary frames are decoded as lossy UTF-8. Control frames are left to
/// tungstenite. Clears `connected` when the socket closes or errors out.
async fn reader_loop(
    mut ws_reader: WsReader,
    channel: ChannelName,
    router: InboundRouter,
    direct: mpsc::Sender<String>,
    connected: Arc<AtomicBool>,
) {
    while let Some(frame) = ws_reader.next().await {
        let contents = match frame {
            Ok(Message::Text(text)) => text.as_str().to_owned(),
            Ok(Message::Binary(data)) => {
                tracing::debug!(channel = %channel, len = data.len(), "binary frame decoded as text");
                String::from_utf8_lossy(&data).into_owned()
            }
            Ok(Message::Close(_)) => {
                tracing::info!(channel = %channel, "relay websocket closed by server");
                break;
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
            Err(e) => {
                tracing::warn!(channel = %channel, err = %e, "relay websocket read error");
                break;
            }
        };

        if !deliver_inbound(&router, &channel, contents, &direct).await {
            break;
        }
    }
    connected.store(false, Ordering::Relaxed);
    tracing::debug!(channel = %channel, "relay reader task exiting");
}

/// Map a `tokio_tungstenite` connection error to a [`TransportError`].
fn map_ws_connect_error(err: tokio_tungstenite::tungstenite::Error) -> TransportError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => TransportError::Io(io_err),
        WsError::Http(response) if response.status().as_u16() == 403 => TransportError::Forbidden,
        WsError::Http(response) => TransportError::Http(response.status().as_u16()),
        other => TransportError::Protocol(format!("relay connection error: {other}")),
    }
}
