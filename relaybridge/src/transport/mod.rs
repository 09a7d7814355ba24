//! Transport layer abstraction for `relaybridge`.
//!
//! A [`Connector`] opens one [`Connection`] per channel. Implementations:
//! - [`websocket::WsConnector`]: websocket connection to a relay server
//! - [`loopback::LoopbackRelay`]: in-process relay simulator for testing
//!
//! Every connection pushes inbound messages through an [`InboundRouter`].
//! Until the event relay attaches to the router, messages queue on the
//! connection itself and are read with [`Connection::recv`]; when a
//! connection is replaced, [`Connection::take_pending`] hands its leftovers
//! to the caller. Once attached,
//! messages from all connections are funnelled, tagged with their channel,
//! into the single shared [`Notification`] stream instead.

pub mod loopback;
pub mod websocket;

use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use relaybridge_proto::{ChannelName, Endpoint};
use tokio::sync::mpsc;

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection to the relay has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The operation timed out before completing.
    #[error("transport operation timed out")]
    Timeout,

    /// The relay refused the connection with HTTP 403.
    #[error("relay refused the connection: 403 Forbidden")]
    Forbidden,

    /// The relay refused the websocket upgrade with another HTTP status.
    #[error("relay refused the connection: HTTP status {0}")]
    Http(u16),

    /// An underlying I/O error occurred.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The websocket layer reported a protocol or TLS failure.
    #[error("websocket error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Whether this failure means the relay denied access to the channel.
    #[must_use]
    pub const fn is_forbidden(&self) -> bool {
        matches!(self, Self::Forbidden)
    }
}

/// An inbound message tagged with the channel whose connection received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Channel the message arrived on.
    pub channel: ChannelName,
    /// Message text.
    pub contents: String,
}

/// Process-wide switch deciding where inbound messages go.
///
/// Cloned into every connection at connect time. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct InboundRouter {
    relay: Arc<RwLock<Option<mpsc::Sender<Notification>>>>,
}

impl InboundRouter {
    /// Create a router in direct-delivery mode.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Route all subsequent inbound messages into `sink`.
    ///
    /// Returns `false` (and leaves the existing sink in place) if a sink is
    /// already attached.
    pub fn attach(&self, sink: mpsc::Sender<Notification>) -> bool {
        let mut relay = self.relay.write();
        if relay.is_some() {
            return false;
        }
        *relay = Some(sink);
        true
    }

    /// Return to direct delivery, dropping the shared sink.
    pub fn detach(&self) {
        self.relay.write().take();
    }

    /// Whether inbound messages currently go to the shared stream.
    #[must_use]
    pub fn is_relaying(&self) -> bool {
        self.relay.read().is_some()
    }

    fn relay_sink(&self) -> Option<mpsc::Sender<Notification>> {
        self.relay.read().clone()
    }
}

/// Hand one inbound message to its destination.
///
/// Returns `false` when the connection's own queue is gone, meaning the
/// connection was dropped and its reader should stop.
pub(crate) async fn deliver_inbound(
    router: &InboundRouter,
    channel: &ChannelName,
    contents: String,
    direct: &mpsc::Sender<String>,
) -> bool {
    if let Some(sink) = router.relay_sink() {
        let notification = Notification {
            channel: channel.clone(),
            contents,
        };
        if sink.send(notification).await.is_err() {
            tracing::warn!(channel = %channel, "event relay is gone, dropping inbound message");
        }
        return true;
    }
    direct.send(contents).await.is_ok()
}

/// A live connection to one channel on the relay.
///
/// All methods take `&self`; implementations serialise access internally so
/// a connection can be shared (`Arc`) between an in-flight operation and the
/// registry entry that owns it.
pub trait Connection: Send + Sync + 'static {
    /// Send one text message to the other members of the channel.
    ///
    /// Fails with [`TransportError::ConnectionClosed`] when the link is broken.
    fn send(&self, message: &str) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Wait for the next message queued on this connection.
    ///
    /// Fails with [`TransportError::ConnectionClosed`] once the link is
    /// broken and the queue is drained.
    fn recv(&self) -> impl Future<Output = Result<String, TransportError>> + Send;

    /// Close the connection. Further sends fail.
    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Hand over every message still queued on a closed connection.
    ///
    /// Waits for the reader to stop, so whatever it already received is
    /// included. Only call after [`Connection::close`].
    fn take_pending(&self) -> impl Future<Output = Vec<String>> + Send;

    /// Whether the link is believed to be up.
    fn is_connected(&self) -> bool;
}

/// Opens connections to channel endpoints.
pub trait Connector: Send + Sync + 'static {
    /// The connection type produced.
    type Connection: Connection;

    /// Connect to `endpoint`, routing inbound messages through `router`.
    ///
    /// A relay rejection of the password surfaces as
    /// [`TransportError::Forbidden`].
    fn connect(
        &self,
        endpoint: &Endpoint,
        router: InboundRouter,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;
}
