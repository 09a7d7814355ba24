//! Application-level channel events.
//!
//! The event relay loop is the asynchronous consumption path: it drains the
//! shared [`Notification`] stream fed by every open connection and republishes
//! each message as a [`BridgeEvent::BridgeMessage`] on an [`EventBus`] that any
//! part of the application can subscribe to.
//!
//! ```text
//! connections ── Notification ──▶ relay_loop ── BridgeEvent ──▶ EventBus subscribers
//! ```

use relaybridge_proto::ChannelName;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};

use crate::transport::Notification;

/// Default capacity of the shared notification stream.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Default number of events a lagging subscriber may fall behind.
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// Events published to the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BridgeEvent {
    /// A message arrived on an open channel.
    BridgeMessage {
        /// Channel the message arrived on.
        channel: ChannelName,
        /// Message text.
        contents: String,
    },
}

/// Broadcast bus carrying [`BridgeEvent`]s. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BridgeEvent>,
}

impl EventBus {
    /// Create a bus that buffers up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.tx.subscribe()
    }

    /// Publish an event, returning how many subscribers will see it.
    pub fn publish(&self, event: BridgeEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }
}

/// Relay inbound notifications to the bus until the stream closes.
///
/// The stream only closes once the router has been detached and every
/// connection reader has let go of the sink, so in practice this runs for
/// the lifetime of the manager.
pub async fn relay_loop(mut inbound: mpsc::Receiver<Notification>, bus: EventBus) {
    tracing::info!("event relay started");
    while let Some(Notification { channel, contents }) = inbound.recv().await {
        tracing::debug!(channel = %channel, len = contents.len(), "relaying inbound message");
        if bus.publish(BridgeEvent::BridgeMessage { channel, contents }) == 0 {
            tracing::trace!("bridge_message dropped, no subscribers");
        }
    }
    tracing::info!("event relay stopped");
}
