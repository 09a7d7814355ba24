//! Channel sessions: open, transmit, receive, close.
//!
//! [`ChannelManager`] owns the [`ChannelRegistry`] and performs every session
//! operation against it. A failed send or receive is treated as a transient
//! link failure and repaired with exactly one reconnect using the password
//! stored in the channel's entry; a second failure is reported to the caller.
//!
//! Inbound messages are consumed one of two ways: synchronously with
//! [`ChannelManager::receive`], or asynchronously through the event relay
//! started by [`ChannelManager::start_event_relay`]. Once the event relay is
//! running it owns all inbound traffic and `receive` is refused.

pub mod registry;

use std::sync::Arc;

use parking_lot::Mutex;
use relaybridge_proto::{ChannelName, Endpoint, EndpointError, RelayUrl};
use tokio::sync::mpsc;

use crate::events::{self, DEFAULT_BUS_CAPACITY, DEFAULT_EVENT_BUFFER, EventBus};
use crate::transport::{Connection, Connector, InboundRouter, TransportError};

pub use registry::{ChannelEntry, ChannelRegistry, SwapOutcome};

/// Errors reported by channel session operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The relay refused the channel password on open.
    #[error("access to channel {channel} was forbidden by the relay")]
    Forbidden {
        /// Channel that was refused.
        channel: ChannelName,
    },

    /// Opening the channel failed for a reason other than the password.
    #[error("failed to connect to channel {channel}: {source}")]
    ConnectError {
        /// Channel being opened.
        channel: ChannelName,
        /// Underlying transport failure.
        source: TransportError,
    },

    /// The operation needs an open channel and there is none by that name.
    #[error("channel {channel} is not open")]
    NotOpen {
        /// Name as given by the caller.
        channel: String,
    },

    /// The link broke and the relay refused the stored password on reconnect.
    #[error("reconnect to channel {channel} was forbidden by the relay")]
    ReconnectForbidden {
        /// Channel being repaired.
        channel: ChannelName,
    },

    /// The link broke and reconnecting failed.
    #[error("reconnect to channel {channel} failed: {source}")]
    ReconnectFailed {
        /// Channel being repaired.
        channel: ChannelName,
        /// Underlying transport failure.
        source: TransportError,
    },

    /// Reconnecting worked but the retried send or receive failed again.
    #[error("channel {channel} reconnected but the retried operation failed: {source}")]
    RetryFailed {
        /// Channel being repaired.
        channel: ChannelName,
        /// Failure of the retried operation.
        source: TransportError,
    },

    /// `receive` was called while the event relay owns inbound traffic.
    #[error("inbound messages for channel {channel} are delivered to the event relay")]
    EventRelayActive {
        /// Channel passed to `receive`.
        channel: ChannelName,
    },

    /// `start_event_relay` was called a second time.
    #[error("the event relay is already running")]
    EventRelayAlreadyStarted,

    /// The channel name or password cannot be used in a relay endpoint.
    #[error("invalid channel endpoint: {0}")]
    InvalidEndpoint(#[from] EndpointError),
}

/// Configuration for a [`ChannelManager`].
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Relay base URL; channels live under `<relay_url>/connect/`.
    pub relay_url: RelayUrl,
    /// Capacity of the shared inbound notification stream (at least 1).
    pub event_buffer: usize,
    /// Per-subscriber capacity of the event bus.
    pub bus_capacity: usize,
}

impl ManagerConfig {
    /// Creates a `ManagerConfig` with default buffer sizes.
    #[must_use]
    pub const fn new(relay_url: RelayUrl) -> Self {
        Self {
            relay_url,
            event_buffer: DEFAULT_EVENT_BUFFER,
            bus_capacity: DEFAULT_BUS_CAPACITY,
        }
    }
}

struct EventRelayHandle {
    bus: EventBus,
    task: tokio::task::JoinHandle<()>,
}

/// Owns the channel registry and manages every channel's lifecycle.
///
/// Create one per process and call [`ChannelManager::shutdown`] before
/// exiting. Do not close a channel while a `receive` on it is in flight,
/// and do not `receive` on a channel from two tasks at once.
pub struct ChannelManager<C: Connector> {
    connector: C,
    config: ManagerConfig,
    registry: ChannelRegistry<C::Connection>,
    router: InboundRouter,
    event_relay: Mutex<Option<EventRelayHandle>>,
}

impl<C: Connector> ChannelManager<C> {
    /// Create a manager with no open channels.
    pub fn new(connector: C, config: ManagerConfig) -> Self {
        Self {
            connector,
            config,
            registry: ChannelRegistry::new(),
            router: InboundRouter::new(),
            event_relay: Mutex::new(None),
        }
    }

    /// Open `channel`, optionally protected by `password`.
    ///
    /// Opening a channel that is already open replaces its entry; the
    /// replaced connection is closed.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::InvalidEndpoint`] if the name or password is unusable.
    /// - [`ChannelError::Forbidden`] if the relay refuses the password.
    /// - [`ChannelError::ConnectError`] for any other connect failure.
    pub async fn open(&self, channel: &str, password: Option<&str>) -> Result<(), ChannelError> {
        let endpoint = Endpoint::from_raw(self.config.relay_url.clone(), channel, password)?;
        let name = endpoint.channel().clone();

        let connection = match self.connector.connect(&endpoint, self.router.clone()).await {
            Ok(connection) => connection,
            Err(e) if e.is_forbidden() => {
                tracing::warn!(channel = %name, "relay refused channel password");
                return Err(ChannelError::Forbidden { channel: name });
            }
            Err(source) => {
                tracing::warn!(channel = %name, err = %source, "failed to open channel");
                return Err(ChannelError::ConnectError {
                    channel: name,
                    source,
                });
            }
        };

        let entry = ChannelEntry::new(connection, endpoint.password().cloned());
        if let Some(previous) = self.registry.set(name.clone(), entry) {
            tracing::info!(channel = %name, "channel re-opened, closing previous connection");
            close_quietly(name.as_str(), previous.connection().as_ref()).await;
        }

        tracing::info!(
            channel = %name,
            protected = endpoint.password().is_some(),
            "channel opened"
        );
        Ok(())
    }

    /// Send `message` to the other members of `channel`.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::NotOpen`] if the channel is not open.
    /// - [`ChannelError::ReconnectForbidden`] / [`ChannelError::ReconnectFailed`]
    ///   if the link broke and could not be repaired.
    /// - [`ChannelError::RetryFailed`] if the resend after a reconnect failed.
    pub async fn transmit(&self, channel: &str, message: &str) -> Result<(), ChannelError> {
        let (name, entry) = self.lookup(channel)?;

        let Err(e) = entry.connection().send(message).await else {
            return Ok(());
        };
        tracing::warn!(channel = %name, err = %e, "send failed, reconnecting");

        let connection = self.reconnect(&name, &entry).await?;
        connection
            .send(message)
            .await
            .map_err(|source| ChannelError::RetryFailed {
                channel: name,
                source,
            })
    }

    /// Wait for the next message on `channel`.
    ///
    /// Messages left over from a connection replaced by an earlier reconnect
    /// come first.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::NotOpen`] if the channel is not open.
    /// - [`ChannelError::EventRelayActive`] if the event relay is running.
    /// - [`ChannelError::ReconnectForbidden`] / [`ChannelError::ReconnectFailed`]
    ///   if the link broke and could not be repaired.
    /// - [`ChannelError::RetryFailed`] if the receive after a reconnect failed.
    pub async fn receive(&self, channel: &str) -> Result<String, ChannelError> {
        let (name, entry) = self.lookup(channel)?;
        if self.router.is_relaying() {
            return Err(ChannelError::EventRelayActive { channel: name });
        }
        if let Some(message) = entry.next_carried() {
            return Ok(message);
        }

        match entry.connection().recv().await {
            Ok(message) => Ok(message),
            Err(e) => {
                tracing::warn!(channel = %name, err = %e, "receive failed, reconnecting");
                let connection = self.reconnect(&name, &entry).await?;
                if let Some(message) = entry.next_carried() {
                    return Ok(message);
                }
                connection
                    .recv()
                    .await
                    .map_err(|source| ChannelError::RetryFailed {
                        channel: name,
                        source,
                    })
            }
        }
    }

    /// Close `channel` and forget it. Does nothing if it is not open.
    pub async fn close(&self, channel: &str) {
        let Some(entry) = self.registry.remove(channel) else {
            tracing::debug!(channel, "close on a channel that is not open");
            return;
        };
        close_quietly(channel, entry.connection().as_ref()).await;
        tracing::info!(channel, "channel closed");
    }

    /// Start the event relay loop and return its bus.
    ///
    /// From now on inbound messages of every open connection, including
    /// connections opened or reconnected later, are published as
    /// [`events::BridgeEvent::BridgeMessage`] instead of being queued for
    /// [`ChannelManager::receive`]. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::EventRelayAlreadyStarted`] on a second call.
    pub fn start_event_relay(&self) -> Result<EventBus, ChannelError> {
        let mut slot = self.event_relay.lock();
        if slot.is_some() {
            return Err(ChannelError::EventRelayAlreadyStarted);
        }

        let (tx, rx) = mpsc::channel(self.config.event_buffer.max(1));
        if !self.router.attach(tx) {
            return Err(ChannelError::EventRelayAlreadyStarted);
        }
        let bus = EventBus::new(self.config.bus_capacity);
        let task = tokio::spawn(events::relay_loop(rx, bus.clone()));
        *slot = Some(EventRelayHandle {
            bus: bus.clone(),
            task,
        });
        Ok(bus)
    }

    /// The bus of the running event relay, if started.
    #[must_use]
    pub fn event_bus(&self) -> Option<EventBus> {
        self.event_relay.lock().as_ref().map(|relay| relay.bus.clone())
    }

    /// Whether `channel` is open.
    #[must_use]
    pub fn is_open(&self, channel: &str) -> bool {
        self.registry.contains(channel)
    }

    /// Whether `channel` is open and its transport reports the link up.
    #[must_use]
    pub fn link_up(&self, channel: &str) -> bool {
        self.registry
            .get(channel)
            .is_some_and(|entry| entry.connection().is_connected())
    }

    /// Names of all open channels, sorted.
    #[must_use]
    pub fn open_channels(&self) -> Vec<ChannelName> {
        self.registry.channels()
    }

    /// Close every open channel and stop the event relay.
    pub async fn shutdown(&self) {
        for (name, entry) in self.registry.drain() {
            close_quietly(name.as_str(), entry.connection().as_ref()).await;
        }
        let relay = self.event_relay.lock().take();
        if let Some(relay) = relay {
            self.router.detach();
            relay.task.abort();
        }
        tracing::info!("channel manager shut down");
    }

    fn lookup(&self, channel: &str) -> Result<(ChannelName, ChannelEntry<C::Connection>), ChannelError> {
        let not_open = || ChannelError::NotOpen {
            channel: channel.to_string(),
        };
        let name = ChannelName::new(channel).map_err(|_| not_open())?;
        let entry = self.registry.get(channel).ok_or_else(not_open)?;
        Ok((name, entry))
    }

    /// Replace a broken connection with a fresh one using the stored password.
    ///
    /// Messages still queued on the broken connection stay with the entry
    /// whether or not the reconnect succeeds.
    async fn reconnect(
        &self,
        name: &ChannelName,
        entry: &ChannelEntry<C::Connection>,
    ) -> Result<Arc<C::Connection>, ChannelError> {
        close_quietly(name.as_str(), entry.connection().as_ref()).await;
        let pending = entry.connection().take_pending().await;
        if !pending.is_empty() {
            tracing::debug!(channel = %name, count = pending.len(), "keeping messages queued on the broken link");
            entry.carry_over(pending);
        }

        let endpoint = Endpoint::new(
            self.config.relay_url.clone(),
            name.clone(),
            entry.password().cloned(),
        );
        let connection = match self.connector.connect(&endpoint, self.router.clone()).await {
            Ok(connection) => Arc::new(connection),
            Err(e) if e.is_forbidden() => {
                tracing::warn!(channel = %name, "relay refused stored password on reconnect");
                return Err(ChannelError::ReconnectForbidden {
                    channel: name.clone(),
                });
            }
            Err(source) => {
                tracing::warn!(channel = %name, err = %source, "reconnect failed");
                return Err(ChannelError::ReconnectFailed {
                    channel: name.clone(),
                    source,
                });
            }
        };

        match self
            .registry
            .swap_connection(name.as_str(), entry.connection(), Arc::clone(&connection))
        {
            SwapOutcome::Swapped => {
                tracing::info!(channel = %name, "channel reconnected");
                Ok(connection)
            }
            SwapOutcome::Superseded(current) => {
                tracing::debug!(channel = %name, "connection already replaced, using the newer one");
                close_quietly(name.as_str(), connection.as_ref()).await;
                Ok(current)
            }
            SwapOutcome::Missing => {
                tracing::debug!(channel = %name, "channel closed during reconnect");
                close_quietly(name.as_str(), connection.as_ref()).await;
                Err(ChannelError::NotOpen {
                    channel: name.to_string(),
                })
            }
        }
    }
}

/// Best-effort close; the channel is going away regardless.
async fn close_quietly<T: Connection>(channel: &str, connection: &T) {
    if let Err(e) = connection.close().await {
        tracing::debug!(channel, err = %e, "ignoring error while closing connection");
    }
}
