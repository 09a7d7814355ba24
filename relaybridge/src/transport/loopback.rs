//! Loopback transport for testing.
//!
//! [`LoopbackRelay`] simulates a relay server in-process with the same
//! channel rules as the real one: the first member of a channel fixes its
//! password, later members must present the same password or are refused
//! with [`TransportError::Forbidden`], messages go to every other member,
//! and an emptied channel is forgotten.
//!
//! On top of that it lets tests break links, take the relay offline, fail
//! sends on demand, change a channel's password behind the clients' backs,
//! and count transport activity.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use relaybridge_proto::{ChannelName, Endpoint, Password};
use tokio::sync::mpsc;

use super::{Connection, Connector, InboundRouter, TransportError, deliver_inbound};

/// Capacity of each loopback connection's inbound queue.
const INBOUND_BUFFER: usize = 256;

#[derive(Default)]
struct RelayInner {
    channels: HashMap<ChannelName, LoopChannel>,
    next_member: u64,
    offline: bool,
    connect_attempts: usize,
    send_attempts: usize,
    failing_sends: usize,
}

struct LoopChannel {
    password: Option<Password>,
    members: HashMap<u64, mpsc::UnboundedSender<String>>,
}

impl RelayInner {
    /// Drop a member, forgetting the channel once it is empty.
    fn remove_member(&mut self, channel: &ChannelName, member: u64) -> bool {
        let Some(chan) = self.channels.get_mut(channel) else {
            return false;
        };
        let removed = chan.members.remove(&member).is_some();
        if chan.members.is_empty() {
            self.channels.remove(channel);
        }
        removed
    }
}

/// In-process relay simulator.
///
/// Cheap to clone; clones share state.
///
/// # Example
///
/// ```rust,no_run
/// use relaybridge::transport::loopback::LoopbackRelay;
/// use relaybridge::transport::{Connection, Connector, InboundRouter};
/// use relaybridge_proto::{Endpoint, RelayUrl};
///
/// # async fn example() {
/// let relay = LoopbackRelay::new();
/// let base = RelayUrl::parse("ws://loopback").unwrap();
/// let ep = Endpoint::from_raw(base, "lobby", None).unwrap();
/// let alice = relay.connector().connect(&ep, InboundRouter::new()).await.unwrap();
/// let bob = relay.connector().connect(&ep, InboundRouter::new()).await.unwrap();
/// alice.send("hello").await.unwrap();
/// assert_eq!(bob.recv().await.unwrap(), "hello");
/// # }
/// ```
#[derive(Clone, Default)]
pub struct LoopbackRelay {
    inner: Arc<Mutex<RelayInner>>,
}

impl LoopbackRelay {
    /// Create an empty relay.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A connector that joins channels on this relay.
    #[must_use]
    pub fn connector(&self) -> LoopbackConnector {
        LoopbackConnector {
            relay: self.clone(),
        }
    }

    /// Sever every link of `channel`, as if the network dropped them.
    ///
    /// The channel is forgotten, so the next connection recreates it.
    /// Returns the number of links severed.
    pub fn break_channel(&self, channel: &str) -> usize {
        let mut inner = self.inner.lock();
        inner
            .channels
            .remove(channel)
            .map_or(0, |chan| chan.members.len())
    }

    /// While offline, every connect attempt fails with a refused connection.
    pub fn set_offline(&self, offline: bool) {
        self.inner.lock().offline = offline;
    }

    /// Make the next `count` sends fail with a closed connection, whatever
    /// the state of their link.
    pub fn fail_sends(&self, count: usize) {
        self.inner.lock().failing_sends = count;
    }

    /// Set the password a channel demands, creating the channel if needed.
    ///
    /// A channel created this way stays around until a member joins and the
    /// last member leaves.
    pub fn force_password(&self, channel: &ChannelName, password: Option<Password>) {
        let mut inner = self.inner.lock();
        inner
            .channels
            .entry(channel.clone())
            .or_insert_with(|| LoopChannel {
                password: None,
                members: HashMap::new(),
            })
            .password = password;
    }

    /// Number of connect attempts seen, successful or not.
    #[must_use]
    pub fn connect_attempts(&self) -> usize {
        self.inner.lock().connect_attempts
    }

    /// Number of send attempts seen, successful or not.
    #[must_use]
    pub fn send_attempts(&self) -> usize {
        self.inner.lock().send_attempts
    }

    /// Number of live members of `channel`.
    #[must_use]
    pub fn members(&self, channel: &str) -> usize {
        self.inner
            .lock()
            .channels
            .get(channel)
            .map_or(0, |chan| chan.members.len())
    }
}

/// Connector handed out by [`LoopbackRelay::connector`].
#[derive(Clone)]
pub struct LoopbackConnector {
    relay: LoopbackRelay,
}

impl Connector for LoopbackConnector {
    type Connection = LoopbackConnection;

    async fn connect(
        &self,
        endpoint: &Endpoint,
        router: InboundRouter,
    ) -> Result<LoopbackConnection, TransportError> {
        let channel = endpoint.channel().clone();
        let (member_tx, mut member_rx) = mpsc::unbounded_channel::<String>();

        let member = {
            let mut inner = self.relay.inner.lock();
            inner.connect_attempts += 1;
            if inner.offline {
                return Err(TransportError::Io(std::io::Error::from(
                    std::io::ErrorKind::ConnectionRefused,
                )));
            }
            let member = inner.next_member;
            inner.next_member += 1;
            let chan = inner
                .channels
                .entry(channel.clone())
                .or_insert_with(|| LoopChannel {
                    password: endpoint.password().cloned(),
                    members: HashMap::new(),
                });
            if chan.password.as_ref() != endpoint.password() {
                return Err(TransportError::Forbidden);
            }
            chan.members.insert(member, member_tx);
            member
        };

        let (direct_tx, direct_rx) = mpsc::channel(INBOUND_BUFFER);
        let pump_channel = channel.clone();
        let pump = tokio::spawn(async move {
            while let Some(contents) = member_rx.recv().await {
                if !deliver_inbound(&router, &pump_channel, contents, &direct_tx).await {
                    break;
                }
            }
        });

        Ok(LoopbackConnection {
            relay: self.relay.clone(),
            channel,
            member,
            inbound: tokio::sync::Mutex::new(direct_rx),
            pump,
        })
    }
}

/// One member's link to a loopback channel.
pub struct LoopbackConnection {
    relay: LoopbackRelay,
    channel: ChannelName,
    member: u64,
    inbound: tokio::sync::Mutex<mpsc::Receiver<String>>,
    pump: tokio::task::JoinHandle<()>,
}

impl Connection for LoopbackConnection {
    async fn send(&self, message: &str) -> Result<(), TransportError> {
        let mut inner = self.relay.inner.lock();
        inner.send_attempts += 1;
        if inner.failing_sends > 0 {
            inner.failing_sends -= 1;
            return Err(TransportError::ConnectionClosed);
        }
        let chan = inner
            .channels
            .get(&self.channel)
            .filter(|chan| chan.members.contains_key(&self.member))
            .ok_or(TransportError::ConnectionClosed)?;
        for (member, tx) in &chan.members {
            if *member != self.member {
                let _ = tx.send(message.to_string());
            }
        }
        Ok(())
    }

    async fn recv(&self) -> Result<String, TransportError> {
        let mut rx = self.inbound.lock().await;
        rx.recv().await.ok_or(TransportError::ConnectionClosed)
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self
            .relay
            .inner
            .lock()
            .remove_member(&self.channel, self.member)
        {
            Ok(())
        } else {
            Err(TransportError::ConnectionClosed)
        }
    }

    async fn take_pending(&self) -> Vec<String> {
        // Once the member is gone the pump forwards what is left and stops.
        let mut rx = self.inbound.lock().await;
        let mut pending = Vec::new();
        while let Some(message) = rx.recv().await {
            pending.push(message);
        }
        pending
    }

    fn is_connected(&self) -> bool {
        self.relay
            .inner
            .lock()
            .channels
            .get(&self.channel)
            .is_some_and(|chan| chan.members.contains_key(&self.member))
    }
}

impl Drop for LoopbackConnection {
    fn drop(&mut self) {
        self.relay
            .inner
            .lock()
            .remove_member(&self.channel, self.member);
        self.pump.abort();
    }
}
