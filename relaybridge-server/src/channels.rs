//! Channel membership for the relay server.
//!
//! A channel exists while it has at least one client. The first client to
//! join fixes the channel's password; everyone after must present the same
//! one. When the last client leaves, the channel and its password are
//! forgotten.

use std::collections::HashMap;

use axum::extract::ws::Message;
use parking_lot::Mutex;
use relaybridge_proto::{ChannelName, Password};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Errors returned by [`ChannelHub::join`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    /// The presented password does not match the channel's.
    #[error("wrong password for channel")]
    Forbidden,
}

struct HubChannel {
    password: Option<Password>,
    clients: HashMap<Uuid, mpsc::UnboundedSender<Message>>,
}

/// Directory of live channels and their clients.
///
/// Each client is represented by the sender feeding its websocket writer.
#[derive(Default)]
pub struct ChannelHub {
    channels: Mutex<HashMap<ChannelName, HubChannel>>,
}

impl ChannelHub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a client to `channel`, creating the channel if it does not exist.
    ///
    /// Returns the client's id.
    ///
    /// # Errors
    ///
    /// Returns [`JoinError::Forbidden`] if the channel exists with a
    /// different password.
    pub fn join(
        &self,
        channel: &ChannelName,
        password: Option<&Password>,
        sender: mpsc::UnboundedSender<Message>,
    ) -> Result<Uuid, JoinError> {
        let mut channels = self.channels.lock();
        let chan = channels
            .entry(channel.clone())
            .or_insert_with(|| HubChannel {
                password: password.cloned(),
                clients: HashMap::new(),
            });
        if chan.password.as_ref() != password {
            return Err(JoinError::Forbidden);
        }
        let id = Uuid::now_v7();
        chan.clients.insert(id, sender);
        Ok(id)
    }

    /// Removes a client. Returns `false` if it was not a member.
    pub fn leave(&self, channel: &ChannelName, client: Uuid) -> bool {
        let mut channels = self.channels.lock();
        let Some(chan) = channels.get_mut(channel) else {
            return false;
        };
        let removed = chan.clients.remove(&client).is_some();
        if chan.clients.is_empty() {
            channels.remove(channel);
            tracing::debug!(channel = %channel, "channel empty, forgotten");
        }
        removed
    }

    /// Queues `message` for every client of `channel` except `from`.
    ///
    /// Returns the number of clients the message was queued for.
    pub fn broadcast(&self, channel: &ChannelName, from: Uuid, message: &Message) -> usize {
        let channels = self.channels.lock();
        let Some(chan) = channels.get(channel) else {
            return 0;
        };
        let mut queued = 0;
        for (id, tx) in &chan.clients {
            if *id != from && tx.send(message.clone()).is_ok() {
                queued += 1;
            }
        }
        queued
    }

    /// Number of clients in `channel`.
    #[must_use]
    pub fn client_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .get(channel)
            .map_or(0, |chan| chan.clients.len())
    }

    /// Number of live channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.lock().len()
    }

    /// Forgets `channel` and asks each of its clients' writers to send a
    /// close frame. Returns the number of clients told to close.
    pub fn close_channel(&self, channel: &str) -> usize {
        let Some(chan) = self.channels.lock().remove(channel) else {
            return 0;
        };
        close_clients(channel, chan)
    }

    /// Forgets every channel, sending close frames to all clients.
    pub fn close_all(&self) -> usize {
        let drained: Vec<_> = self.channels.lock().drain().collect();
        drained
            .into_iter()
            .map(|(name, chan)| close_clients(name.as_str(), chan))
            .sum()
    }
}

fn close_clients(channel: &str, chan: HubChannel) -> usize {
    for (client, sender) in &chan.clients {
        tracing::info!(channel, client = %client, "sending close frame to client");
        let _ = sender.send(Message::Close(None));
    }
    chan.clients.len()
}
