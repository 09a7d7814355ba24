//! In-memory registry of open channels.
//!
//! The registry is the only record of which channels are open. Entries are
//! created by `open`, have their connection swapped by reconnection, and are
//! removed by `close`. The lock is synchronous and never held across an
//! `.await`; callers get cloned entries whose connection is `Arc`-shared.
//!
//! Messages left queued on a connection that gets replaced are carried over
//! in the entry, so a reconnect never loses what the old link delivered.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use relaybridge_proto::{ChannelName, Password};

/// Client-side record of one open channel.
pub struct ChannelEntry<T> {
    connection: Arc<T>,
    password: Option<Password>,
    carried: Arc<Mutex<VecDeque<String>>>,
}

impl<T> ChannelEntry<T> {
    /// Wrap a freshly opened connection and the password used to open it.
    pub fn new(connection: T, password: Option<Password>) -> Self {
        Self {
            connection: Arc::new(connection),
            password,
            carried: Arc::default(),
        }
    }

    /// The live connection.
    #[must_use]
    pub const fn connection(&self) -> &Arc<T> {
        &self.connection
    }

    /// The password the channel was opened with, kept for reconnection.
    #[must_use]
    pub const fn password(&self) -> Option<&Password> {
        self.password.as_ref()
    }

    /// Keep messages taken from a replaced connection for later receives.
    pub fn carry_over(&self, messages: Vec<String>) {
        self.carried.lock().extend(messages);
    }

    /// Oldest message carried over from a replaced connection.
    pub fn next_carried(&self) -> Option<String> {
        self.carried.lock().pop_front()
    }
}

// Manual impl: cloning an entry clones the `Arc`s, so `T` need not be `Clone`.
impl<T> Clone for ChannelEntry<T> {
    fn clone(&self) -> Self {
        Self {
            connection: Arc::clone(&self.connection),
            password: self.password.clone(),
            carried: Arc::clone(&self.carried),
        }
    }
}

/// Result of [`ChannelRegistry::swap_connection`].
pub enum SwapOutcome<T> {
    /// The replacement is now the entry's connection.
    Swapped,
    /// Someone else replaced the connection first; this is the current one.
    Superseded(Arc<T>),
    /// The channel is no longer open.
    Missing,
}

/// Mapping from channel name to its [`ChannelEntry`].
pub struct ChannelRegistry<T> {
    entries: Mutex<HashMap<ChannelName, ChannelEntry<T>>>,
}

impl<T> Default for ChannelRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ChannelRegistry<T> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Look up a channel's entry.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<ChannelEntry<T>> {
        self.entries.lock().get(name).cloned()
    }

    /// Install an entry, returning the one it replaced.
    pub fn set(&self, name: ChannelName, entry: ChannelEntry<T>) -> Option<ChannelEntry<T>> {
        self.entries.lock().insert(name, entry)
    }

    /// Remove and return a channel's entry.
    pub fn remove(&self, name: &str) -> Option<ChannelEntry<T>> {
        self.entries.lock().remove(name)
    }

    /// Whether the channel is open.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.lock().contains_key(name)
    }

    /// Replace the entry's connection with `replacement`, but only if the
    /// entry still holds `current`. The password is kept.
    pub fn swap_connection(
        &self,
        name: &str,
        current: &Arc<T>,
        replacement: Arc<T>,
    ) -> SwapOutcome<T> {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(name) else {
            return SwapOutcome::Missing;
        };
        if !Arc::ptr_eq(&entry.connection, current) {
            return SwapOutcome::Superseded(Arc::clone(&entry.connection));
        }
        entry.connection = replacement;
        SwapOutcome::Swapped
    }

    /// Names of all open channels, sorted.
    #[must_use]
    pub fn channels(&self) -> Vec<ChannelName> {
        let mut names: Vec<_> = self.entries.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of open channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no channel is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Remove and return every entry.
    pub fn drain(&self) -> Vec<(ChannelName, ChannelEntry<T>)> {
        self.entries.lock().drain().collect()
    }
}
