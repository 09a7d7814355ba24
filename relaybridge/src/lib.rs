//! `relaybridge`: channel sessions over a hosted websocket relay.
//!
//! Opens named, optionally password-protected channels on a relay, keeps
//! them alive with a single transparent reconnect on link failure, and fans
//! inbound messages out either to direct `receive` calls or to an
//! application event bus.

pub mod channel;
pub mod config;
pub mod events;
pub mod transport;

pub use channel::{ChannelError, ChannelManager, ManagerConfig};
pub use events::{BridgeEvent, EventBus};
