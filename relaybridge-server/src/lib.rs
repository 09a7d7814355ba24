//! `relaybridge` relay server library.
//!
//! Exposes the relay server for use in tests and embedding. Clients join a
//! channel by opening a websocket at `/connect/<channel>/<password>`; every
//! text or binary frame a client sends is forwarded to the other clients of
//! the same channel.

pub mod channels;
pub mod config;
pub mod relay;
