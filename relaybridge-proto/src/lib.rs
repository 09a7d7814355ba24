//! Shared endpoint vocabulary for `relaybridge`.
//!
//! Both the client and the relay server agree on how a channel is addressed:
//! `<base>/connect/<channel>/<password>`. This crate owns that agreement.

pub mod endpoint;
pub mod name;

pub use endpoint::{CONNECT_SEGMENT, Endpoint, RelayUrl, parse_connect_path};
pub use name::{ChannelName, Password};

/// Errors produced while building or parsing channel endpoints.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointError {
    /// The channel name was empty.
    #[error("channel name must not be empty")]
    EmptyChannel,

    /// The channel name contained a path separator.
    #[error("channel name {0:?} must not contain '/'")]
    InvalidChannel(String),

    /// The password contained a path separator.
    #[error("password must not contain '/'")]
    InvalidPassword,

    /// The relay base URL could not be parsed.
    #[error("invalid relay URL: {0}")]
    InvalidBaseUrl(#[from] url::ParseError),

    /// The relay base URL does not use a websocket scheme.
    #[error("relay URL scheme must be ws or wss, got {0:?}")]
    UnsupportedScheme(String),

    /// The relay base URL cannot carry path segments (e.g. `ws:foo`).
    #[error("relay URL cannot be used as a base for channel paths")]
    CannotBeABase,
}
