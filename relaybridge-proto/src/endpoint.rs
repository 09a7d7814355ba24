//! Relay endpoint addressing.
//!
//! A channel lives at `<base>/connect/<channel>/<password>`. The password
//! segment is always present on the client side and is empty for public
//! channels; the relay accepts a missing segment as well.

use std::fmt;

use url::Url;

use crate::EndpointError;
use crate::name::{ChannelName, Password};

/// Fixed path segment that precedes the channel name.
pub const CONNECT_SEGMENT: &str = "connect";

/// Base URL of a relay server (`ws://` or `wss://`).
///
/// Query string and fragment are stripped on parse; any path on the base is
/// kept as a prefix in front of `/connect/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayUrl(Url);

impl RelayUrl {
    /// Parse and validate a relay base URL.
    ///
    /// # Errors
    ///
    /// Returns an [`EndpointError`] if the URL does not parse, is not a
    /// websocket URL, or cannot carry path segments.
    pub fn parse(raw: &str) -> Result<Self, EndpointError> {
        let mut url = Url::parse(raw)?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => return Err(EndpointError::UnsupportedScheme(other.to_string())),
        }
        if url.cannot_be_a_base() {
            return Err(EndpointError::CannotBeABase);
        }
        url.set_query(None);
        url.set_fragment(None);
        Ok(Self(url))
    }

    /// Return the base URL.
    #[must_use]
    pub const fn as_url(&self) -> &Url {
        &self.0
    }
}

impl fmt::Display for RelayUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything needed to (re)connect to one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    base: RelayUrl,
    channel: ChannelName,
    password: Option<Password>,
}

impl Endpoint {
    /// Assemble an endpoint from already-validated parts.
    #[must_use]
    pub const fn new(base: RelayUrl, channel: ChannelName, password: Option<Password>) -> Self {
        Self {
            base,
            channel,
            password,
        }
    }

    /// Validate raw channel and password strings and assemble an endpoint.
    ///
    /// # Errors
    ///
    /// Returns an [`EndpointError`] if the channel name or password is invalid.
    pub fn from_raw(
        base: RelayUrl,
        channel: &str,
        password: Option<&str>,
    ) -> Result<Self, EndpointError> {
        Ok(Self::new(
            base,
            ChannelName::new(channel)?,
            Password::optional(password)?,
        ))
    }

    /// The channel this endpoint addresses.
    #[must_use]
    pub const fn channel(&self) -> &ChannelName {
        &self.channel
    }

    /// The password presented to the relay, if any.
    #[must_use]
    pub const fn password(&self) -> Option<&Password> {
        self.password.as_ref()
    }

    /// Build the full websocket URL.
    ///
    /// Contains the password in clear text; log [`Endpoint::redacted_url`]
    /// instead.
    #[must_use]
    pub fn url(&self) -> Url {
        self.build(self.password.as_ref().map_or("", Password::expose))
    }

    /// The websocket URL with the password segment masked.
    #[must_use]
    pub fn redacted_url(&self) -> Url {
        self.build(if self.password.is_some() { "***" } else { "" })
    }

    fn build(&self, password_segment: &str) -> Url {
        let mut url = self.base.0.clone();
        // `RelayUrl::parse` rejects cannot-be-a-base URLs, so this always succeeds.
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .push(CONNECT_SEGMENT)
                .push(self.channel.as_str())
                .push(password_segment);
        }
        url
    }
}

/// Split the part of a request path following `/connect/` into a channel
/// name and optional password.
///
/// `"lobby"` and `"lobby/"` both address the public channel `lobby`;
/// `"lobby/secret"` addresses `lobby` with password `secret`.
///
/// # Errors
///
/// Returns an [`EndpointError`] if the channel name is empty or either part
/// contains a further `/`.
pub fn parse_connect_path(tail: &str) -> Result<(ChannelName, Option<Password>), EndpointError> {
    let (channel, password) = tail.split_once('/').unwrap_or((tail, ""));
    Ok((ChannelName::new(channel)?, Password::optional(Some(password))?))
}
