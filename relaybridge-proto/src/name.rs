//! Channel names and channel passwords.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::EndpointError;

/// Name of a rendezvous channel on the relay.
///
/// Doubles as a URL path segment, so it must be non-empty and free of `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelName(String);

impl ChannelName {
    /// Validate and wrap a channel name.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::EmptyChannel`] for an empty name and
    /// [`EndpointError::InvalidChannel`] if the name contains `/`.
    pub fn new(name: impl Into<String>) -> Result<Self, EndpointError> {
        let name = name.into();
        if name.is_empty() {
            return Err(EndpointError::EmptyChannel);
        }
        if name.contains('/') {
            return Err(EndpointError::InvalidChannel(name));
        }
        Ok(Self(name))
    }

    /// Return the channel name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ChannelName {
    type Error = EndpointError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ChannelName> for String {
    fn from(name: ChannelName) -> Self {
        name.0
    }
}

impl Borrow<str> for ChannelName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ChannelName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Shared secret presented as the last path segment of a channel endpoint.
///
/// Deliberately has no `Display` impl, and `Debug` is redacted, so a
/// password cannot end up in a log line by accident.
#[derive(Clone, PartialEq, Eq)]
pub struct Password(String);

impl Password {
    /// Normalise an optional password.
    ///
    /// `None` and `Some("")` both mean "public channel" and yield `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::InvalidPassword`] if the password contains `/`.
    pub fn optional(password: Option<&str>) -> Result<Option<Self>, EndpointError> {
        match password {
            None | Some("") => Ok(None),
            Some(p) if p.contains('/') => Err(EndpointError::InvalidPassword),
            Some(p) => Ok(Some(Self(p.to_string()))),
        }
    }

    /// Return the secret itself. Callers must not log it.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(***)")
    }
}
