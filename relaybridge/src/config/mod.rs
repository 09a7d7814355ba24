//! Configuration for the `relaybridge` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/relaybridge/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use relaybridge_proto::{EndpointError, RelayUrl};

use crate::channel::ManagerConfig;
use crate::events::{DEFAULT_BUS_CAPACITY, DEFAULT_EVENT_BUFFER};
use crate::transport::websocket::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_INBOUND_BUFFER};

/// Relay used when nothing else is configured.
pub const DEFAULT_RELAY_URL: &str = "ws://127.0.0.1:11999";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// The configured relay URL is not a usable websocket base URL.
    #[error("invalid relay url {url:?}: {source}")]
    InvalidRelayUrl {
        /// URL as configured.
        url: String,
        /// Why it was rejected.
        source: EndpointError,
    },

    /// A connect timeout of zero seconds was configured.
    #[error("connect_timeout_secs must be at least 1")]
    ZeroConnectTimeout,

    /// A queue size of zero was configured.
    #[error("{0} must be at least 1")]
    ZeroBuffer(&'static str),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    relay: RelayFileConfig,
    channel: ChannelFileConfig,
    events: EventsFileConfig,
}

/// `[relay]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RelayFileConfig {
    url: Option<String>,
    connect_timeout_secs: Option<u64>,
    inbound_buffer: Option<usize>,
}

/// `[channel]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ChannelFileConfig {
    name: Option<String>,
    password: Option<String>,
}

/// `[events]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct EventsFileConfig {
    buffer: Option<usize>,
    bus_capacity: Option<usize>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Clone)]
pub struct BridgeConfig {
    /// Relay server websocket base URL.
    pub relay_url: String,
    /// Timeout for the websocket handshake.
    pub connect_timeout: Duration,
    /// Capacity of each connection's inbound queue.
    pub inbound_buffer: usize,
    /// Channel to open on startup.
    pub channel: Option<String>,
    /// Password for `channel`; `None` or empty means public.
    pub password: Option<String>,
    /// Capacity of the shared inbound notification stream.
    pub event_buffer: usize,
    /// Per-subscriber capacity of the event bus.
    pub bus_capacity: usize,
}

impl std::fmt::Debug for BridgeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeConfig")
            .field("relay_url", &self.relay_url)
            .field("connect_timeout", &self.connect_timeout)
            .field("inbound_buffer", &self.inbound_buffer)
            .field("channel", &self.channel)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("event_buffer", &self.event_buffer)
            .field("bus_capacity", &self.bus_capacity)
            .finish()
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            inbound_buffer: DEFAULT_INBOUND_BUFFER,
            channel: None,
            password: None,
            event_buffer: DEFAULT_EVENT_BUFFER,
            bus_capacity: DEFAULT_BUS_CAPACITY,
        }
    }
}

impl BridgeConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// Otherwise the default path (`~/.config/relaybridge/config.toml`) is
    /// tried and silently ignored if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed,
    /// or if the connect timeout or a queue size resolves to zero.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file)
    }

    /// Resolve a `BridgeConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let connect_timeout = match file.relay.connect_timeout_secs {
            Some(0) => return Err(ConfigError::ZeroConnectTimeout),
            Some(secs) => Duration::from_secs(secs),
            None => defaults.connect_timeout,
        };
        let inbound_buffer = nonzero("relay.inbound_buffer", file.relay.inbound_buffer)?
            .unwrap_or(defaults.inbound_buffer);
        let event_buffer =
            nonzero("events.buffer", file.events.buffer)?.unwrap_or(defaults.event_buffer);
        let bus_capacity =
            nonzero("events.bus_capacity", file.events.bus_capacity)?.unwrap_or(defaults.bus_capacity);

        Ok(Self {
            relay_url: cli
                .relay_url
                .clone()
                .or_else(|| file.relay.url.clone())
                .unwrap_or(defaults.relay_url),
            connect_timeout,
            inbound_buffer,
            channel: cli.channel.clone().or_else(|| file.channel.name.clone()),
            password: cli
                .password
                .clone()
                .or_else(|| file.channel.password.clone()),
            event_buffer,
            bus_capacity,
        })
    }

    /// Build the [`ManagerConfig`] for a [`crate::ChannelManager`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidRelayUrl`] if `relay_url` is not a
    /// `ws://` or `wss://` base URL.
    pub fn to_manager_config(&self) -> Result<ManagerConfig, ConfigError> {
        let relay_url =
            RelayUrl::parse(&self.relay_url).map_err(|source| ConfigError::InvalidRelayUrl {
                url: self.relay_url.clone(),
                source,
            })?;
        Ok(ManagerConfig {
            relay_url,
            event_buffer: self.event_buffer,
            bus_capacity: self.bus_capacity,
        })
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Bridge stdin/stdout to a channel on a websocket relay")]
pub struct CliArgs {
    /// WebSocket base URL of the relay server.
    #[arg(long, env = "RELAY_URL")]
    pub relay_url: Option<String>,

    /// Channel to open.
    #[arg(long, env = "BRIDGE_CHANNEL")]
    pub channel: Option<String>,

    /// Channel password (omit for a public channel).
    #[arg(long, env = "BRIDGE_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Path to config file (default: `~/.config/relaybridge/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "BRIDGE_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/relaybridge.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Print events as JSON lines instead of `[channel] message`.
    #[arg(long)]
    pub json: bool,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Reject a configured size of zero.
fn nonzero(key: &'static str, value: Option<usize>) -> Result<Option<usize>, ConfigError> {
    match value {
        Some(0) => Err(ConfigError::ZeroBuffer(key)),
        other => Ok(other),
    }
}

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("relaybridge").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
