//! Client configuration.
//!
//! All settings live in a single `config.toml` file at
//! `~/.config/octopus/config.toml` by default:
//!
//! ```toml
//! [connection]
//! group = "workers"
//! name = "worker-1"
//! host = "broker.local"
//! port = 8899
//! ssl = false
//!
//! [reconnect]
//! min_delay_ms = 1000
//! max_delay_ms = 10000
//!
//! [request]
//! timeout_ms = 5000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use octopus_protocol::{DEFAULT_HOST, DEFAULT_PORT};

use crate::error::{ClientError, ClientResult};
use crate::transport::ReconnectConfig;

// ---------------------------------------------------------------------------
// ConnectOptions (runtime)
// ---------------------------------------------------------------------------

/// Options accepted by [`Client::connect`](crate::Client::connect).
///
/// `group` and `name` are validated when the connection starts, not here,
/// so invalid values surface as error events.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Group to join.
    pub group: Option<String>,
    /// Unique name inside the group, assigned by the broker when absent.
    pub name: Option<String>,
    /// Broker host (default `localhost`).
    pub host: Option<String>,
    /// Broker port (default 8899).
    pub port: Option<u16>,
    /// Use `wss://` instead of `ws://`.
    pub ssl: bool,
    /// Reconnect policy of the socket transport.
    pub reconnect: ReconnectConfig,
    /// Deadline applied to requests sent without explicit options.
    pub request_timeout: Option<Duration>,
}

impl ConnectOptions {
    /// Creates options for joining `group`.
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: Some(group.into()),
            ..Default::default()
        }
    }

    /// Builder: set the name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Builder: set the broker host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Builder: set the broker port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Builder: enable TLS.
    pub fn with_ssl(mut self, ssl: bool) -> Self {
        self.ssl = ssl;
        self
    }

    /// Builder: set the reconnect policy.
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Builder: set the default request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Builds the broker URL.
    pub fn url(&self) -> ClientResult<Url> {
        let scheme = if self.ssl { "wss" } else { "ws" };
        let host = self.host.as_deref().unwrap_or(DEFAULT_HOST);
        let port = self.port.unwrap_or(DEFAULT_PORT);
        Url::parse(&format!("{}://{}:{}", scheme, host, port))
            .map_err(|e| ClientError::Config(format!("invalid broker address: {}", e)))
    }

    /// Reads options from a dynamically typed JSON object.
    ///
    /// A missing or non-string `group` maps to [`ClientError::GroupNotString`]
    /// and a non-string `name` to [`ClientError::NameNotString`]. The port
    /// may be given as a number or a numeric string.
    pub fn from_value(value: &Value) -> ClientResult<Self> {
        let group = match value.get("group") {
            Some(Value::String(group)) => group.clone(),
            _ => return Err(ClientError::GroupNotString),
        };

        let name = match value.get("name") {
            None | Some(Value::Null) => None,
            Some(Value::String(name)) => Some(name.clone()),
            Some(_) => return Err(ClientError::NameNotString),
        };

        let host = value.get("host").and_then(Value::as_str).map(str::to_string);

        let port = match value.get("port") {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
            Some(Value::String(s)) => s.trim().parse().ok(),
            Some(_) => None,
        };

        let ssl = value.get("ssl").and_then(Value::as_bool).unwrap_or(false);

        Ok(Self {
            group: Some(group),
            name,
            host,
            port,
            ssl,
            ..Default::default()
        })
    }
}

// ---------------------------------------------------------------------------
// ClientConfig (config.toml)
// ---------------------------------------------------------------------------

/// Configuration for the octopus client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Debug mode.
    pub debug: bool,

    /// Broker and identity settings.
    #[serde(default)]
    pub connection: ConnectionSettings,

    /// Socket reconnect settings.
    #[serde(default)]
    pub reconnect: ReconnectSettings,

    /// Request settings.
    #[serde(default)]
    pub request: RequestSettings,
}

/// Broker and identity settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Group to join.
    pub group: Option<String>,
    /// Unique name inside the group.
    pub name: Option<String>,
    /// Broker host.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Use TLS.
    pub ssl: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            group: None,
            name: None,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            ssl: false,
        }
    }
}

/// Socket reconnect settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    /// Delay before the first reconnect attempt, in milliseconds.
    pub min_delay_ms: u64,
    /// Upper bound for the reconnect delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Delay multiplier between consecutive attempts.
    pub growth_factor: f64,
    /// Time allowed for one connection attempt, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Give up after this many consecutive failed attempts.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        let defaults = ReconnectConfig::default();
        Self {
            min_delay_ms: defaults.min_delay.as_millis() as u64,
            max_delay_ms: defaults.max_delay.as_millis() as u64,
            growth_factor: defaults.growth_factor,
            connect_timeout_ms: defaults.connect_timeout.as_millis() as u64,
            max_retries: defaults.max_retries,
        }
    }
}

impl ReconnectSettings {
    /// Converts to the transport reconnect policy.
    pub fn to_reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig::default()
            .with_delays(
                Duration::from_millis(self.min_delay_ms),
                Duration::from_millis(self.max_delay_ms),
                self.growth_factor,
            )
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms))
            .with_max_retries(self.max_retries)
    }
}

/// Request settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestSettings {
    /// Default request timeout in milliseconds; unset waits forever.
    pub timeout_ms: Option<u64>,
}

impl ClientConfig {
    /// Loads configuration from the default path.
    ///
    /// A missing file yields the defaults.
    pub fn load() -> ClientResult<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> ClientResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ClientError::Config(format!("failed to read config: {}", e)))?;
        toml::from_str(&content)
            .map_err(|e| ClientError::Config(format!("failed to parse config: {}", e)))
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    /// Returns the default configuration directory.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("octopus")
    }

    /// Builds connect options from the file settings.
    pub fn to_connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            group: self.connection.group.clone(),
            name: self.connection.name.clone(),
            host: Some(self.connection.host.clone()),
            port: Some(self.connection.port),
            ssl: self.connection.ssl,
            reconnect: self.reconnect.to_reconnect_config(),
            request_timeout: self.request.timeout_ms.map(Duration::from_millis),
        }
    }
}
