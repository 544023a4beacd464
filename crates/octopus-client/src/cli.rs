//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::Value;

use crate::config::ClientConfig;
use crate::tracing::TracingOutputFormat;

/// octopus - talk to a group messaging broker
#[derive(Debug, Parser)]
#[command(name = "octopus")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "OCTOPUS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v')]
    pub debug: bool,

    /// Log format (compact, pretty, json)
    #[arg(long, default_value = "compact")]
    pub log_format: TracingOutputFormat,

    // --- Connection flags ---
    /// Group to join
    #[arg(long, short, env = "OCTOPUS_GROUP")]
    pub group: Option<String>,

    /// Unique name inside the group
    #[arg(long, short, env = "OCTOPUS_NAME")]
    pub name: Option<String>,

    /// Broker host
    #[arg(long, env = "OCTOPUS_HOST")]
    pub host: Option<String>,

    /// Broker port
    #[arg(long, short, env = "OCTOPUS_PORT")]
    pub port: Option<u16>,

    /// Connect with TLS (wss://)
    #[arg(long)]
    pub ssl: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Applies connection flags on top of file settings.
    pub fn apply_overrides(&self, config: &mut ClientConfig) {
        if let Some(ref group) = self.group {
            config.connection.group = Some(group.clone());
        }
        if let Some(ref name) = self.name {
            config.connection.name = Some(name.clone());
        }
        if let Some(ref host) = self.host {
            config.connection.host = host.clone();
        }
        if let Some(port) = self.port {
            config.connection.port = port;
        }
        if self.ssl {
            config.connection.ssl = true;
        }
        if self.debug {
            config.debug = true;
        }
    }
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print incoming messages, requests and streams as JSON lines
    Listen {
        /// Answer requests by echoing their payload
        #[arg(long)]
        echo: bool,
    },

    /// Publish a message
    Publish {
        /// Destination name or group
        to: String,

        /// Payload; parsed as JSON, sent as a string otherwise
        #[arg(value_parser = parse_payload)]
        data: Value,
    },

    /// Send a request and print the response
    Request {
        /// Destination name or group
        to: String,

        /// Payload; parsed as JSON, sent as a string otherwise
        #[arg(value_parser = parse_payload)]
        data: Value,

        /// Give up after this many milliseconds
        #[arg(long, allow_hyphen_values = true)]
        timeout_ms: Option<i64>,
    },

    /// Stream a file to a name or group
    SendFile {
        /// Destination name or group
        to: String,

        /// File to send
        path: PathBuf,

        /// Metadata sent with the stream header (JSON)
        #[arg(long, value_parser = parse_payload)]
        extra: Option<Value>,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration actions.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Dump current configuration
    Dump,

    /// Validate configuration
    Validate,

    /// Show configuration file path
    Path,
}

/// Reads a payload argument: JSON when it parses, a plain string otherwise.
pub fn parse_payload(raw: &str) -> Result<Value, String> {
    Ok(serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())))
}
