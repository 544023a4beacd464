//! Configuration commands.

use std::path::Path;

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::handshake::Identity;

/// Dump the effective configuration to stdout.
pub fn dump(config: &ClientConfig, path: &Path) -> ClientResult<()> {
    let toml_str = toml::to_string_pretty(config)
        .map_err(|e| ClientError::Config(format!("failed to serialize config: {}", e)))?;
    println!("# config.toml ({})", path.display());
    println!("{}", toml_str);

    Ok(())
}

/// Validate the configuration.
///
/// Checks the identity the same way a connect would and that the broker
/// address forms a valid URL.
pub fn validate(config: &ClientConfig) -> ClientResult<()> {
    let options = config.to_connect_options();
    let identity = Identity::from_options(&options)?;
    let url = options.url()?;

    match identity.name() {
        Some(name) => println!("Identity: {}/{}", identity.group(), name),
        None => println!("Identity: {} (unnamed)", identity.group()),
    }
    println!("Broker: {}", url);
    println!("Configuration is valid.");
    Ok(())
}

/// Show the configuration file path.
pub fn path(path: &Path) -> ClientResult<()> {
    println!("config: {}", path.display());
    Ok(())
}
