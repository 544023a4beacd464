//! octopus CLI entry point.

use std::process::ExitCode;

use clap::Parser;

use octopus_client::cli::{Cli, Command, ConfigAction};
use octopus_client::commands;
use octopus_client::config::ClientConfig;
use octopus_client::error::ClientResult;
use octopus_client::tracing::{TracingConfig, init_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let tracing_config = if cli.debug {
        TracingConfig::cli_debug()
    } else {
        TracingConfig::default()
    };
    if let Err(e) = init_tracing(tracing_config.with_format(cli.log_format)) {
        eprintln!("warning: {}", e);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.code() {
                Some(code) => eprintln!("error [{}]: {}", code, e),
                None => eprintln!("error: {}", e),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> ClientResult<()> {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(ClientConfig::default_path);
    let mut config = if cli.config.is_some() {
        ClientConfig::load_from(&config_path)?
    } else {
        ClientConfig::load()?
    };
    cli.apply_overrides(&mut config);

    match cli.command {
        Command::Config { action } => match action {
            ConfigAction::Dump => commands::config::dump(&config, &config_path),
            ConfigAction::Validate => commands::config::validate(&config),
            ConfigAction::Path => commands::config::path(&config_path),
        },
        Command::Listen { echo } => {
            let (client, events) = commands::connect(config.to_connect_options()).await?;
            let result = commands::listen::run(events, echo).await;
            client.close();
            result
        }
        Command::Publish { to, data } => {
            let (client, events) = commands::connect(config.to_connect_options()).await?;
            let result = commands::messaging::publish(&client, &to, data).await;
            commands::disconnect(client, events).await;
            result
        }
        Command::Request {
            to,
            data,
            timeout_ms,
        } => {
            let (client, events) = commands::connect(config.to_connect_options()).await?;
            let result = commands::messaging::request(&client, &to, data, timeout_ms).await;
            commands::disconnect(client, events).await;
            result
        }
        Command::SendFile { to, path, extra } => {
            let (client, events) = commands::connect(config.to_connect_options()).await?;
            let result = commands::messaging::send_file(&client, &to, &path, extra).await;
            commands::disconnect(client, events).await;
            result
        }
    }
}
