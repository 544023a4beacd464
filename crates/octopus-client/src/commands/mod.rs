//! Subcommand implementations.

pub mod config;
pub mod listen;
pub mod messaging;

use tracing::debug;

use crate::client::Client;
use crate::config::ConnectOptions;
use crate::error::{ClientError, ClientResult};
use crate::event::{ClientEvent, ClientEvents};

/// Connects and waits for the broker to accept the identity.
///
/// The first error event aborts the attempt, so a wrong address or a taken
/// name fails the command instead of retrying forever.
pub async fn connect(options: ConnectOptions) -> ClientResult<(Client, ClientEvents)> {
    let (client, mut events) = Client::connect(options);
    loop {
        match events.recv().await {
            Some(ClientEvent::Open) => return Ok((client, events)),
            Some(ClientEvent::Error(e)) => {
                client.close();
                return Err(e);
            }
            Some(event) => debug!(?event, "waiting for handshake"),
            None => return Err(ClientError::ConnectionClosed),
        }
    }
}

/// Closes the connection and waits until the socket is down, so queued
/// frames are flushed before the process exits.
pub async fn disconnect(client: Client, mut events: ClientEvents) {
    client.close();
    while let Some(event) = events.recv().await {
        if let ClientEvent::Close = event {
            break;
        }
    }
}
