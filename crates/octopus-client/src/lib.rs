//! Client engine and CLI for the Octopus group messaging protocol.
//!
//! A [`Client`] joins a group on a broker, announces its identity on every
//! (re)connect and then offers publish, request/response with timeouts and
//! chunked byte streams. Notifications arrive on [`ClientEvents`].
//!
//! ```ignore
//! use octopus_client::{Client, ClientEvent, ConnectOptions};
//!
//! let (client, mut events) = Client::connect(ConnectOptions::new("team").with_name("a"));
//! while let Some(event) = events.recv().await {
//!     if let ClientEvent::Open = event {
//!         let answer = client.request("b", "ping").await?;
//!         println!("{:?}", answer.into_value());
//!         break;
//!     }
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod handshake;
pub mod tracing;
pub mod transport;

mod client;
mod correlation;
mod event;
mod reassembler;
mod router;
mod sender;
mod stream;

pub use cli::Cli;
pub use client::{Client, RequestOptions};
pub use config::{ClientConfig, ConnectOptions};
pub use error::{ClientError, ClientResult, ErrorCode};
pub use event::{ClientEvent, ClientEvents, IncomingRequest, ReplyError, Responder, State};
pub use octopus_protocol::MessageRef;
pub use stream::{DEFAULT_CHUNK_SIZE, InboundStream, OctopusStream, Payload, Received};
pub use transport::{ReadyState, ReconnectConfig, WebSocketConnector};
