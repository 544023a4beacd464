//! Notifications emitted by a [`Client`](crate::Client).

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use octopus_protocol::MessageRef;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{ClientError, ClientResult};
use crate::router::Command;
use crate::sender::{self, Route};
use crate::stream::{InboundStream, Payload, Received};
use crate::transport::ReadyState;

/// Connection state as reported to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// `connect` was never called or the options were invalid.
    Disconnected,
    Connecting,
    Open,
    Closing,
    Closed,
}

impl State {
    /// Upper-case name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Open => "OPEN",
            Self::Closing => "CLOSING",
            Self::Closed => "CLOSED",
        }
    }
}

impl From<ReadyState> for State {
    fn from(state: ReadyState) -> Self {
        match state {
            ReadyState::Connecting => Self::Connecting,
            ReadyState::Open => Self::Open,
            ReadyState::Closing => Self::Closing,
            ReadyState::Closed => Self::Closed,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One notification from the connection.
#[derive(Debug)]
pub enum ClientEvent {
    /// The broker accepted the identity.
    Open,
    /// The socket closed.
    Close,
    /// The connection state changed.
    State(State),
    /// Validation, handshake or transport failure.
    Error(ClientError),
    /// A plain publish addressed to this client or its group.
    Message(Value),
    /// A request waiting for an answer.
    Request(IncomingRequest),
    /// A byte stream published to this client or its group.
    Stream(InboundStream),
}

/// Receiving side of a client's notifications.
///
/// Ends once the connection task has stopped and every event was read.
#[derive(Debug)]
pub struct ClientEvents {
    events: mpsc::UnboundedReceiver<ClientEvent>,
}

impl ClientEvents {
    pub(crate) fn new(events: mpsc::UnboundedReceiver<ClientEvent>) -> Self {
        Self { events }
    }

    /// Waits for the next event.
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        self.events.recv().await
    }

    /// Returns the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<ClientEvent> {
        self.events.try_recv().ok()
    }
}

impl Stream for ClientEvents {
    type Item = ClientEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().events.poll_recv(cx)
    }
}

/// Request forwarded by the broker.
#[derive(Debug)]
pub struct IncomingRequest {
    /// Request payload.
    pub data: Received,
    /// Answers the request; usable once.
    pub responder: Responder,
}

/// Error answer to an incoming request.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyError {
    /// Error text sent as `message`.
    pub message: String,
    /// Optional payload sent as `data`.
    pub data: Option<Value>,
}

impl ReplyError {
    /// Creates an error answer without payload.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data: None,
        }
    }

    /// Builder: attach a payload.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl From<&str> for ReplyError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for ReplyError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<ClientError> for ReplyError {
    fn from(error: ClientError) -> Self {
        Self {
            message: error.to_string(),
            data: error.data().cloned(),
        }
    }
}

/// Single-use capability to answer one incoming request.
///
/// Both answers consume the responder, so a request is answered at most
/// once. Answers go out with a fresh `clientMessageId` like any other
/// envelope.
pub struct Responder {
    reply_to: MessageRef,
    commands: mpsc::WeakUnboundedSender<Command>,
    answered: bool,
}

impl Responder {
    pub(crate) fn new(reply_to: MessageRef, commands: mpsc::WeakUnboundedSender<Command>) -> Self {
        Self {
            reply_to,
            commands,
            answered: false,
        }
    }

    /// Broker identifier of the request being answered.
    pub fn reply_to(&self) -> &MessageRef {
        &self.reply_to
    }

    /// Answers with a payload; a stream payload is sent as a transfer.
    pub async fn reply(mut self, payload: impl Into<Payload>) -> ClientResult<()> {
        self.answered = true;
        let commands = self.commands.upgrade().ok_or(ClientError::NotConnected)?;
        let route = Route::Reply {
            reply_to: self.reply_to.clone(),
        };

        match payload.into() {
            Payload::Plain(data) => sender::dispatch(&commands, route.command(data)),
            Payload::Stream(stream) => sender::send_stream(&commands, &route, stream)
                .await
                .map(|_| ()),
        }
    }

    /// Answers with an error.
    pub fn reply_error(mut self, error: impl Into<ReplyError>) -> ClientResult<()> {
        self.answered = true;
        let commands = self.commands.upgrade().ok_or(ClientError::NotConnected)?;
        let error = error.into();
        sender::dispatch(
            &commands,
            Command::ReplyError {
                reply_to: self.reply_to.clone(),
                message: error.message,
                data: error.data,
            },
        )
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("reply_to", &self.reply_to)
            .field("answered", &self.answered)
            .finish()
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if !self.answered {
            debug!(reply_to = %self.reply_to, "request dropped without an answer");
        }
    }
}
