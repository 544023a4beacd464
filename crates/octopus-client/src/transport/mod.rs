//! Socket transport abstraction.
//!
//! The protocol engine only needs a way to queue text frames, an ordered
//! stream of lifecycle events and a readiness accessor. Reconnection and
//! backoff belong to the transport, not to the engine.

mod memory;
mod websocket;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use tokio::sync::{OwnedSemaphorePermit, mpsc};
use url::Url;

use crate::error::ClientResult;

pub use memory::{MemoryConnector, MemoryPeer};
pub use websocket::{ReconnectConfig, WebSocketConnector};

/// Readiness of the underlying socket, numbered like WebSocket `readyState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadyState {
    /// Connecting or waiting to reconnect.
    Connecting = 0,
    /// Socket open.
    Open = 1,
    /// Close requested, not finished yet.
    Closing = 2,
    /// Closed.
    Closed = 3,
}

impl ReadyState {
    /// Converts a raw `readyState` number.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Lifecycle and data events emitted by a transport, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The socket (re)opened.
    Open,
    /// One inbound text frame.
    Message(String),
    /// Transport failure, forwarded as text.
    Error(String),
    /// The socket closed; a reconnect may follow.
    Close,
}

/// Receiving side of a transport's event stream.
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// One outbound text frame, bound to the socket session it was queued for.
///
/// Sessions count the `Open` events of a transport, starting at 1. A frame
/// is written only while its own session is open; frames left over from an
/// earlier socket are discarded. An attached permit is released once the
/// frame is written or discarded.
#[derive(Debug)]
pub struct OutboundFrame {
    session: u64,
    text: String,
    permit: Option<OwnedSemaphorePermit>,
}

impl OutboundFrame {
    pub fn new(session: u64, text: impl Into<String>) -> Self {
        Self {
            session,
            text: text.into(),
            permit: None,
        }
    }

    /// Holds `permit` until the frame leaves the client.
    pub fn with_permit(mut self, permit: OwnedSemaphorePermit) -> Self {
        self.permit = Some(permit);
        self
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// A persistent, possibly reconnecting, text-frame socket.
pub trait Transport: Send + Sync + fmt::Debug {
    /// Queues one frame for delivery on its session.
    fn send_frame(&self, frame: OutboundFrame) -> ClientResult<()>;

    /// Number of the most recently opened socket session, 0 before the first.
    fn session(&self) -> u64;

    /// Queues one text frame for the current session.
    fn send(&self, text: String) -> ClientResult<()> {
        self.send_frame(OutboundFrame::new(self.session(), text))
    }

    /// Returns the socket readiness.
    fn ready_state(&self) -> ReadyState;

    /// Closes the socket for good; no reconnect follows.
    fn close(&self);
}

/// Opens transports.
///
/// Implementations may spawn tasks, so `connect` must run inside a tokio
/// runtime.
pub trait Connector: Send + Sync {
    /// Starts connecting to `url`.
    fn connect(&self, url: &Url) -> (Arc<dyn Transport>, TransportEvents);
}

/// Shared, lock-free ready state cell.
#[derive(Debug, Clone)]
pub(crate) struct SharedReadyState(Arc<AtomicU8>);

impl SharedReadyState {
    pub(crate) fn new(state: ReadyState) -> Self {
        Self(Arc::new(AtomicU8::new(state as u8)))
    }

    pub(crate) fn get(&self) -> ReadyState {
        ReadyState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub(crate) fn set(&self, state: ReadyState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }
}

/// Shared socket session counter.
#[derive(Debug, Clone, Default)]
pub(crate) struct SharedSession(Arc<AtomicU64>);

impl SharedSession {
    pub(crate) fn get(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    /// Starts the next session and returns its number.
    pub(crate) fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}
