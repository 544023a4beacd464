//! In-process transport.
//!
//! [`MemoryConnector::pair`] returns a connector for the client and a
//! [`MemoryPeer`] that plays the broker: it injects socket events and reads
//! every frame the client writes. Like a real socket, the peer only sees
//! frames queued for the session it currently has open.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;

use super::{
    Connector, OutboundFrame, ReadyState, SharedReadyState, SharedSession, Transport,
    TransportEvent, TransportEvents,
};
use crate::error::{ClientError, ClientResult};

/// Connector handing out a single pre-wired [`MemoryTransport`].
#[derive(Debug)]
pub struct MemoryConnector {
    slot: Mutex<Option<(Arc<MemoryTransport>, TransportEvents)>>,
    connected: Arc<AtomicBool>,
}

impl MemoryConnector {
    /// Creates a connector and the broker-side peer wired to it.
    pub fn pair() -> (Self, MemoryPeer) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let state = SharedReadyState::new(ReadyState::Connecting);
        let sessions = SharedSession::default();
        let connected = Arc::new(AtomicBool::new(false));

        let transport = Arc::new(MemoryTransport {
            sent: sent_tx,
            events: event_tx.clone(),
            state: state.clone(),
            sessions: sessions.clone(),
        });

        let connector = Self {
            slot: Mutex::new(Some((transport, event_rx))),
            connected: connected.clone(),
        };
        let peer = MemoryPeer {
            events: event_tx,
            sent: sent_rx,
            state,
            sessions,
            connected,
        };
        (connector, peer)
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, url: &Url) -> (Arc<dyn Transport>, TransportEvents) {
        let taken = self.slot.lock().ok().and_then(|mut slot| slot.take());
        match taken {
            Some((transport, events)) => {
                self.connected.store(true, Ordering::SeqCst);
                (transport, events)
            }
            None => {
                warn!(url = %url, "memory connector already used");
                let (sent, _) = mpsc::unbounded_channel();
                let (events_tx, events) = mpsc::unbounded_channel();
                let transport = Arc::new(MemoryTransport {
                    sent,
                    events: events_tx,
                    state: SharedReadyState::new(ReadyState::Closed),
                    sessions: SharedSession::default(),
                });
                (transport, events)
            }
        }
    }
}

/// Client side of an in-process socket.
#[derive(Debug)]
pub struct MemoryTransport {
    sent: mpsc::UnboundedSender<OutboundFrame>,
    events: mpsc::UnboundedSender<TransportEvent>,
    state: SharedReadyState,
    sessions: SharedSession,
}

impl Transport for MemoryTransport {
    fn send_frame(&self, frame: OutboundFrame) -> ClientResult<()> {
        self.sent.send(frame).map_err(|_| ClientError::ConnectionClosed)
    }

    fn session(&self) -> u64 {
        self.sessions.get()
    }

    fn ready_state(&self) -> ReadyState {
        self.state.get()
    }

    fn close(&self) {
        if self.state.get() == ReadyState::Closed {
            return;
        }
        self.state.set(ReadyState::Closed);
        let _ = self.events.send(TransportEvent::Close);
    }
}

/// Broker side of an in-process socket.
#[derive(Debug)]
pub struct MemoryPeer {
    events: mpsc::UnboundedSender<TransportEvent>,
    sent: mpsc::UnboundedReceiver<OutboundFrame>,
    state: SharedReadyState,
    sessions: SharedSession,
    connected: Arc<AtomicBool>,
}

impl MemoryPeer {
    /// Returns true once the client called `connect`.
    pub fn was_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Current ready state as seen by the client.
    pub fn ready_state(&self) -> ReadyState {
        self.state.get()
    }

    /// Opens the socket, starting a new session.
    pub fn open(&self) {
        self.sessions.advance();
        self.state.set(ReadyState::Open);
        let _ = self.events.send(TransportEvent::Open);
    }

    /// Delivers one text frame to the client.
    pub fn deliver(&self, text: impl Into<String>) {
        let _ = self.events.send(TransportEvent::Message(text.into()));
    }

    /// Delivers one JSON frame to the client.
    pub fn deliver_json(&self, value: &Value) {
        self.deliver(value.to_string());
    }

    /// Reports a transport error to the client.
    pub fn fail(&self, message: impl Into<String>) {
        let _ = self.events.send(TransportEvent::Error(message.into()));
    }

    /// Closes the socket from the broker side.
    pub fn close(&self) {
        self.state.set(ReadyState::Closed);
        let _ = self.events.send(TransportEvent::Close);
    }

    /// Number of client frames waiting to be read, stale ones included.
    pub fn queued(&self) -> usize {
        self.sent.len()
    }

    /// Waits for the next frame written by the client.
    pub async fn next_sent(&mut self) -> Option<String> {
        loop {
            let frame = self.sent.recv().await?;
            if let Some(text) = self.accept(frame) {
                return Some(text);
            }
        }
    }

    /// Waits for the next frame written by the client, parsed as JSON.
    pub async fn next_sent_json(&mut self) -> Option<Value> {
        let text = self.next_sent().await?;
        serde_json::from_str(&text).ok()
    }

    /// Returns a frame written by the client if one is queued.
    pub fn try_next_sent(&mut self) -> Option<String> {
        loop {
            let frame = self.sent.try_recv().ok()?;
            if let Some(text) = self.accept(frame) {
                return Some(text);
            }
        }
    }

    fn accept(&self, frame: OutboundFrame) -> Option<String> {
        let session = self.sessions.get();
        if frame.session != session {
            debug!(frame_session = frame.session, session, "stale frame discarded");
            return None;
        }
        Some(frame.text)
    }
}
