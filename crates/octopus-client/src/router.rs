//! Connection task.
//!
//! One task per client owns every piece of mutable connection state: the
//! identity, the message id counter, the pending request table, the open
//! inbound transfers and the outbox. Client handles talk to it through
//! [`Command`]s; the transport feeds it [`TransportEvent`]s. Both are
//! handled one at a time, so inbound envelopes are routed strictly in
//! arrival order.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use octopus_protocol::{
    DataEnvelope, MessageRef, StreamStatus, WirePayload, decode_envelope, decode_handshake,
    encode_envelope,
};
use serde_json::Value;
use tokio::sync::{OwnedSemaphorePermit, mpsc, oneshot, watch};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::correlation::CorrelationTable;
use crate::error::{ClientError, ClientResult};
use crate::event::{ClientEvent, IncomingRequest, Responder, State};
use crate::handshake::Identity;
use crate::reassembler::{FrameOutcome, Reassembler};
use crate::sender::Route;
use crate::stream::Received;
use crate::transport::{OutboundFrame, ReadyState, Transport, TransportEvent, TransportEvents};

/// Work queued for the connection task.
#[derive(Debug)]
pub(crate) enum Command {
    Publish {
        to: String,
        data: Value,
    },
    Request {
        to: String,
        data: Value,
        timeout: Option<Duration>,
        respond: oneshot::Sender<ClientResult<Received>>,
        /// Receives the `clientMessageId` once the request is registered.
        registered: Option<oneshot::Sender<u64>>,
    },
    Reply {
        reply_to: MessageRef,
        data: Value,
    },
    ReplyError {
        reply_to: MessageRef,
        message: String,
        data: Option<Value>,
    },
    /// One frame of an outbound transfer, holding a slot of its window.
    Frame {
        route: Route,
        data: Value,
        permit: OwnedSemaphorePermit,
    },
    /// Deadline of a pending request elapsed.
    Expire(u64),
    /// The caller gave up on a pending request; drop it without settling.
    Cancel(u64),
    /// Close the connection for good.
    Close,
}

/// An encoded envelope waiting for the handshake.
#[derive(Debug)]
struct Queued {
    id: u64,
    text: String,
    permit: Option<OwnedSemaphorePermit>,
}

pub(crate) struct Router {
    identity: Identity,
    identity_tx: watch::Sender<Identity>,
    next_message_id: u64,
    pending: CorrelationTable,
    transfers: Reassembler,
    outbox: VecDeque<Queued>,
    /// Socket session the identity and envelopes are written on.
    session: u64,
    transport: Arc<dyn Transport>,
    events: mpsc::UnboundedSender<ClientEvent>,
    commands: mpsc::WeakUnboundedSender<Command>,
    closing: bool,
}

impl Router {
    pub(crate) fn new(
        identity: Identity,
        identity_tx: watch::Sender<Identity>,
        transport: Arc<dyn Transport>,
        events: mpsc::UnboundedSender<ClientEvent>,
        commands: mpsc::WeakUnboundedSender<Command>,
    ) -> Self {
        Self {
            identity,
            identity_tx,
            next_message_id: 1,
            pending: CorrelationTable::new(),
            transfers: Reassembler::new(),
            outbox: VecDeque::new(),
            session: 0,
            transport,
            events,
            commands,
            closing: false,
        }
    }

    pub(crate) async fn run(
        mut self,
        mut command_rx: mpsc::UnboundedReceiver<Command>,
        mut transport_rx: TransportEvents,
    ) {
        debug!(group = self.identity.group(), "connection task started");

        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(Command::Close) => {
                        if self.close_requested() {
                            break;
                        }
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        info!("all client handles dropped, closing");
                        self.transport.close();
                        self.release();
                        break;
                    }
                },
                event = transport_rx.recv() => match event {
                    Some(TransportEvent::Close) => {
                        self.on_close();
                        if self.closing {
                            break;
                        }
                    }
                    Some(event) => self.handle_transport(event),
                    None => {
                        debug!("transport stopped");
                        self.release();
                        break;
                    }
                },
            }
        }

        debug!("connection task stopped");
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Publish { to, data } => {
                let id = self.next_id();
                self.dispatch(id, &DataEnvelope::publish(to, data, id), None);
            }
            Command::Request {
                to,
                data,
                timeout,
                respond,
                registered,
            } => {
                let id = self.next_id();
                let timer = timeout.map(|timeout| self.arm_timer(id, timeout));
                self.pending.register(id, respond, timer);
                if let Some(registered) = registered {
                    let _ = registered.send(id);
                }
                debug!(client_message_id = id, to = %to, "request registered");
                self.dispatch(id, &DataEnvelope::request(to, data, id), None);
            }
            Command::Reply { reply_to, data } => {
                let id = self.next_id();
                self.dispatch(id, &DataEnvelope::reply(reply_to, data, id), None);
            }
            Command::ReplyError {
                reply_to,
                message,
                data,
            } => {
                let id = self.next_id();
                self.dispatch(id, &DataEnvelope::reply_error(reply_to, message, data, id), None);
            }
            Command::Frame { route, data, permit } => {
                let id = self.next_id();
                self.dispatch(id, &route.envelope(data, id), Some(permit));
            }
            Command::Expire(id) => {
                if self.pending.expire(id) {
                    self.outbox.retain(|queued| queued.id != id);
                    debug!(client_message_id = id, "request timed out");
                }
            }
            Command::Cancel(id) => {
                if self.pending.cancel(id) {
                    self.outbox.retain(|queued| queued.id != id);
                }
            }
            Command::Close => {}
        }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_message_id;
        self.next_message_id += 1;
        id
    }

    fn arm_timer(&self, id: u64, timeout: Duration) -> AbortHandle {
        let commands = self.commands.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(commands) = commands.upgrade() {
                let _ = commands.send(Command::Expire(id));
            }
        });
        timer.abort_handle()
    }

    /// Sends a data envelope now, or queues it until the handshake succeeds.
    fn dispatch(&mut self, id: u64, envelope: &DataEnvelope, permit: Option<OwnedSemaphorePermit>) {
        let text = match encode_envelope(envelope) {
            Ok(text) => text,
            Err(e) => {
                warn!(client_message_id = id, error = %e, "failed to encode envelope");
                self.pending.reject(id, e.into());
                return;
            }
        };

        if !self.identity.is_identified() {
            debug!(client_message_id = id, "not identified yet, envelope queued");
            self.outbox.push_back(Queued { id, text, permit });
            return;
        }

        self.write(Queued { id, text, permit });
    }

    fn write(&mut self, queued: Queued) {
        let Queued { id, text, permit } = queued;
        let mut frame = OutboundFrame::new(self.session, text);
        if let Some(permit) = permit {
            frame = frame.with_permit(permit);
        }
        if let Err(e) = self.transport.send_frame(frame) {
            warn!(client_message_id = id, error = %e, "failed to send envelope");
            self.pending.reject(id, e);
        }
    }

    fn flush_outbox(&mut self) {
        if self.outbox.is_empty() {
            return;
        }
        debug!(queued = self.outbox.len(), "flushing outbox");
        while let Some(queued) = self.outbox.pop_front() {
            self.write(queued);
        }
    }

    /// Handles a user close. Returns true if the task can stop right away.
    fn close_requested(&mut self) -> bool {
        info!("close requested");
        self.closing = true;
        self.outbox.clear();
        self.pending.reject_all();

        // A transport that is already closed will not announce it again.
        let already_closed = self.transport.ready_state() == ReadyState::Closed;
        self.transport.close();
        if already_closed {
            self.release();
        }
        already_closed
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Open => self.on_open(),
            TransportEvent::Message(text) if self.identity.is_identified() => self.route(&text),
            TransportEvent::Message(text) => self.on_handshake(&text),
            TransportEvent::Error(message) => {
                warn!(error = %message, "transport error");
                self.emit(ClientEvent::Error(ClientError::Transport(message)));
            }
            TransportEvent::Close => self.on_close(),
        }
    }

    fn on_open(&mut self) {
        self.session += 1;
        let envelope = self.identity.envelope();
        info!(
            group = %envelope.group,
            name = ?envelope.name,
            session = self.session,
            "socket open, sending identity"
        );
        match encode_envelope(&envelope) {
            Ok(text) => {
                if let Err(e) = self.transport.send_frame(OutboundFrame::new(self.session, text)) {
                    warn!(error = %e, "failed to send identity");
                }
            }
            Err(e) => warn!(error = %e, "failed to encode identity"),
        }
    }

    fn on_handshake(&mut self, text: &str) {
        let reply = match decode_handshake(text) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "malformed handshake reply dropped");
                return;
            }
        };

        if let Err(e) = self.identity.accept(&reply) {
            warn!(error = %e, "identity rejected");
            self.emit(ClientEvent::Error(e));
            return;
        }

        self.identity_tx.send_replace(self.identity.clone());
        info!(
            group = self.identity.group(),
            name = ?self.identity.name(),
            "identified"
        );
        self.emit(ClientEvent::State(State::Open));
        self.emit(ClientEvent::Open);
        self.flush_outbox();
    }

    fn on_close(&mut self) {
        self.identity.reset();
        self.identity_tx.send_replace(self.identity.clone());

        // Envelopes still in the outbox never reached the wire and go out
        // after the next handshake.
        let queued: HashSet<u64> = self.outbox.iter().map(|queued| queued.id).collect();
        let rejected = self.pending.reject_all_except(|id| queued.contains(&id));
        let cut = self.transfers.abort_all();
        info!(
            rejected,
            cut_streams = cut,
            still_pending = self.pending.len(),
            "connection closed"
        );

        self.emit(ClientEvent::State(State::Closed));
        self.emit(ClientEvent::Close);
    }

    /// Fails everything still in flight before the task stops.
    fn release(&mut self) {
        self.outbox.clear();
        self.pending.reject_all();
        self.transfers.abort_all();
    }

    fn route(&mut self, text: &str) {
        let mut envelope = match decode_envelope(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "malformed envelope dropped");
                return;
            }
        };
        let payload = std::mem::replace(&mut envelope.payload, WirePayload::Plain(Value::Null));

        let data = match payload {
            WirePayload::Plain(value) => Received::Plain(value),
            // Continuation frames never surface on their own, whatever
            // envelope carries them.
            WirePayload::Stream(frame) if frame.stream_status != StreamStatus::Header => {
                self.transfers.apply(frame);
                return;
            }
            WirePayload::Stream(frame) => {
                if envelope.is_request() && envelope.message_id.is_none() {
                    warn!(uuid = %frame.uuid, "stream request without messageId dropped");
                    return;
                }
                match self.transfers.apply(frame) {
                    FrameOutcome::Opened(stream) => Received::Stream(stream),
                    _ => return,
                }
            }
        };

        if envelope.is_request() {
            let Some(message_id) = envelope.message_id.clone() else {
                warn!("request without messageId dropped");
                return;
            };
            debug!(message_id = %message_id, "request received");
            let responder = Responder::new(message_id, self.commands.clone());
            self.emit(ClientEvent::Request(IncomingRequest { data, responder }));
        } else if let Some(reply_to) = &envelope.reply_to {
            match reply_to.as_u64() {
                Some(id) => {
                    self.pending.resolve(id, data);
                }
                None => warn!(reply_to = %reply_to, "response with non-numeric correlation id dropped"),
            }
        } else if let Some(reply_error_to) = &envelope.reply_error_to {
            match reply_error_to.as_u64() {
                Some(id) => {
                    let data = match data {
                        Received::Plain(Value::Null) | Received::Stream(_) => None,
                        Received::Plain(value) => Some(value),
                    };
                    let error = ClientError::remote(envelope.error_message(), data);
                    self.pending.reject(id, error);
                }
                None => warn!(
                    reply_error_to = %reply_error_to,
                    "error response with non-numeric correlation id dropped"
                ),
            }
        } else {
            match data {
                Received::Plain(value) => self.emit(ClientEvent::Message(value)),
                Received::Stream(stream) => self.emit(ClientEvent::Stream(stream)),
            }
        }
    }

    fn emit(&self, event: ClientEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }
}
