//! Envelope types and JSON codec for the Octopus messaging protocol.
//!
//! Clients join a named group over a persistent socket and exchange JSON
//! envelopes with a broker that resolves names within that group.
//!
//! # Protocol Overview
//!
//! Every WebSocket text frame carries exactly one JSON object:
//! - the first frame after the socket opens is an [`IdentityEnvelope`]
//! - the broker answers with a [`HandshakeReply`]
//! - everything afterwards is a [`DataEnvelope`] (outbound) or an
//!   [`InboundEnvelope`] (inbound)
//!
//! Byte streams travel as a `HEADER` / `DATA`* / `END` sequence of
//! [`StreamFrame`]s nested in the `data` field of ordinary envelopes.
//!
//! # Example
//!
//! ```rust
//! use octopus_protocol::{DataEnvelope, decode_envelope, encode_envelope};
//! use serde_json::json;
//!
//! let envelope = DataEnvelope::publish("b", json!({"x": 1}), 1);
//! let text = encode_envelope(&envelope).unwrap();
//! assert!(text.contains("\"clientMessageId\":1"));
//!
//! let inbound = decode_envelope(r#"{"replyToClientMessageId":1,"data":"pong"}"#).unwrap();
//! assert_eq!(inbound.reply_to_client_message_id(), Some(1));
//! ```

mod codec;
mod error;
mod stream;
mod types;

pub use codec::{decode_envelope, decode_handshake, encode_envelope};
pub use error::{ProtocolError, ProtocolResult};
pub use stream::{StreamFrame, StreamStatus, decode_chunk, encode_chunk};
pub use types::{
    DataEnvelope, EnvelopeKind, HandshakeReply, IdentityEnvelope, InboundEnvelope, MessageRef,
    WirePayload,
};

/// Value of `streamType` that marks a `data` object as a stream control frame.
pub const STREAM_TYPE: &str = "OctopusStream";

/// Handshake `status` value that signals the broker refused the identity.
pub const STATUS_FAIL: &str = "fail";

/// Default broker host.
pub const DEFAULT_HOST: &str = "localhost";

/// Default broker port.
pub const DEFAULT_PORT: u16 = 8899;
