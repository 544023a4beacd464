//! JSON text codec for envelopes.
//!
//! The socket transport already frames messages, so one text frame maps to
//! exactly one JSON object and no length prefix is needed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ProtocolError, ProtocolResult};
use crate::types::{HandshakeReply, InboundEnvelope, MessageRef, WirePayload};
use crate::StreamFrame;

/// Wire shape of an inbound envelope before payload classification.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawInbound {
    #[serde(default)]
    message_id: Option<MessageRef>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default, rename = "replyToClientMessageId")]
    reply_to: Option<MessageRef>,
    #[serde(default, rename = "replyErrorToClientMessageId")]
    reply_error_to: Option<MessageRef>,
    #[serde(default)]
    message: Option<Value>,
}

/// Encodes an envelope as a JSON text frame.
///
/// # Example
///
/// ```rust
/// use octopus_protocol::{IdentityEnvelope, encode_envelope};
///
/// let text = encode_envelope(&IdentityEnvelope::new("g", Some("a".into()))).unwrap();
/// assert_eq!(text, r#"{"group":"g","name":"a"}"#);
/// ```
pub fn encode_envelope<T: Serialize>(envelope: &T) -> ProtocolResult<String> {
    Ok(serde_json::to_string(envelope)?)
}

fn parse_object(text: &str) -> ProtocolResult<Value> {
    if text.trim().is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }

    let value: Value = serde_json::from_str(text)?;
    if !value.is_object() {
        return Err(ProtocolError::NotAnObject {
            found: json_type_name(&value),
        });
    }
    Ok(value)
}

/// Decodes an inbound data envelope and classifies its payload.
pub fn decode_envelope(text: &str) -> ProtocolResult<InboundEnvelope> {
    let value = parse_object(text)?;
    let raw = RawInbound::deserialize(value)?;

    let data = raw.data.unwrap_or(Value::Null);
    let payload = match StreamFrame::from_value(&data) {
        Some(frame) => WirePayload::Stream(frame),
        None => WirePayload::Plain(data),
    };

    Ok(InboundEnvelope {
        message_id: raw.message_id,
        kind: raw.kind,
        payload,
        reply_to: raw.reply_to,
        reply_error_to: raw.reply_error_to,
        message: raw.message,
        raw: text.to_string(),
    })
}

/// Decodes the broker's answer to the identity envelope.
pub fn decode_handshake(text: &str) -> ProtocolResult<HandshakeReply> {
    let value = parse_object(text)?;
    Ok(HandshakeReply::deserialize(value)?)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DataEnvelope, EnvelopeKind, StreamStatus};
    use serde_json::json;

    #[test]
    fn decode_plain_publish() {
        let envelope = decode_envelope(r#"{"messageId":9,"type":"publish","data":{"x":1}}"#)
            .unwrap();
        assert_eq!(envelope.message_id, Some(MessageRef::Number(9)));
        assert_eq!(envelope.envelope_kind(), Some(EnvelopeKind::Publish));
        assert_eq!(envelope.payload, WirePayload::Plain(json!({"x": 1})));
        assert!(envelope.reply_to.is_none());
    }

    #[test]
    fn decode_missing_data_is_null() {
        let envelope = decode_envelope(r#"{"type":"publish"}"#).unwrap();
        assert_eq!(envelope.payload, WirePayload::Plain(Value::Null));
    }

    #[test]
    fn decode_response_correlation() {
        let envelope = decode_envelope(r#"{"replyToClientMessageId":4,"data":"pong"}"#).unwrap();
        assert_eq!(envelope.reply_to_client_message_id(), Some(4));
        assert_eq!(envelope.reply_error_to_client_message_id(), None);
    }

    #[test]
    fn decode_error_response_message() {
        let text = r#"{"replyErrorToClientMessageId":"5","message":"nope","data":{"code":1}}"#;
        let envelope = decode_envelope(text).unwrap();
        assert_eq!(envelope.reply_error_to_client_message_id(), Some(5));
        assert_eq!(envelope.error_message(), "nope");
    }

    #[test]
    fn error_message_falls_back_to_raw_frame() {
        let text = r#"{"replyErrorToClientMessageId":5}"#;
        let envelope = decode_envelope(text).unwrap();
        assert_eq!(envelope.error_message(), text);
    }

    #[test]
    fn decode_stream_frame_payload() {
        let text = r#"{"type":"publish","data":{"uuid":"t","streamType":"OctopusStream","streamStatus":"DATA","stream":"aGk="}}"#;
        let envelope = decode_envelope(text).unwrap();
        match envelope.payload {
            WirePayload::Stream(frame) => {
                assert_eq!(frame.uuid, "t");
                assert_eq!(frame.stream_status, StreamStatus::Data);
                assert_eq!(frame.chunk().unwrap(), b"hi");
            }
            other => panic!("expected stream payload, got {:?}", other),
        }
    }

    #[test]
    fn decode_rejects_non_json() {
        assert!(matches!(
            decode_envelope("not json"),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn decode_rejects_non_object() {
        assert!(matches!(
            decode_envelope("[1,2]"),
            Err(ProtocolError::NotAnObject { found: "array" })
        ));
    }

    #[test]
    fn decode_rejects_empty_frame() {
        assert!(matches!(decode_envelope("  "), Err(ProtocolError::EmptyMessage)));
    }

    #[test]
    fn unknown_type_is_preserved() {
        let envelope = decode_envelope(r#"{"type":"broadcast","data":1}"#).unwrap();
        assert_eq!(envelope.kind.as_deref(), Some("broadcast"));
        assert_eq!(envelope.envelope_kind(), None);
    }

    #[test]
    fn encode_then_decode_request() {
        let text = encode_envelope(&DataEnvelope::request("b", json!({"x": 1}), 2)).unwrap();
        let envelope = decode_envelope(&text).unwrap();
        assert!(envelope.is_request());
        assert_eq!(envelope.payload, WirePayload::Plain(json!({"x": 1})));
    }

    #[test]
    fn decode_handshake_ok() {
        let reply = decode_handshake(r#"{"status":"ok","identity":"a"}"#).unwrap();
        assert!(!reply.is_failure());
        assert_eq!(reply.identity.as_deref(), Some("a"));
    }
}
