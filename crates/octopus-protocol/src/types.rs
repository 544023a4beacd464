//! Envelope types exchanged between a client and the broker.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::StreamFrame;

/// Identity announced on every freshly opened socket.
///
/// This is the only outbound envelope without a `clientMessageId`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityEnvelope {
    /// Group to join.
    pub group: String,
    /// Requested unique name, `null` to let the broker pick one.
    pub name: Option<String>,
}

impl IdentityEnvelope {
    /// Creates an identity envelope.
    pub fn new(group: impl Into<String>, name: Option<String>) -> Self {
        Self {
            group: group.into(),
            name,
        }
    }
}

/// Semantics of a data envelope, carried in its `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    /// Expects a correlated response.
    Request,
    /// Answers an earlier request.
    Response,
    /// Fire-and-forget message.
    Publish,
}

impl EnvelopeKind {
    /// Returns the wire spelling of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
            Self::Publish => "publish",
        }
    }
}

/// Message identifier as it appears on the wire.
///
/// Brokers are free to use numbers or strings; both are echoed back verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageRef {
    /// Numeric identifier.
    Number(u64),
    /// Textual identifier.
    Text(String),
}

impl MessageRef {
    /// Interprets the identifier as a client message id.
    ///
    /// Numeric strings are accepted since some brokers stringify ids.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Number(id) => Some(*id),
            Self::Text(text) => text.trim().parse().ok(),
        }
    }
}

impl From<u64> for MessageRef {
    fn from(id: u64) -> Self {
        Self::Number(id)
    }
}

impl From<&str> for MessageRef {
    fn from(id: &str) -> Self {
        Self::Text(id.to_string())
    }
}

impl std::fmt::Display for MessageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(id) => write!(f, "{}", id),
            Self::Text(id) => f.write_str(id),
        }
    }
}

/// Outbound data envelope.
///
/// Exactly one of publish, request or response semantics applies, selected
/// by the constructor used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataEnvelope {
    /// Destination name or group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,

    /// Inbound message being answered successfully.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageRef>,

    /// Inbound message being answered with an error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_error_to: Option<MessageRef>,

    /// Envelope semantics.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<EnvelopeKind>,

    /// Application payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Error text, only on error responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Per-connection increasing identifier.
    pub client_message_id: u64,
}

impl DataEnvelope {
    /// Creates a fire-and-forget publish envelope.
    pub fn publish(to: impl Into<String>, data: Value, client_message_id: u64) -> Self {
        Self {
            to: Some(to.into()),
            reply_to: None,
            reply_error_to: None,
            kind: Some(EnvelopeKind::Publish),
            data: Some(data),
            message: None,
            client_message_id,
        }
    }

    /// Creates a request envelope.
    pub fn request(to: impl Into<String>, data: Value, client_message_id: u64) -> Self {
        Self {
            kind: Some(EnvelopeKind::Request),
            ..Self::publish(to, data, client_message_id)
        }
    }

    /// Creates a successful response to the inbound message `reply_to`.
    pub fn reply(reply_to: MessageRef, data: Value, client_message_id: u64) -> Self {
        Self {
            to: None,
            reply_to: Some(reply_to),
            reply_error_to: None,
            kind: Some(EnvelopeKind::Response),
            data: Some(data),
            message: None,
            client_message_id,
        }
    }

    /// Creates an error response to the inbound message `reply_to`.
    pub fn reply_error(
        reply_to: MessageRef,
        message: impl Into<String>,
        data: Option<Value>,
        client_message_id: u64,
    ) -> Self {
        Self {
            to: None,
            reply_to: None,
            reply_error_to: Some(reply_to),
            kind: Some(EnvelopeKind::Response),
            data,
            message: Some(message.into()),
            client_message_id,
        }
    }
}

/// Payload of an inbound envelope, classified once at decode time.
#[derive(Debug, Clone, PartialEq)]
pub enum WirePayload {
    /// Ordinary application data (`null` when the field was absent).
    Plain(Value),
    /// Stream control frame.
    Stream(StreamFrame),
}

/// Envelope received from the broker after the handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEnvelope {
    /// Broker-assigned identifier, used when replying to requests.
    pub message_id: Option<MessageRef>,
    /// Raw `type` field; unknown kinds are kept verbatim.
    pub kind: Option<String>,
    /// Classified payload.
    pub payload: WirePayload,
    /// `replyToClientMessageId` field.
    pub reply_to: Option<MessageRef>,
    /// `replyErrorToClientMessageId` field.
    pub reply_error_to: Option<MessageRef>,
    /// Error text accompanying an error response.
    pub message: Option<Value>,
    /// Original frame text.
    pub raw: String,
}

impl InboundEnvelope {
    /// Returns the envelope kind if it is one this protocol knows.
    pub fn envelope_kind(&self) -> Option<EnvelopeKind> {
        match self.kind.as_deref() {
            Some("request") => Some(EnvelopeKind::Request),
            Some("response") => Some(EnvelopeKind::Response),
            Some("publish") => Some(EnvelopeKind::Publish),
            _ => None,
        }
    }

    /// Returns true when the broker forwards a request to us.
    pub fn is_request(&self) -> bool {
        self.envelope_kind() == Some(EnvelopeKind::Request)
    }

    /// Correlation id of the request this envelope answers, if any.
    pub fn reply_to_client_message_id(&self) -> Option<u64> {
        self.reply_to.as_ref().and_then(MessageRef::as_u64)
    }

    /// Correlation id of the request this envelope fails, if any.
    pub fn reply_error_to_client_message_id(&self) -> Option<u64> {
        self.reply_error_to.as_ref().and_then(MessageRef::as_u64)
    }

    /// Error text for error responses, falling back to the raw frame.
    pub fn error_message(&self) -> String {
        match &self.message {
            Some(Value::String(text)) if !text.is_empty() => text.clone(),
            Some(Value::Null | Value::String(_)) | None => self.raw.clone(),
            Some(other) => other.to_string(),
        }
    }
}

/// Broker answer to an [`IdentityEnvelope`].
///
/// Fields of any JSON type are accepted; non-string values keep their JSON
/// text so a refusal is never lost to a type mismatch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeReply {
    /// `"ok"` or `"fail"`.
    #[serde(default, deserialize_with = "lenient_string")]
    pub status: Option<String>,
    /// Name assigned by the broker.
    #[serde(default, deserialize_with = "lenient_string")]
    pub identity: Option<String>,
    /// Reason given when the identity is refused.
    #[serde(default, deserialize_with = "lenient_string")]
    pub error_message: Option<String>,
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    })
}

impl HandshakeReply {
    /// Returns true if the broker refused the identity.
    pub fn is_failure(&self) -> bool {
        self.status.as_deref() == Some(crate::STATUS_FAIL)
    }

    /// Human-readable refusal reason.
    pub fn failure_reason(&self) -> &str {
        self.error_message.as_deref().unwrap_or("identity refused")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identity_serializes_null_name() {
        let identity = IdentityEnvelope::new("g", None);
        let json = serde_json::to_string(&identity).unwrap();
        assert_eq!(json, r#"{"group":"g","name":null}"#);
    }

    #[test]
    fn identity_serializes_name() {
        let identity = IdentityEnvelope::new("g", Some("a".to_string()));
        let json = serde_json::to_string(&identity).unwrap();
        assert_eq!(json, r#"{"group":"g","name":"a"}"#);
    }

    #[test]
    fn publish_envelope_shape() {
        let envelope = DataEnvelope::publish("b", json!({"x": 1}), 3);
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            json,
            json!({"to": "b", "type": "publish", "data": {"x": 1}, "clientMessageId": 3})
        );
    }

    #[test]
    fn request_envelope_shape() {
        let envelope = DataEnvelope::request("b", json!("ping"), 1);
        let json = serde_json::to_string(&envelope).unwrap();
        assert_eq!(
            json,
            r#"{"to":"b","type":"request","data":"ping","clientMessageId":1}"#
        );
    }

    #[test]
    fn reply_envelope_shape() {
        let envelope = DataEnvelope::reply(MessageRef::Number(42), json!("pong"), 7);
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            json,
            json!({"replyTo": 42, "type": "response", "data": "pong", "clientMessageId": 7})
        );
    }

    #[test]
    fn reply_error_envelope_omits_absent_data() {
        let envelope = DataEnvelope::reply_error(MessageRef::from("m-1"), "boom", None, 8);
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            json,
            json!({"replyErrorTo": "m-1", "type": "response", "message": "boom", "clientMessageId": 8})
        );
    }

    #[test]
    fn message_ref_accepts_numeric_strings() {
        assert_eq!(MessageRef::Number(5).as_u64(), Some(5));
        assert_eq!(MessageRef::from("12").as_u64(), Some(12));
        assert_eq!(MessageRef::from("abc").as_u64(), None);
    }

    #[test]
    fn message_ref_untagged_serde() {
        let parsed: MessageRef = serde_json::from_str("17").unwrap();
        assert_eq!(parsed, MessageRef::Number(17));
        let parsed: MessageRef = serde_json::from_str(r#""x-1""#).unwrap();
        assert_eq!(parsed, MessageRef::Text("x-1".to_string()));
    }

    #[test]
    fn handshake_failure_detection() {
        let reply: HandshakeReply =
            serde_json::from_str(r#"{"status":"fail","errorMessage":"name taken"}"#).unwrap();
        assert!(reply.is_failure());
        assert_eq!(reply.failure_reason(), "name taken");

        let reply: HandshakeReply =
            serde_json::from_str(r#"{"status":"ok","identity":"a"}"#).unwrap();
        assert!(!reply.is_failure());
        assert_eq!(reply.identity.as_deref(), Some("a"));
    }

    #[test]
    fn handshake_fields_of_other_types_keep_their_text() {
        let reply: HandshakeReply =
            serde_json::from_str(r#"{"status":"ok","identity":42,"errorMessage":null}"#).unwrap();
        assert_eq!(reply.identity.as_deref(), Some("42"));
        assert!(reply.error_message.is_none());

        let reply: HandshakeReply =
            serde_json::from_str(r#"{"status":"fail","errorMessage":{"code":3}}"#).unwrap();
        assert!(reply.is_failure());
        assert_eq!(reply.failure_reason(), r#"{"code":3}"#);
    }

    #[test]
    fn envelope_kind_wire_spelling() {
        assert_eq!(EnvelopeKind::Request.as_str(), "request");
        let kind: EnvelopeKind = serde_json::from_str(r#""response""#).unwrap();
        assert_eq!(kind, EnvelopeKind::Response);
    }
}
