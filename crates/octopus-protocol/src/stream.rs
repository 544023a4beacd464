//! Stream control frames.
//!
//! A byte stream is carried as one `HEADER` frame, any number of `DATA`
//! frames and a terminal `END` frame, all sharing a transfer `uuid`:
//!
//! ```text
//! {"uuid":"..","streamType":"OctopusStream","streamStatus":"HEADER","extra":{..}}
//! {"uuid":"..","streamType":"OctopusStream","streamStatus":"DATA","stream":"<base64>"}
//! {"uuid":"..","streamType":"OctopusStream","streamStatus":"END"}
//! ```

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::STREAM_TYPE;
use crate::error::{ProtocolError, ProtocolResult};

/// Position of a frame within a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StreamStatus {
    /// Opens a transfer and carries its metadata.
    Header,
    /// Carries one chunk.
    Data,
    /// Terminates the transfer.
    End,
}

/// Stream control frame nested in an envelope's `data` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamFrame {
    /// Transfer identifier shared by every frame of one stream.
    pub uuid: String,
    /// Always [`STREAM_TYPE`].
    pub stream_type: String,
    /// Frame position.
    pub stream_status: StreamStatus,
    /// Application metadata, sent with the header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
    /// Encoded chunk, sent with data frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<Value>,
}

impl StreamFrame {
    fn new(uuid: impl Into<String>, stream_status: StreamStatus) -> Self {
        Self {
            uuid: uuid.into(),
            stream_type: STREAM_TYPE.to_string(),
            stream_status,
            extra: None,
            stream: None,
        }
    }

    /// Creates a header frame.
    pub fn header(uuid: impl Into<String>, extra: Option<Value>) -> Self {
        Self {
            extra,
            ..Self::new(uuid, StreamStatus::Header)
        }
    }

    /// Creates a data frame carrying `chunk`.
    pub fn data(uuid: impl Into<String>, chunk: &[u8]) -> Self {
        Self {
            stream: Some(encode_chunk(chunk)),
            ..Self::new(uuid, StreamStatus::Data)
        }
    }

    /// Creates an end frame.
    pub fn end(uuid: impl Into<String>) -> Self {
        Self::new(uuid, StreamStatus::End)
    }

    /// Recognises a stream frame inside an envelope `data` value.
    ///
    /// Returns `None` for anything that is not tagged with [`STREAM_TYPE`]
    /// or does not carry the mandatory frame fields.
    pub fn from_value(value: &Value) -> Option<Self> {
        let tagged = value
            .get("streamType")
            .and_then(Value::as_str)
            .is_some_and(|kind| kind == STREAM_TYPE);
        if !tagged {
            return None;
        }
        Self::deserialize(value).ok()
    }

    /// Converts the frame into an envelope `data` value.
    pub fn to_value(&self) -> Value {
        // Every field is a string, enum or JSON value, so this cannot fail.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Decodes the chunk carried by a data frame.
    ///
    /// Frames without a chunk yield an empty buffer.
    pub fn chunk(&self) -> ProtocolResult<Vec<u8>> {
        match &self.stream {
            Some(value) => decode_chunk(value),
            None => Ok(Vec::new()),
        }
    }
}

/// Encodes chunk bytes for the `stream` field.
pub fn encode_chunk(bytes: &[u8]) -> Value {
    Value::String(STANDARD.encode(bytes))
}

/// Decodes a `stream` field back into bytes.
///
/// Accepts base64 strings, plain byte arrays and Node's
/// `{"type":"Buffer","data":[..]}` form.
pub fn decode_chunk(value: &Value) -> ProtocolResult<Vec<u8>> {
    match value {
        Value::String(text) => STANDARD
            .decode(text)
            .map_err(|e| ProtocolError::InvalidChunk(e.to_string())),
        Value::Array(items) => bytes_from_array(items),
        Value::Object(map) => match (map.get("type").and_then(Value::as_str), map.get("data")) {
            (Some("Buffer"), Some(Value::Array(items))) => bytes_from_array(items),
            _ => Err(ProtocolError::InvalidChunk(
                "object chunk is not a Buffer".to_string(),
            )),
        },
        other => Err(ProtocolError::InvalidChunk(format!(
            "unsupported chunk encoding: {}",
            other
        ))),
    }
}

fn bytes_from_array(items: &[Value]) -> ProtocolResult<Vec<u8>> {
    items
        .iter()
        .map(|item| {
            item.as_u64()
                .and_then(|n| u8::try_from(n).ok())
                .ok_or_else(|| ProtocolError::InvalidChunk(format!("not a byte: {}", item)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn header_frame_shape() {
        let frame = StreamFrame::header("t-1", Some(json!({"name": "a.txt"})));
        assert_eq!(
            frame.to_value(),
            json!({
                "uuid": "t-1",
                "streamType": "OctopusStream",
                "streamStatus": "HEADER",
                "extra": {"name": "a.txt"}
            })
        );
    }

    #[test]
    fn data_frame_carries_base64() {
        let frame = StreamFrame::data("t-1", b"hello");
        assert_eq!(frame.stream, Some(json!("aGVsbG8=")));
        assert_eq!(frame.chunk().unwrap(), b"hello");
    }

    #[test]
    fn end_frame_has_no_payload() {
        let frame = StreamFrame::end("t-1");
        assert_eq!(
            serde_json::to_string(&frame).unwrap(),
            r#"{"uuid":"t-1","streamType":"OctopusStream","streamStatus":"END"}"#
        );
    }

    #[test]
    fn from_value_requires_stream_type() {
        assert!(StreamFrame::from_value(&json!({"uuid": "x", "streamStatus": "DATA"})).is_none());
        assert!(
            StreamFrame::from_value(&json!({
                "uuid": "x",
                "streamType": "Other",
                "streamStatus": "DATA"
            }))
            .is_none()
        );
        assert!(StreamFrame::from_value(&json!("plain")).is_none());
    }

    #[test]
    fn from_value_rejects_unknown_status() {
        let value = json!({"uuid": "x", "streamType": "OctopusStream", "streamStatus": "PAUSE"});
        assert!(StreamFrame::from_value(&value).is_none());
    }

    #[test]
    fn decode_node_buffer_chunk() {
        let value = json!({"type": "Buffer", "data": [104, 105]});
        assert_eq!(decode_chunk(&value).unwrap(), b"hi");
    }

    #[test]
    fn decode_array_chunk() {
        assert_eq!(decode_chunk(&json!([1, 2, 255])).unwrap(), vec![1, 2, 255]);
    }

    #[test]
    fn decode_rejects_out_of_range_bytes() {
        assert!(matches!(
            decode_chunk(&json!([256])),
            Err(ProtocolError::InvalidChunk(_))
        ));
        assert!(decode_chunk(&json!("not base64!")).is_err());
        assert!(decode_chunk(&json!(12)).is_err());
    }
}
