//! Payload variants and stream handles.
//!
//! Whether a payload is a byte stream is decided once, by the variant the
//! caller passes in ([`Payload`]) or by the frame the broker delivers
//! ([`Received`]).

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use futures_util::stream::{self, BoxStream};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{ClientError, ClientResult};

/// Default chunk size when reading from an [`AsyncRead`].
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// One-shot source of byte chunks.
pub type ByteSource = BoxStream<'static, io::Result<Vec<u8>>>;

/// Outbound byte stream plus transfer metadata.
pub struct OctopusStream {
    uuid: String,
    extra: Option<Value>,
    source: Option<ByteSource>,
}

impl OctopusStream {
    /// Wraps a stream of chunks.
    pub fn new<S>(source: S) -> Self
    where
        S: Stream<Item = io::Result<Vec<u8>>> + Send + 'static,
    {
        Self {
            uuid: Uuid::new_v4().to_string(),
            extra: None,
            source: Some(Box::pin(source)),
        }
    }

    /// Wraps an in-memory list of chunks.
    pub fn from_chunks<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = Vec<u8>>,
        I::IntoIter: Send + 'static,
    {
        Self::new(stream::iter(chunks.into_iter().map(Ok)))
    }

    /// Reads `reader` in chunks of [`DEFAULT_CHUNK_SIZE`] bytes.
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self::from_reader_with_chunk_size(reader, DEFAULT_CHUNK_SIZE)
    }

    /// Reads `reader` in chunks of at most `chunk_size` bytes.
    pub fn from_reader_with_chunk_size<R>(reader: R, chunk_size: usize) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let chunk_size = chunk_size.max(1);
        let source = stream::unfold(Some(reader), move |reader| async move {
            let mut reader = reader?;
            let mut buffer = vec![0u8; chunk_size];
            match reader.read(&mut buffer).await {
                Ok(0) => None,
                Ok(n) => {
                    buffer.truncate(n);
                    Some((Ok(buffer), Some(reader)))
                }
                Err(e) => Some((Err(e), None)),
            }
        });
        Self::new(source)
    }

    /// Builder: reuse an existing transfer identifier.
    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = uuid.into();
        self
    }

    /// Builder: attach metadata sent with the header.
    pub fn with_extra(mut self, extra: Value) -> Self {
        self.extra = Some(extra);
        self
    }

    /// Transfer identifier.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Metadata sent with the header.
    pub fn extra(&self) -> Option<&Value> {
        self.extra.as_ref()
    }

    /// Returns false once the source has been handed to a sender.
    pub fn is_readable(&self) -> bool {
        self.source.is_some()
    }

    pub(crate) fn take_source(&mut self) -> ClientResult<ByteSource> {
        self.source.take().ok_or(ClientError::StreamNotReadable)
    }
}

impl fmt::Debug for OctopusStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OctopusStream")
            .field("uuid", &self.uuid)
            .field("extra", &self.extra)
            .field("readable", &self.is_readable())
            .finish()
    }
}

/// Payload handed to `publish`, `request` or a reply.
#[derive(Debug)]
pub enum Payload {
    /// JSON value sent in one envelope.
    Plain(Value),
    /// Byte stream sent as a chunked transfer.
    Stream(OctopusStream),
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::Plain(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Self::Plain(Value::String(value.to_string()))
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Self::Plain(Value::String(value))
    }
}

impl From<OctopusStream> for Payload {
    fn from(stream: OctopusStream) -> Self {
        Self::Stream(stream)
    }
}

/// Live inbound transfer.
///
/// Chunks arrive in order as the broker delivers them; the stream ends after
/// the `END` frame. A transfer cut short by a connection close ends with a
/// [`ClientError::ConnectionClosed`] item.
#[derive(Debug)]
pub struct InboundStream {
    uuid: String,
    extra: Option<Value>,
    chunks: mpsc::UnboundedReceiver<ClientResult<Vec<u8>>>,
}

impl InboundStream {
    pub(crate) fn new(
        uuid: String,
        extra: Option<Value>,
        chunks: mpsc::UnboundedReceiver<ClientResult<Vec<u8>>>,
    ) -> Self {
        Self {
            uuid,
            extra,
            chunks,
        }
    }

    /// Transfer identifier.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Metadata sent with the header.
    pub fn extra(&self) -> Option<&Value> {
        self.extra.as_ref()
    }

    /// Waits for the next chunk.
    pub async fn next_chunk(&mut self) -> Option<ClientResult<Vec<u8>>> {
        self.chunks.recv().await
    }

    /// Collects the whole transfer.
    pub async fn read_to_end(mut self) -> ClientResult<Vec<u8>> {
        let mut buffer = Vec::new();
        while let Some(chunk) = self.chunks.recv().await {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(buffer)
    }
}

impl Stream for InboundStream {
    type Item = ClientResult<Vec<u8>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().chunks.poll_recv(cx)
    }
}

/// Payload delivered by the broker.
#[derive(Debug)]
pub enum Received {
    /// JSON value.
    Plain(Value),
    /// Live byte stream.
    Stream(InboundStream),
}

impl Received {
    /// Borrows the JSON value, if this is not a stream.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Plain(value) => Some(value),
            Self::Stream(_) => None,
        }
    }

    /// Takes the JSON value, if this is not a stream.
    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Plain(value) => Some(value),
            Self::Stream(_) => None,
        }
    }

    /// Takes the stream handle, if this is a stream.
    pub fn into_stream(self) -> Option<InboundStream> {
        match self {
            Self::Plain(_) => None,
            Self::Stream(stream) => Some(stream),
        }
    }
}
