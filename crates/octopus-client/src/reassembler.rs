//! Inbound stream reassembly.
//!
//! Transfers are keyed by uuid. A `HEADER` opens one and hands the
//! application an [`InboundStream`]; `DATA` frames append to it in arrival
//! order; `END` finishes it and forgets the uuid. Frames for a uuid without
//! a header are dropped.

use std::collections::HashMap;

use octopus_protocol::{StreamFrame, StreamStatus};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};
use crate::stream::InboundStream;

type ChunkSink = mpsc::UnboundedSender<ClientResult<Vec<u8>>>;

/// What a frame did to the reassembler.
#[derive(Debug)]
pub(crate) enum FrameOutcome {
    /// A new transfer started; the handle goes to the application.
    Opened(InboundStream),
    /// A chunk was appended.
    Appended,
    /// The transfer finished.
    Finished,
    /// The frame referenced no open transfer.
    Unknown,
}

/// In-progress inbound transfers of one connection.
#[derive(Debug, Default)]
pub(crate) struct Reassembler {
    transfers: HashMap<String, ChunkSink>,
}

impl Reassembler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Applies one stream control frame.
    pub(crate) fn apply(&mut self, frame: StreamFrame) -> FrameOutcome {
        match frame.stream_status {
            StreamStatus::Header => FrameOutcome::Opened(self.open(frame)),
            StreamStatus::Data => self.append(&frame),
            StreamStatus::End => self.finish(&frame.uuid),
        }
    }

    fn open(&mut self, frame: StreamFrame) -> InboundStream {
        let (sink, chunks) = mpsc::unbounded_channel();
        if self.transfers.insert(frame.uuid.clone(), sink).is_some() {
            warn!(uuid = %frame.uuid, "duplicate stream header, previous transfer abandoned");
        }
        debug!(uuid = %frame.uuid, "stream opened");
        InboundStream::new(frame.uuid, frame.extra, chunks)
    }

    fn append(&mut self, frame: &StreamFrame) -> FrameOutcome {
        let Some(sink) = self.transfers.get(&frame.uuid) else {
            debug!(uuid = %frame.uuid, "data for unknown stream dropped");
            return FrameOutcome::Unknown;
        };

        let item = frame.chunk().map_err(|e| {
            warn!(uuid = %frame.uuid, error = %e, "undecodable stream chunk");
            ClientError::from(e)
        });
        if sink.send(item).is_err() {
            debug!(uuid = %frame.uuid, "stream reader gone, chunk discarded");
        }
        FrameOutcome::Appended
    }

    fn finish(&mut self, uuid: &str) -> FrameOutcome {
        match self.transfers.remove(uuid) {
            Some(_) => {
                debug!(uuid = %uuid, "stream finished");
                FrameOutcome::Finished
            }
            None => {
                debug!(uuid = %uuid, "end for unknown stream dropped");
                FrameOutcome::Unknown
            }
        }
    }

    /// Terminates every open transfer with [`ClientError::ConnectionClosed`].
    pub(crate) fn abort_all(&mut self) -> usize {
        let count = self.transfers.len();
        for (uuid, sink) in self.transfers.drain() {
            debug!(uuid = %uuid, "stream cut short by close");
            let _ = sink.send(Err(ClientError::ConnectionClosed));
        }
        count
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.transfers.len()
    }
}
