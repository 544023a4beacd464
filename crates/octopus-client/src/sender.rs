//! Outbound stream transfers.
//!
//! Frames are queued on the router's command channel from the caller's
//! task, so one transfer's frames keep their order while other traffic may
//! interleave between them.
//!
//! Each `DATA` and `END` frame holds a slot of a per-transfer window until
//! it leaves the client or is discarded with its socket. A slow peer thus
//! stalls the source instead of buffering the whole transfer.

use std::sync::Arc;

use futures_util::StreamExt;
use octopus_protocol::{DataEnvelope, MessageRef, StreamFrame};
use serde_json::Value;
use tokio::sync::{Semaphore, mpsc};
use tracing::debug;

use crate::error::{ClientError, ClientResult};
use crate::router::Command;
use crate::stream::{ByteSource, OctopusStream};

/// Frames of one transfer allowed in flight between the caller and the socket.
pub(crate) const STREAM_WINDOW: usize = 8;

/// Where the frames of a transfer go.
#[derive(Debug, Clone)]
pub(crate) enum Route {
    /// Published to a name or group.
    Publish { to: String },
    /// Sent as responses to an inbound request.
    Reply { reply_to: MessageRef },
}

impl Route {
    /// Wraps one `data` value into the command for this route.
    pub(crate) fn command(&self, data: Value) -> Command {
        match self {
            Self::Publish { to } => Command::Publish {
                to: to.clone(),
                data,
            },
            Self::Reply { reply_to } => Command::Reply {
                reply_to: reply_to.clone(),
                data,
            },
        }
    }

    /// Builds the envelope carrying `data` on this route.
    pub(crate) fn envelope(self, data: Value, id: u64) -> DataEnvelope {
        match self {
            Self::Publish { to } => DataEnvelope::publish(to, data, id),
            Self::Reply { reply_to } => DataEnvelope::reply(reply_to, data, id),
        }
    }
}

/// Queues one command for the router.
pub(crate) fn dispatch(commands: &mpsc::UnboundedSender<Command>, command: Command) -> ClientResult<()> {
    commands.send(command).map_err(|_| ClientError::NotConnected)
}

/// Sends a whole transfer: `HEADER`, one `DATA` per chunk, then `END`.
///
/// Returns the transfer uuid. A source error aborts the transfer without
/// an `END` frame and is returned as is.
pub(crate) async fn send_stream(
    commands: &mpsc::UnboundedSender<Command>,
    route: &Route,
    mut stream: OctopusStream,
) -> ClientResult<String> {
    let source = stream.take_source()?;
    let uuid = stream.uuid().to_string();

    let header = StreamFrame::header(uuid.clone(), stream.extra().cloned());
    dispatch(commands, route.command(header.to_value()))?;
    pump(commands, route, &uuid, source).await?;
    Ok(uuid)
}

/// Sends the `DATA` and `END` frames of a transfer whose header is already
/// queued.
pub(crate) async fn pump(
    commands: &mpsc::UnboundedSender<Command>,
    route: &Route,
    uuid: &str,
    mut source: ByteSource,
) -> ClientResult<()> {
    let window = Arc::new(Semaphore::new(STREAM_WINDOW));
    let mut chunks = 0usize;
    let mut bytes = 0usize;

    while let Some(chunk) = source.next().await {
        let chunk = chunk?;
        chunks += 1;
        bytes += chunk.len();
        send_frame(commands, route, &window, StreamFrame::data(uuid, &chunk)).await?;
    }

    send_frame(commands, route, &window, StreamFrame::end(uuid)).await?;
    debug!(uuid = %uuid, chunks, bytes, "stream sent");
    Ok(())
}

/// Waits for a free slot in `window`, then queues `frame`.
async fn send_frame(
    commands: &mpsc::UnboundedSender<Command>,
    route: &Route,
    window: &Arc<Semaphore>,
    frame: StreamFrame,
) -> ClientResult<()> {
    let permit = window
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| ClientError::ConnectionClosed)?;
    dispatch(
        commands,
        Command::Frame {
            route: route.clone(),
            data: frame.to_value(),
            permit,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use octopus_protocol::StreamStatus;
    use std::io;

    fn frame_of(command: Command) -> (String, StreamFrame) {
        match command {
            Command::Publish { to, data } => (to, StreamFrame::from_value(&data).unwrap()),
            Command::Reply { reply_to, data } => {
                (reply_to.to_string(), StreamFrame::from_value(&data).unwrap())
            }
            Command::Frame { route, data, .. } => {
                let target = match route {
                    Route::Publish { to } => to,
                    Route::Reply { reply_to } => reply_to.to_string(),
                };
                (target, StreamFrame::from_value(&data).unwrap())
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[tokio::test]
    async fn sends_header_data_end() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let route = Route::Publish { to: "b".into() };
        let stream = OctopusStream::from_chunks(vec![b"ab".to_vec(), b"c".to_vec()])
            .with_uuid("t-1")
            .with_extra(serde_json::json!({"name": "f"}));

        let uuid = send_stream(&tx, &route, stream).await.unwrap();
        assert_eq!(uuid, "t-1");

        let (to, header) = frame_of(rx.try_recv().unwrap());
        assert_eq!(to, "b");
        assert_eq!(header.stream_status, StreamStatus::Header);
        assert_eq!(header.extra, Some(serde_json::json!({"name": "f"})));

        let (_, first) = frame_of(rx.try_recv().unwrap());
        assert_eq!(first.chunk().unwrap(), b"ab");
        let (_, second) = frame_of(rx.try_recv().unwrap());
        assert_eq!(second.chunk().unwrap(), b"c");

        let (_, end) = frame_of(rx.try_recv().unwrap());
        assert_eq!(end.stream_status, StreamStatus::End);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn reply_route_targets_request() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let route = Route::Reply {
            reply_to: MessageRef::Number(42),
        };
        send_stream(&tx, &route, OctopusStream::from_chunks(Vec::<Vec<u8>>::new()))
            .await
            .unwrap();

        let (reply_to, header) = frame_of(rx.try_recv().unwrap());
        assert_eq!(reply_to, "42");
        assert_eq!(header.stream_status, StreamStatus::Header);
        let (_, end) = frame_of(rx.try_recv().unwrap());
        assert_eq!(end.stream_status, StreamStatus::End);
    }

    #[tokio::test]
    async fn source_error_aborts_without_end() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let route = Route::Publish { to: "b".into() };
        let source = stream::iter(vec![
            Ok(b"ok".to_vec()),
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone")),
            Ok(b"never".to_vec()),
        ]);

        let err = send_stream(&tx, &route, OctopusStream::new(source))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Io(_)));

        let (_, header) = frame_of(rx.try_recv().unwrap());
        assert_eq!(header.stream_status, StreamStatus::Header);
        let (_, data) = frame_of(rx.try_recv().unwrap());
        assert_eq!(data.stream_status, StreamStatus::Data);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn consumed_stream_is_rejected() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let route = Route::Publish { to: "b".into() };
        let mut stream = OctopusStream::from_chunks(Vec::<Vec<u8>>::new());
        let _ = stream.take_source().unwrap();

        let err = send_stream(&tx, &route, stream).await.unwrap_err();
        assert!(matches!(err, ClientError::StreamNotReadable));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_router_reports_not_connected() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let route = Route::Publish { to: "b".into() };
        let err = send_stream(&tx, &route, OctopusStream::from_chunks(vec![b"x".to_vec()]))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NotConnected));
    }

    #[tokio::test]
    async fn unread_frames_stall_the_source() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let route = Route::Publish { to: "b".into() };
        let chunks = vec![b"x".to_vec(); STREAM_WINDOW * 4];
        let sending = tokio::spawn(async move {
            send_stream(&tx, &route, OctopusStream::from_chunks(chunks)).await
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!sending.is_finished());
        let mut held = Vec::new();
        while let Ok(command) = rx.try_recv() {
            held.push(command);
        }
        // The header plus one full window.
        assert_eq!(held.len(), STREAM_WINDOW + 1);

        // Dropping the held frames frees the window.
        drop(held);
        let mut data = 0;
        loop {
            let (_, frame) = frame_of(rx.recv().await.unwrap());
            match frame.stream_status {
                StreamStatus::Data => data += 1,
                StreamStatus::End => break,
                StreamStatus::Header => panic!("second header"),
            }
        }
        assert_eq!(data, STREAM_WINDOW * 3);
        assert!(sending.await.unwrap().is_ok());
    }
}
