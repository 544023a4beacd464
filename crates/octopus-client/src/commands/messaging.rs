//! One-shot messaging commands: publish, request and send-file.

use std::path::Path;

use serde_json::{Value, json};
use tracing::info;

use crate::client::{Client, RequestOptions};
use crate::error::ClientResult;
use crate::stream::{OctopusStream, Received};

/// Publish `data` to `to`.
pub async fn publish(client: &Client, to: &str, data: Value) -> ClientResult<()> {
    client.publish(to, data).await?;
    info!(to = %to, "published");
    Ok(())
}

/// Send a request and print the response as one JSON line.
pub async fn request(
    client: &Client,
    to: &str,
    data: Value,
    timeout_ms: Option<i64>,
) -> ClientResult<()> {
    let options = match timeout_ms {
        Some(millis) => RequestOptions::from_millis(millis)?,
        None => RequestOptions::default(),
    };
    let response = client.request_with(to, data, options).await?;
    println!("{}", render(response).await?);
    Ok(())
}

/// Stream a file to `to` and print its transfer id.
pub async fn send_file(
    client: &Client,
    to: &str,
    path: &Path,
    extra: Option<Value>,
) -> ClientResult<()> {
    let file = tokio::fs::File::open(path).await?;
    let mut stream = OctopusStream::from_reader(file);
    let extra = extra.unwrap_or_else(|| {
        json!({
            "filename": path.file_name().map(|name| name.to_string_lossy().into_owned()),
        })
    });
    stream = stream.with_extra(extra);

    let uuid = client.send_stream(to, stream, false).await?;
    info!(to = %to, uuid = %uuid, path = %path.display(), "file sent");
    println!("{}", uuid);
    Ok(())
}

/// Renders a received payload as JSON.
///
/// Streams are drained; only their id, metadata and size are shown.
pub async fn render(received: Received) -> ClientResult<Value> {
    match received {
        Received::Plain(value) => Ok(value),
        Received::Stream(stream) => {
            let uuid = stream.uuid().to_string();
            let extra = stream.extra().cloned();
            let bytes = stream.read_to_end().await?;
            Ok(json!({
                "uuid": uuid,
                "extra": extra,
                "bytes": bytes.len(),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectOptions;
    use crate::error::ClientError;
    use crate::event::{ClientEvent, ClientEvents};
    use crate::transport::{MemoryConnector, MemoryPeer};
    use std::io::Write;

    async fn open() -> (Client, ClientEvents, MemoryPeer) {
        let (connector, mut peer) = MemoryConnector::pair();
        let (client, mut events) =
            Client::connect_with(ConnectOptions::new("g").with_name("cli"), &connector);
        peer.open();
        peer.next_sent().await.unwrap();
        peer.deliver_json(&json!({"status": "ok", "identity": "cli"}));
        while let Some(event) = events.recv().await {
            if let ClientEvent::Open = event {
                break;
            }
        }
        (client, events, peer)
    }

    #[tokio::test]
    async fn render_plain_passes_through() {
        let value = render(Received::Plain(json!({"a": 1}))).await.unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[tokio::test]
    async fn publish_writes_envelope() {
        let (client, _events, mut peer) = open().await;
        publish(&client, "b", json!("hi")).await.unwrap();

        let sent = peer.next_sent_json().await.unwrap();
        assert_eq!(sent["to"], "b");
        assert_eq!(sent["data"], "hi");
        assert_eq!(sent["type"], "publish");
    }

    #[tokio::test]
    async fn request_rejects_negative_timeout() {
        let (client, _events, _peer) = open().await;
        let err = request(&client, "b", json!(1), Some(-5)).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidTimeout));
    }

    #[tokio::test]
    async fn send_file_streams_contents() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"file body").unwrap();

        let (client, _events, mut peer) = open().await;
        send_file(&client, "b", file.path(), Some(json!({"kind": "test"})))
            .await
            .unwrap();

        let header = peer.next_sent_json().await.unwrap();
        assert_eq!(header["data"]["streamStatus"], "HEADER");
        assert_eq!(header["data"]["extra"], json!({"kind": "test"}));

        let data = peer.next_sent_json().await.unwrap();
        assert_eq!(data["data"]["streamStatus"], "DATA");
        let end = peer.next_sent_json().await.unwrap();
        assert_eq!(end["data"]["streamStatus"], "END");
        assert_eq!(end["data"]["uuid"], header["data"]["uuid"]);
    }

    #[tokio::test]
    async fn send_file_missing_path_is_io_error() {
        let (client, _events, _peer) = open().await;
        let err = send_file(&client, "b", Path::new("/definitely/not/here"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Io(_)));
    }
}
