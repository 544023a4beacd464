//! Public client handle.

use std::sync::Arc;
use std::time::Duration;

use octopus_protocol::{MessageRef, StreamFrame};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::config::ConnectOptions;
use crate::error::{ClientError, ClientResult};
use crate::event::{ClientEvent, ClientEvents, State};
use crate::handshake::Identity;
use crate::router::{Command, Router};
use crate::sender::{self, Route};
use crate::stream::{OctopusStream, Payload, Received};
use crate::transport::{Connector, Transport, WebSocketConnector};

/// Per-request options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Deadline for the response; `None` falls back to the client default.
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    /// Options with a response deadline.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }

    /// Options with a deadline given in milliseconds.
    ///
    /// Fails with [`ClientError::InvalidTimeout`] for negative values,
    /// before anything is sent.
    pub fn from_millis(millis: i64) -> ClientResult<Self> {
        let millis = u64::try_from(millis).map_err(|_| ClientError::InvalidTimeout)?;
        Ok(Self::with_timeout(Duration::from_millis(millis)))
    }
}

/// Handle to one group connection.
///
/// Cheap to clone; every clone drives the same connection. The connection
/// task stops once every handle is dropped or [`Client::close`] is called.
///
/// # Example
///
/// ```ignore
/// use octopus_client::{Client, ClientEvent, ConnectOptions};
///
/// let (client, mut events) = Client::connect(ConnectOptions::new("workers"));
/// while let Some(event) = events.recv().await {
///     if let ClientEvent::Open = event {
///         let answer = client.request("worker-2", "ping").await?;
///         println!("{:?}", answer.into_value());
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Client {
    commands: Option<mpsc::UnboundedSender<Command>>,
    transport: Option<Arc<dyn Transport>>,
    identity: Option<watch::Receiver<Identity>>,
    request_timeout: Option<Duration>,
}

impl Client {
    /// Connects over a reconnecting WebSocket.
    ///
    /// Must be called inside a tokio runtime.
    pub fn connect(options: ConnectOptions) -> (Self, ClientEvents) {
        let connector = WebSocketConnector::new(options.reconnect.clone());
        Self::connect_with(options, &connector)
    }

    /// Connects through any [`Connector`].
    ///
    /// Invalid options are reported as the first [`ClientEvent::Error`]; in
    /// that case the connector is never called and the client stays
    /// [`State::Disconnected`].
    pub fn connect_with(options: ConnectOptions, connector: &dyn Connector) -> (Self, ClientEvents) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let events = ClientEvents::new(event_rx);

        let prepared = Identity::from_options(&options)
            .and_then(|identity| options.url().map(|url| (identity, url)));
        let (identity, url) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(error = %e, "invalid connect options");
                let _ = event_tx.send(ClientEvent::Error(e));
                return (Self::disconnected(options.request_timeout), events);
            }
        };

        info!(url = %url, group = identity.group(), name = ?identity.name(), "connecting");
        let _ = event_tx.send(ClientEvent::State(State::Connecting));

        let (transport, transport_events) = connector.connect(&url);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (identity_tx, identity_rx) = watch::channel(identity.clone());

        let router = Router::new(
            identity,
            identity_tx,
            transport.clone(),
            event_tx,
            command_tx.downgrade(),
        );
        tokio::spawn(router.run(command_rx, transport_events));

        let client = Self {
            commands: Some(command_tx),
            transport: Some(transport),
            identity: Some(identity_rx),
            request_timeout: options.request_timeout,
        };
        (client, events)
    }

    fn disconnected(request_timeout: Option<Duration>) -> Self {
        Self {
            commands: None,
            transport: None,
            identity: None,
            request_timeout,
        }
    }

    fn commands(&self) -> ClientResult<&mpsc::UnboundedSender<Command>> {
        self.commands.as_ref().ok_or(ClientError::NotConnected)
    }

    /// Publishes a payload to a name or group. Fire-and-forget.
    pub async fn publish(&self, to: impl Into<String>, payload: impl Into<Payload>) -> ClientResult<()> {
        let commands = self.commands()?;
        let to = to.into();
        match payload.into() {
            Payload::Plain(data) => sender::dispatch(commands, Command::Publish { to, data }),
            Payload::Stream(stream) => sender::send_stream(commands, &Route::Publish { to }, stream)
                .await
                .map(|_| ()),
        }
    }

    /// Sends a request and waits for its response, using the client's
    /// default timeout.
    pub async fn request(&self, to: impl Into<String>, payload: impl Into<Payload>) -> ClientResult<Received> {
        self.request_with(to, payload, RequestOptions::default()).await
    }

    /// Sends a request and waits for its response.
    ///
    /// A stream payload is correlated through its `HEADER` frame; the rest
    /// of the transfer follows as publishes to the same destination.
    pub async fn request_with(
        &self,
        to: impl Into<String>,
        payload: impl Into<Payload>,
        options: RequestOptions,
    ) -> ClientResult<Received> {
        let commands = self.commands()?;
        let to = to.into();
        let timeout = options.timeout.or(self.request_timeout);
        let (respond, response) = oneshot::channel();

        match payload.into() {
            Payload::Plain(data) => sender::dispatch(
                commands,
                Command::Request {
                    to,
                    data,
                    timeout,
                    respond,
                    registered: None,
                },
            )?,
            Payload::Stream(mut stream) => {
                let source = stream.take_source()?;
                let uuid = stream.uuid().to_string();
                let header = StreamFrame::header(uuid.clone(), stream.extra().cloned());
                let (registered, header_id) = oneshot::channel();
                sender::dispatch(
                    commands,
                    Command::Request {
                        to: to.clone(),
                        data: header.to_value(),
                        timeout,
                        respond,
                        registered: Some(registered),
                    },
                )?;
                if let Err(e) = sender::pump(commands, &Route::Publish { to }, &uuid, source).await {
                    if let Ok(id) = header_id.await {
                        debug!(client_message_id = id, uuid = %uuid, "stream request aborted");
                        let _ = commands.send(Command::Cancel(id));
                    }
                    return Err(e);
                }
            }
        }

        response.await.unwrap_or(Err(ClientError::ConnectionClosed))
    }

    /// Sends a byte stream and returns its transfer id.
    ///
    /// With `is_reply` set, `destination` is the `messageId` of an inbound
    /// request and the frames go out as responses to it.
    pub async fn send_stream(
        &self,
        destination: impl Into<String>,
        stream: OctopusStream,
        is_reply: bool,
    ) -> ClientResult<String> {
        let commands = self.commands()?;
        let destination = destination.into();
        let route = if is_reply {
            let reply_to = destination
                .parse::<u64>()
                .map(MessageRef::Number)
                .unwrap_or(MessageRef::Text(destination));
            Route::Reply { reply_to }
        } else {
            Route::Publish { to: destination }
        };
        sender::send_stream(commands, &route, stream).await
    }

    /// Writes a raw text frame, bypassing envelopes and the handshake.
    pub fn send(&self, raw: impl Into<String>) -> ClientResult<()> {
        let transport = self.transport.as_ref().ok_or(ClientError::NotConnected)?;
        transport.send(raw.into())
    }

    /// Closes the connection for good.
    ///
    /// Pending requests fail with [`ClientError::ConnectionClosed`].
    pub fn close(&self) {
        if let Some(commands) = &self.commands {
            let _ = commands.send(Command::Close);
        }
    }

    /// Current connection state.
    pub fn state(&self) -> State {
        match &self.transport {
            Some(transport) => State::from(transport.ready_state()),
            None => State::Disconnected,
        }
    }

    /// Group joined by this client.
    pub fn group(&self) -> Option<String> {
        self.identity
            .as_ref()
            .map(|identity| identity.borrow().group().to_string())
    }

    /// Name of this client, local or broker-assigned.
    pub fn name(&self) -> Option<String> {
        self.identity
            .as_ref()
            .and_then(|identity| identity.borrow().name().map(str::to_string))
    }

    /// Returns true while the broker has accepted this client's identity.
    pub fn is_identified(&self) -> bool {
        self.identity
            .as_ref()
            .is_some_and(|identity| identity.borrow().is_identified())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::transport::{MemoryConnector, MemoryPeer};
    use octopus_protocol::StreamStatus;
    use serde_json::{Value, json};

    async fn open(options: ConnectOptions) -> (Client, ClientEvents, MemoryPeer) {
        let (connector, mut peer) = MemoryConnector::pair();
        let (client, mut events) = Client::connect_with(options, &connector);
        assert!(matches!(events.recv().await, Some(ClientEvent::State(State::Connecting))));

        peer.open();
        peer.next_sent().await.unwrap();
        peer.deliver_json(&json!({"status": "ok", "identity": "a"}));
        assert!(matches!(events.recv().await, Some(ClientEvent::State(State::Open))));
        assert!(matches!(events.recv().await, Some(ClientEvent::Open)));
        (client, events, peer)
    }

    async fn expect_error(options: ConnectOptions, code: ErrorCode) {
        let (connector, peer) = MemoryConnector::pair();
        let (client, mut events) = Client::connect_with(options, &connector);

        match events.recv().await {
            Some(ClientEvent::Error(e)) => assert_eq!(e.code(), Some(code)),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(events.recv().await.is_none());
        assert!(!peer.was_connected());
        assert_eq!(client.state(), State::Disconnected);
        assert!(client.group().is_none());
    }

    #[tokio::test]
    async fn validation_errors_skip_connect() {
        expect_error(ConnectOptions::default(), ErrorCode::GroupNotString).await;
        expect_error(ConnectOptions::new("  "), ErrorCode::GroupEmpty).await;
        expect_error(ConnectOptions::new("g").with_name(" "), ErrorCode::NameEmpty).await;
        expect_error(ConnectOptions::new("g").with_name("g"), ErrorCode::NameEqualsGroup).await;
    }

    #[tokio::test]
    async fn disconnected_client_rejects_calls() {
        let (connector, _peer) = MemoryConnector::pair();
        let (client, _events) = Client::connect_with(ConnectOptions::new(""), &connector);
        assert!(matches!(client.publish("b", "x").await, Err(ClientError::NotConnected)));
        assert!(matches!(client.request("b", "x").await, Err(ClientError::NotConnected)));
        assert!(matches!(client.send("raw"), Err(ClientError::NotConnected)));
        client.close();
    }

    #[tokio::test]
    async fn open_scenario() {
        let (client, _events, _peer) = open(ConnectOptions::new(" g ").with_name(" a ")).await;
        assert_eq!(client.group().as_deref(), Some("g"));
        assert_eq!(client.name().as_deref(), Some("a"));
        assert!(client.is_identified());
        assert_eq!(client.state(), State::Open);
    }

    #[tokio::test]
    async fn request_resolves_with_response() {
        let (client, _events, mut peer) = open(ConnectOptions::new("g").with_name("a")).await;

        let pending = tokio::spawn({
            let client = client.clone();
            async move { client.request("b", "ping").await }
        });
        let sent = peer.next_sent_json().await.unwrap();
        assert_eq!(sent["to"], "b");
        assert_eq!(sent["type"], "request");
        assert_eq!(sent["data"], "ping");

        peer.deliver_json(&json!({"replyToClientMessageId": sent["clientMessageId"], "data": "pong"}));
        let answer = pending.await.unwrap().unwrap();
        assert_eq!(answer.into_value(), Some(json!("pong")));
    }

    #[tokio::test(start_paused = true)]
    async fn request_timeout_rejects_with_e005() {
        let (client, _events, mut peer) = open(ConnectOptions::new("g").with_name("a")).await;

        let options = RequestOptions::from_millis(100).unwrap();
        let pending = tokio::spawn({
            let client = client.clone();
            async move { client.request_with("b", json!({"x": 1}), options).await }
        });
        peer.next_sent().await.unwrap();

        let err = pending.await.unwrap().unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn default_timeout_applies() {
        let options = ConnectOptions::new("g")
            .with_name("a")
            .with_request_timeout(Duration::from_millis(50));
        let (client, _events, _peer) = open(options).await;

        let err = client.request("b", "ping").await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout));
    }

    #[test]
    fn negative_timeout_is_invalid() {
        let err = RequestOptions::from_millis(-1).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::InvalidTimeout));
        assert_eq!(
            RequestOptions::from_millis(0).unwrap().timeout,
            Some(Duration::ZERO)
        );
    }

    #[tokio::test]
    async fn publish_sends_envelope() {
        let (client, _events, mut peer) = open(ConnectOptions::new("g").with_name("a")).await;
        client.publish("b", json!({"x": 1})).await.unwrap();
        assert_eq!(
            peer.next_sent_json().await,
            Some(json!({"to": "b", "type": "publish", "data": {"x": 1}, "clientMessageId": 1}))
        );
    }

    #[tokio::test]
    async fn raw_send_bypasses_envelopes() {
        let (client, _events, mut peer) = open(ConnectOptions::new("g").with_name("a")).await;
        client.send("hello").unwrap();
        assert_eq!(peer.next_sent().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn stream_round_trip_between_clients() {
        let (sender, _sender_events, mut sender_peer) = open(ConnectOptions::new("g").with_name("a")).await;
        let (_receiver, mut receiver_events, receiver_peer) =
            open(ConnectOptions::new("g").with_name("b")).await;

        let chunks = vec![b"one ".to_vec(), b"two ".to_vec(), b"three".to_vec()];
        let uuid = sender
            .send_stream("b", OctopusStream::from_chunks(chunks), false)
            .await
            .unwrap();

        // Relay every frame the sender wrote, as the broker would.
        for _ in 0..5 {
            let mut frame: Value = sender_peer.next_sent_json().await.unwrap();
            let data = frame["data"].take();
            receiver_peer.deliver_json(&json!({"type": "publish", "data": data}));
        }

        let stream = match receiver_events.recv().await {
            Some(ClientEvent::Stream(stream)) => stream,
            other => panic!("unexpected event {:?}", other),
        };
        assert_eq!(stream.uuid(), uuid);
        assert_eq!(stream.read_to_end().await.unwrap(), b"one two three");
        assert!(receiver_events.try_recv().is_none());
    }

    #[tokio::test]
    async fn stream_request_correlates_on_header() {
        let (client, _events, mut peer) = open(ConnectOptions::new("g").with_name("a")).await;

        let pending = tokio::spawn({
            let client = client.clone();
            async move {
                let stream = OctopusStream::from_chunks(vec![b"data".to_vec()]).with_uuid("up-1");
                client.request("b", stream).await
            }
        });

        let header = peer.next_sent_json().await.unwrap();
        assert_eq!(header["type"], "request");
        assert_eq!(header["data"]["streamStatus"], "HEADER");
        let data = peer.next_sent_json().await.unwrap();
        assert_eq!(data["type"], "publish");
        assert_eq!(data["data"]["streamStatus"], "DATA");
        let end = peer.next_sent_json().await.unwrap();
        assert_eq!(end["data"]["streamStatus"], "END");

        peer.deliver_json(&json!({"replyToClientMessageId": header["clientMessageId"], "data": "stored"}));
        let answer = pending.await.unwrap().unwrap();
        assert_eq!(answer.into_value(), Some(json!("stored")));
    }

    #[tokio::test]
    async fn failed_stream_request_cancels_its_header() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = Client {
            commands: Some(tx),
            transport: None,
            identity: None,
            request_timeout: None,
        };
        let source = futures_util::stream::iter(vec![
            Ok(b"ok".to_vec()),
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone")),
        ]);
        let pending = tokio::spawn(async move { client.request("b", OctopusStream::new(source)).await });

        match rx.recv().await {
            Some(Command::Request {
                registered: Some(registered),
                ..
            }) => registered.send(7).unwrap(),
            other => panic!("unexpected command {:?}", other),
        }
        assert!(matches!(rx.recv().await, Some(Command::Frame { .. })));
        assert!(matches!(rx.recv().await, Some(Command::Cancel(7))));
        assert!(matches!(pending.await.unwrap(), Err(ClientError::Io(_))));
    }

    #[tokio::test]
    async fn slow_peer_bounds_queued_stream_frames() {
        let (client, _events, mut peer) = open(ConnectOptions::new("g").with_name("a")).await;
        let chunks = vec![vec![7u8; 4 * 1024]; 256];
        let sending = tokio::spawn({
            let client = client.clone();
            async move { client.publish("b", OctopusStream::from_chunks(chunks)).await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!sending.is_finished());
        let queued = peer.queued();
        assert!(queued >= 1);
        assert!(queued <= sender::STREAM_WINDOW + 1, "{} frames queued", queued);

        let mut data = 0;
        loop {
            let sent = peer.next_sent_json().await.unwrap();
            match StreamFrame::from_value(&sent["data"]).unwrap().stream_status {
                StreamStatus::Header => {}
                StreamStatus::Data => data += 1,
                StreamStatus::End => break,
            }
        }
        assert_eq!(data, 256);
        sending.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn send_stream_as_reply() {
        let (client, _events, mut peer) = open(ConnectOptions::new("g").with_name("a")).await;
        client
            .send_stream("12", OctopusStream::from_chunks(Vec::<Vec<u8>>::new()), true)
            .await
            .unwrap();

        let header = peer.next_sent_json().await.unwrap();
        assert_eq!(header["replyTo"], 12);
        assert_eq!(header["type"], "response");
        let frame = StreamFrame::from_value(&header["data"]).unwrap();
        assert_eq!(frame.stream_status, StreamStatus::Header);
    }

    #[tokio::test]
    async fn close_fails_pending_requests() {
        let (client, mut events, mut peer) = open(ConnectOptions::new("g").with_name("a")).await;

        let pending = tokio::spawn({
            let client = client.clone();
            async move { client.request("b", "ping").await }
        });
        peer.next_sent().await.unwrap();
        client.close();

        let err = pending.await.unwrap().unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::ConnectionClosed));
        assert!(matches!(events.recv().await, Some(ClientEvent::State(State::Closed))));
        assert!(matches!(events.recv().await, Some(ClientEvent::Close)));
        assert_eq!(client.state(), State::Closed);
        assert!(!client.is_identified());
    }

    #[tokio::test]
    async fn reconnect_restarts_handshake() {
        let (client, mut events, mut peer) = open(ConnectOptions::new("g")).await;
        assert_eq!(client.name().as_deref(), Some("a"));
        client.publish("b", json!(1)).await.unwrap();
        assert_eq!(peer.next_sent_json().await.unwrap()["clientMessageId"], 1);

        peer.close();
        assert!(matches!(events.recv().await, Some(ClientEvent::State(State::Closed))));
        assert!(matches!(events.recv().await, Some(ClientEvent::Close)));

        peer.open();
        // The adopted name is announced on the next handshake.
        assert_eq!(
            peer.next_sent_json().await,
            Some(json!({"group": "g", "name": "a"}))
        );
        peer.deliver_json(&json!({"status": "ok", "identity": "a"}));
        assert!(matches!(events.recv().await, Some(ClientEvent::State(State::Open))));

        // Ids keep counting across reconnects.
        client.publish("b", json!(2)).await.unwrap();
        let sent = peer.next_sent_json().await.unwrap();
        assert_eq!(sent["clientMessageId"], 2);
    }

    #[tokio::test]
    async fn talks_to_a_websocket_broker() {
        use futures_util::{SinkExt, StreamExt};
        use tokio_tungstenite::tungstenite::Message;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let broker = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();
            let identity = match socket.next().await {
                Some(Ok(Message::Text(text))) => serde_json::from_str::<Value>(&text).unwrap(),
                other => panic!("unexpected frame {:?}", other),
            };
            assert_eq!(identity, json!({"group": "g", "name": "a"}));
            socket
                .send(Message::Text(json!({"status": "ok", "identity": "a"}).to_string()))
                .await
                .unwrap();

            let request = match socket.next().await {
                Some(Ok(Message::Text(text))) => serde_json::from_str::<Value>(&text).unwrap(),
                other => panic!("unexpected frame {:?}", other),
            };
            assert_eq!(request["type"], "request");
            socket
                .send(Message::Text(
                    json!({"replyToClientMessageId": request["clientMessageId"], "data": "pong"})
                        .to_string(),
                ))
                .await
                .unwrap();
        });

        let options = ConnectOptions::new("g")
            .with_name("a")
            .with_host("127.0.0.1")
            .with_port(port);
        let (client, mut events) = Client::connect(options);
        loop {
            match events.recv().await {
                Some(ClientEvent::Open) => break,
                Some(ClientEvent::Error(e)) => panic!("connect failed: {}", e),
                Some(_) => continue,
                None => panic!("events ended"),
            }
        }

        let answer = client.request("b", "ping").await.unwrap();
        assert_eq!(answer.into_value(), Some(json!("pong")));
        broker.await.unwrap();
        client.close();
    }
}
