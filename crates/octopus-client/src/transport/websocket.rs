//! Reconnecting WebSocket transport.
//!
//! One background task owns the socket. It reconnects after every close
//! with exponential backoff and jitter until [`Transport::close`] is called
//! or the retry budget runs out. Every frame is bound to the socket session
//! it was queued for; frames left over from a dropped socket are discarded
//! instead of leaking onto the next one.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use url::Url;

use super::{
    Connector, OutboundFrame, ReadyState, SharedReadyState, SharedSession, Transport,
    TransportEvent, TransportEvents,
};
use crate::error::{ClientError, ClientResult};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Reconnect policy.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt.
    pub min_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Delay multiplier between consecutive attempts.
    pub growth_factor: f64,
    /// Maximum jitter added to a delay (as fraction 0.0-1.0).
    pub jitter_fraction: f64,
    /// Time allowed for one connection attempt.
    pub connect_timeout: Duration,
    /// Consecutive failed attempts before giving up, `None` for no limit.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            growth_factor: 1.3,
            jitter_fraction: 0.1,
            connect_timeout: Duration::from_secs(4),
            max_retries: None,
        }
    }
}

impl ReconnectConfig {
    /// Builder: set delay bounds and growth.
    pub fn with_delays(mut self, min: Duration, max: Duration, growth_factor: f64) -> Self {
        self.min_delay = min;
        self.max_delay = max.max(min);
        self.growth_factor = growth_factor.max(1.0);
        self
    }

    /// Builder: set jitter fraction.
    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction.clamp(0.0, 1.0);
        self
    }

    /// Builder: set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Builder: set the retry budget.
    pub fn with_max_retries(mut self, max_retries: Option<u32>) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Calculates the delay before reconnect attempt number `attempt`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base = self.min_delay.as_secs_f64();
        let delay = base * self.growth_factor.powi(attempt as i32 - 1);
        let capped = delay.min(self.max_delay.as_secs_f64());
        let jitter = rand_jitter(capped * self.jitter_fraction);

        Duration::from_secs_f64((capped + jitter).max(0.0))
    }

    fn exhausted(&self, attempt: u32) -> bool {
        self.max_retries.is_some_and(|max| attempt > max)
    }
}

/// Simple pseudo-random jitter generator.
/// Uses the current time to generate a value in [-range, range].
fn rand_jitter(range: f64) -> f64 {
    use std::time::SystemTime;

    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();

    let fraction = (nanos as f64) / 1_000_000_000.0;
    (fraction * 2.0 - 1.0) * range
}

/// Opens [`WebSocketTransport`]s.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector {
    config: ReconnectConfig,
}

impl WebSocketConnector {
    /// Creates a connector with the given reconnect policy.
    pub fn new(config: ReconnectConfig) -> Self {
        Self { config }
    }
}

impl Connector for WebSocketConnector {
    fn connect(&self, url: &Url) -> (Arc<dyn Transport>, TransportEvents) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = SharedReadyState::new(ReadyState::Connecting);
        let sessions = SharedSession::default();

        let task = SocketTask {
            url: url.clone(),
            config: self.config.clone(),
            outbound: outbound_rx,
            events: event_tx,
            state: state.clone(),
            sessions: sessions.clone(),
            shutdown: shutdown_rx,
        };
        tokio::spawn(task.run());

        let transport = WebSocketTransport {
            outbound: outbound_tx,
            state,
            sessions,
            shutdown: shutdown_tx,
        };
        (Arc::new(transport), event_rx)
    }
}

/// Handle to a reconnecting WebSocket.
#[derive(Debug)]
pub struct WebSocketTransport {
    outbound: mpsc::UnboundedSender<OutboundFrame>,
    state: SharedReadyState,
    sessions: SharedSession,
    shutdown: watch::Sender<bool>,
}

impl Transport for WebSocketTransport {
    fn send_frame(&self, frame: OutboundFrame) -> ClientResult<()> {
        self.outbound
            .send(frame)
            .map_err(|_| ClientError::ConnectionClosed)
    }

    fn session(&self) -> u64 {
        self.sessions.get()
    }

    fn ready_state(&self) -> ReadyState {
        self.state.get()
    }

    fn close(&self) {
        if self.state.get() != ReadyState::Closed {
            self.state.set(ReadyState::Closing);
        }
        let _ = self.shutdown.send(true);
    }
}

/// How an open session ended.
enum SessionEnd {
    /// Remote close or socket error; reconnect.
    Dropped,
    /// Local close requested; stop.
    Shutdown,
}

struct SocketTask {
    url: Url,
    config: ReconnectConfig,
    outbound: mpsc::UnboundedReceiver<OutboundFrame>,
    events: mpsc::UnboundedSender<TransportEvent>,
    state: SharedReadyState,
    sessions: SharedSession,
    shutdown: watch::Receiver<bool>,
}

impl SocketTask {
    async fn run(mut self) {
        let mut attempt: u32 = 0;
        let mut announced_close = false;

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            self.state.set(ReadyState::Connecting);
            debug!(url = %self.url, attempt, "connecting");

            let connect = tokio::time::timeout(
                self.config.connect_timeout,
                connect_async(self.url.as_str()),
            );
            let result = tokio::select! {
                result = connect => result,
                _ = self.shutdown.changed() => break,
            };

            match result {
                Ok(Ok((socket, _response))) => {
                    attempt = 0;
                    let session = self.sessions.advance();
                    self.state.set(ReadyState::Open);
                    info!(url = %self.url, session, "socket open");
                    self.emit(TransportEvent::Open);

                    let end = self.session(socket, session).await;

                    self.state.set(ReadyState::Closed);
                    info!(url = %self.url, "socket closed");
                    self.emit(TransportEvent::Close);
                    announced_close = true;

                    if matches!(end, SessionEnd::Shutdown) {
                        break;
                    }
                    announced_close = false;
                    self.discard_stale(session);
                }
                Ok(Err(e)) => {
                    warn!(url = %self.url, error = %e, "connection attempt failed");
                    self.emit(TransportEvent::Error(e.to_string()));
                }
                Err(_) => {
                    warn!(
                        url = %self.url,
                        timeout_ms = self.config.connect_timeout.as_millis() as u64,
                        "connection attempt timed out"
                    );
                    self.emit(TransportEvent::Error("connection timeout".to_string()));
                }
            }

            attempt += 1;
            if self.config.exhausted(attempt) {
                warn!(url = %self.url, attempts = attempt, "giving up reconnecting");
                break;
            }

            self.state.set(ReadyState::Connecting);
            let delay = self.config.backoff_delay(attempt);
            debug!(delay_ms = delay.as_millis() as u64, "scheduling reconnect");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.changed() => break,
            }
        }

        self.state.set(ReadyState::Closed);
        if !announced_close {
            self.emit(TransportEvent::Close);
        }
        debug!(url = %self.url, "socket task stopped");
    }

    async fn session(&mut self, socket: Socket, session: u64) -> SessionEnd {
        let (mut sink, mut stream) = socket.split();

        loop {
            // Outbound first: frames queued before a close still go out.
            tokio::select! {
                biased;

                frame = self.outbound.recv() => match frame {
                    Some(frame) if frame.session != session => {
                        debug!(frame_session = frame.session, session, "stale frame discarded");
                    }
                    Some(frame) => {
                        // The permit stays held until the write completes.
                        if let Err(e) = sink.send(Message::Text(frame.text)).await {
                            warn!(error = %e, "failed to write frame");
                            self.emit(TransportEvent::Error(e.to_string()));
                            return SessionEnd::Dropped;
                        }
                    }
                    None => {
                        let _ = sink.close().await;
                        return SessionEnd::Shutdown;
                    }
                },
                incoming = stream.next() => match incoming {
                    Some(Ok(Message::Text(text))) => self.emit(TransportEvent::Message(text)),
                    Some(Ok(Message::Binary(bytes))) => {
                        let text = String::from_utf8_lossy(&bytes).into_owned();
                        self.emit(TransportEvent::Message(text));
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "peer closed socket");
                        return SessionEnd::Dropped;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "socket read failed");
                        self.emit(TransportEvent::Error(e.to_string()));
                        return SessionEnd::Dropped;
                    }
                    None => return SessionEnd::Dropped,
                },
                _ = self.shutdown.changed() => {
                    self.state.set(ReadyState::Closing);
                    let _ = sink.send(Message::Close(None)).await;
                    let _ = sink.close().await;
                    return SessionEnd::Shutdown;
                }
            }
        }
    }

    /// Drops the frames still queued for a socket that is gone.
    fn discard_stale(&mut self, session: u64) {
        let mut discarded = 0usize;
        while self.outbound.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            debug!(discarded, session, "frames of dropped socket discarded");
        }
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }
}
