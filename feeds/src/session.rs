//! Websocket session: socket ownership, deadlines, heartbeats
//!
//! A `Session` owns exactly one streaming socket. The write half sits behind
//! an async mutex held only across a single frame write; the read half is
//! handed to the owning read loop as a [`SessionReader`]. The read deadline
//! is implicit: every successful frame or heartbeat restarts it.
//!
//! Heartbeats are venue-specific and fully contained here — no other
//! component knows about them.

use crate::error::FeedError;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{interval_at, Instant, Interval};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Read deadline; frames and heartbeats both extend it.
pub const READ_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Deadline for a single frame write.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Inbound frame size cap.
pub const MAX_FRAME_BYTES: usize = 512 * 1024;

/// Cadence of client-initiated heartbeats.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

/// How a venue keeps its stream alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatPolicy {
    /// The server sends protocol pings; the session answers with pongs
    /// (Binance).
    ServerPing,
    /// The session periodically sends a bare text ping and swallows the
    /// matching pong (OKX, MEXC).
    ClientTextPing {
        /// Outbound ping payload
        ping: &'static str,
        /// Expected inbound pong payload
        pong: &'static str,
    },
    /// Application-level JSON heartbeat frames (Bybit, Gate).
    AppLevelPing {
        /// Frame sent on an interval, if the venue expects client pings
        outbound: Option<&'static str>,
        /// Substring identifying an inbound heartbeat frame
        inbound_marker: Option<&'static str>,
        /// Fixed reply to an inbound heartbeat, when one is required
        reply: Option<&'static str>,
    },
    /// TCP keepalive only.
    TcpOnly,
}

enum HeartbeatAction {
    Swallow,
    Reply(&'static str),
}

impl HeartbeatPolicy {
    fn ping_interval(self) -> Option<Duration> {
        match self {
            Self::ClientTextPing { .. } => Some(HEARTBEAT_INTERVAL),
            Self::AppLevelPing {
                outbound: Some(_), ..
            } => Some(HEARTBEAT_INTERVAL),
            _ => None,
        }
    }

    fn outbound(self) -> Option<&'static str> {
        match self {
            Self::ClientTextPing { ping, .. } => Some(ping),
            Self::AppLevelPing { outbound, .. } => outbound,
            _ => None,
        }
    }

    /// Decide whether a text frame is heartbeat traffic. Venue heartbeats
    /// come either as bare words or JSON-quoted strings; both are accepted.
    fn classify(self, text: &str) -> Option<HeartbeatAction> {
        match self {
            Self::ClientTextPing { ping, pong } => {
                let word = text.trim().trim_matches('"');
                if word == pong {
                    Some(HeartbeatAction::Swallow)
                } else if word == ping {
                    Some(HeartbeatAction::Reply(pong))
                } else {
                    None
                }
            }
            Self::AppLevelPing {
                inbound_marker: Some(marker),
                reply,
                ..
            } if text.contains(marker) => Some(match reply {
                Some(frame) => HeartbeatAction::Reply(frame),
                None => HeartbeatAction::Swallow,
            }),
            _ => None,
        }
    }
}

/// Read half of a connected session, owned by the connector's read loop.
pub struct SessionReader {
    stream: WsSource,
    ping_timer: Option<Interval>,
}

/// One streaming socket with serialized writes and policy-driven heartbeats.
pub struct Session {
    url: String,
    heartbeat: HeartbeatPolicy,
    writer: Mutex<Option<WsSink>>,
    connected: AtomicBool,
}

impl Session {
    /// Create a disconnected session for the given endpoint.
    pub fn new(url: String, heartbeat: HeartbeatPolicy) -> Self {
        Self {
            url,
            heartbeat,
            writer: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    /// Whether a socket is currently open.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Open the socket. Idempotent: when already connected this returns
    /// `Ok(None)` and the existing reader stays valid.
    ///
    /// The writer lock is not held across the dial; it guards single frame
    /// writes only.
    pub async fn connect(&self) -> Result<Option<SessionReader>, FeedError> {
        if self.writer.lock().await.is_some() {
            debug!(url = %self.url, "already connected, skipping dial");
            return Ok(None);
        }

        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(MAX_FRAME_BYTES);

        info!(url = %self.url, "connecting");
        let (stream, _) = connect_async_with_config(self.url.as_str(), Some(config), false)
            .await
            .map_err(|err| FeedError::Protocol(err.to_string()))?;
        let (sink, source) = stream.split();
        *self.writer.lock().await = Some(sink);
        self.connected.store(true, Ordering::Release);
        info!(url = %self.url, "connected");

        let ping_timer = self
            .heartbeat
            .ping_interval()
            .map(|period| interval_at(Instant::now() + period, period));
        Ok(Some(SessionReader {
            stream: source,
            ping_timer,
        }))
    }

    /// Serialize `frame` as JSON text and send it under the write deadline.
    pub async fn send(&self, frame: &Value) -> Result<(), FeedError> {
        self.send_text(frame.to_string()).await
    }

    async fn send_text(&self, text: String) -> Result<(), FeedError> {
        self.send_message(Message::Text(text)).await
    }

    async fn send_message(&self, message: Message) -> Result<(), FeedError> {
        let mut writer = self.writer.lock().await;
        let Some(sink) = writer.as_mut() else {
            return Err(FeedError::NotConnected);
        };
        match tokio::time::timeout(WRITE_TIMEOUT, sink.send(message)).await {
            Err(_) => Err(FeedError::Timeout),
            Ok(Err(err)) => Err(FeedError::Protocol(err.to_string())),
            Ok(Ok(())) => Ok(()),
        }
    }

    /// Read one application frame. Heartbeat traffic is handled internally
    /// and never surfaces; each heartbeat or frame extends the read
    /// deadline. Returns a classified error on close, idle timeout or
    /// protocol failure.
    pub async fn read(&self, reader: &mut SessionReader) -> Result<String, FeedError> {
        // only *received* traffic extends the deadline; our own outbound
        // pings must not mask a dead peer
        let mut deadline = Instant::now() + READ_IDLE_TIMEOUT;
        loop {
            let next = if let Some(timer) = reader.ping_timer.as_mut() {
                tokio::select! {
                    _ = timer.tick() => {
                        if let Some(frame) = self.heartbeat.outbound() {
                            self.send_text(frame.to_string()).await?;
                        }
                        continue;
                    }
                    next = tokio::time::timeout_at(deadline, reader.stream.next()) => next,
                }
            } else {
                tokio::time::timeout_at(deadline, reader.stream.next()).await
            };

            let message = match next {
                Err(_) => return Err(FeedError::Timeout),
                Ok(None) => return Err(FeedError::Closed),
                Ok(Some(Err(err))) => return Err(FeedError::Protocol(err.to_string())),
                Ok(Some(Ok(message))) => message,
            };
            deadline = Instant::now() + READ_IDLE_TIMEOUT;

            match message {
                Message::Text(text) => match self.heartbeat.classify(&text) {
                    Some(HeartbeatAction::Swallow) => {}
                    Some(HeartbeatAction::Reply(frame)) => {
                        self.send_text(frame.to_string()).await?;
                    }
                    None => return Ok(text),
                },
                Message::Ping(payload) => {
                    // protocol pings are answered regardless of policy
                    self.send_message(Message::Pong(payload)).await?;
                }
                Message::Pong(_) => {}
                Message::Close(frame) => {
                    debug!(?frame, "close frame received");
                    return Err(FeedError::Closed);
                }
                Message::Binary(payload) => {
                    debug!(len = payload.len(), "ignoring binary frame");
                }
                other => {
                    warn!(kind = ?other, "unexpected frame kind, skipping");
                }
            }
        }
    }

    /// Release the socket. Idempotent.
    pub async fn close(&self) {
        let mut writer = self.writer.lock().await;
        self.connected.store(false, Ordering::Release);
        if let Some(mut sink) = writer.take() {
            if let Err(err) = sink.close().await {
                debug!(error = %err, "error closing sink");
            }
        }
    }
}
