//! Feed error taxonomy
//!
//! Transient network failures tear down the session (the reconnector takes
//! over); everything else is logged and skipped at the call site.

use thiserror::Error;

/// Classified failure inside a connector.
#[derive(Debug, Error)]
pub enum FeedError {
    /// An operation needed a socket but none is open.
    #[error("websocket not connected")]
    NotConnected,

    /// The peer closed the stream.
    #[error("websocket closed by peer")]
    Closed,

    /// The read deadline elapsed without a frame or heartbeat.
    #[error("websocket read timed out")]
    Timeout,

    /// The transport or frame layer misbehaved.
    #[error("websocket protocol error: {0}")]
    Protocol(String),

    /// A frame was received but could not be decoded.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// A REST request failed.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
}
