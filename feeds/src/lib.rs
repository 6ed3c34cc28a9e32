//! Streaming feed connectors for the supported venues
//!
//! Organized structure:
//! - session: socket ownership, deadlines and heartbeat policies
//! - venue/: per-venue codecs and REST snapshot clients
//! - connector: read loop wiring frames into the book engine and cache
//! - reconnect: backoff schedule for session recovery

#![deny(warnings)]
#![deny(clippy::all)]

pub mod candle;
pub mod connector;
pub mod error;
pub mod reconnect;
pub mod session;
pub mod venue;

pub use connector::Connector;
pub use error::FeedError;
pub use reconnect::Backoff;
pub use session::{HeartbeatPolicy, Session, SessionReader};
pub use venue::{connector_for, VenueCodec, VenueEvent};
