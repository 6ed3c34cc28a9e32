//! Process-wide market-data cache and subscription bookkeeping
//!
//! [`SnapshotCache`] stores the latest order-book projection and candle per
//! venue/symbol behind atomically swappable handles, so publishes are a
//! pointer swap and reads never lock. [`SubscriptionRegistry`] remembers
//! which symbols a connector *should* be subscribed to, independently of
//! whether its socket is currently up.

#![deny(warnings)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(dead_code)]
#![deny(unused)]
#![deny(missing_docs)]
#![forbid(unsafe_code)]

pub mod snapshot;
pub mod subscription;

pub use snapshot::SnapshotCache;
pub use subscription::SubscriptionRegistry;
