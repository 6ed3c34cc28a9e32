//! Real-time order book maintenance
//!
//! Reconciles a point-in-time REST snapshot with a continuous stream of
//! incremental updates under per-venue sequence-number rules: stale deltas
//! are dropped, sequence gaps trigger a rebuild from a fresh snapshot, and
//! memory stays bounded by pruning to the best levels. After every applied
//! delta an immutable sorted projection is published to the snapshot cache,
//! so readers never observe a half-applied book.

#![deny(warnings)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(dead_code)]
#![deny(unused)]
#![deny(missing_docs)]
#![forbid(unsafe_code)]

pub mod book;
pub mod engine;

pub use book::{ApplyOutcome, DepthUpdate, OrderBook, GAP_THRESHOLD, MAX_LEVELS};
pub use engine::{BookError, BookState, DepthEngine, SnapshotSource};
