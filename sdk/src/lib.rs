//! Public façade over the multi-venue feed engine
//!
//! Client code declares venues (exchange × market, with a weight) and
//! canonical trading pairs; the façade opens the streaming connections,
//! keeps books and candles current, and serves reads from the snapshot
//! cache, hiding per-venue symbol conventions entirely.

#![deny(warnings)]
#![deny(clippy::all)]

pub mod facade;
pub mod manager;

use common::{ExchangeName, MarketType, SymbolError};
use thiserror::Error;

pub use facade::{ExchangeConfig, Sdk, VENUE_PRIORITY};
pub use manager::Manager;

/// Failures surfaced to callers of the façade. Streaming problems never
/// appear here; they surface as absence of data in the cache.
#[derive(Debug, Error)]
pub enum SdkError {
    /// A subscribe call targeted a venue that was never added.
    #[error("venue {exchange} {market} is not registered")]
    VenueNotRegistered {
        /// Requested exchange
        exchange: ExchangeName,
        /// Requested market segment
        market: MarketType,
    },

    /// A synchronous fetch found no venue serving the market.
    #[error("no venue registered for market {0}")]
    NoVenueForMarket(MarketType),

    /// A canonical symbol string did not parse.
    #[error(transparent)]
    Symbol(#[from] SymbolError),

    /// A connector operation failed synchronously.
    #[error(transparent)]
    Feed(#[from] feeds::FeedError),

    /// A synchronous snapshot fetch failed.
    #[error(transparent)]
    Snapshot(#[from] book::BookError),

    /// Every configured venue failed to connect.
    #[error("all venue connections failed")]
    AllConnectionsFailed,
}
