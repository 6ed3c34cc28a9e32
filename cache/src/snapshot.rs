//! Latest-value store for depth projections and candles
//!
//! One writer per key (the owning connector's read loop), any number of
//! readers. Each entry is an `ArcSwap` handle: publishing swaps the pointer,
//! readers load an immutable `Arc` and use it without further coordination.
//! Entries never expire; freshness is read off `updated_at` by the caller.

use arc_swap::ArcSwap;
use common::{Depth, ExchangeName, Interval, Kline, MarketType};
use dashmap::DashMap;
use std::sync::Arc;

/// Process-wide store mapping `(exchange, market, symbol[, interval])` to the
/// latest published handle.
#[derive(Default)]
pub struct SnapshotCache {
    depths: DashMap<String, ArcSwap<Depth>>,
    klines: DashMap<String, ArcSwap<Kline>>,
}

/// Keys are composed venue-first so prefix scans stay possible. The format is
/// stable within a process lifetime.
fn depth_key(exchange: ExchangeName, market: MarketType, symbol: &str) -> String {
    format!("{exchange}:{market}:{symbol}")
}

fn kline_key(
    exchange: ExchangeName,
    market: MarketType,
    symbol: &str,
    interval: Interval,
) -> String {
    format!("{exchange}:{market}:{symbol}_{interval}")
}

impl SnapshotCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a depth projection. Readers observe either the previous handle
    /// or this one, never anything in between.
    pub fn set_depth(&self, depth: Depth) {
        let key = depth_key(depth.exchange, depth.market, &depth.symbol);
        let handle = Arc::new(depth);
        match self.depths.get(&key) {
            Some(entry) => entry.store(handle),
            None => {
                self.depths.insert(key, ArcSwap::from(handle));
            }
        }
    }

    /// Latest depth projection for a venue symbol, if one was ever published.
    #[must_use]
    pub fn depth(
        &self,
        exchange: ExchangeName,
        market: MarketType,
        symbol: &str,
    ) -> Option<Arc<Depth>> {
        self.depths
            .get(&depth_key(exchange, market, symbol))
            .map(|entry| entry.load_full())
    }

    /// Drop the depth entry for a symbol. Used when a symbol's book is marked
    /// failed, so readers see absence rather than stale data.
    pub fn remove_depth(&self, exchange: ExchangeName, market: MarketType, symbol: &str) {
        self.depths.remove(&depth_key(exchange, market, symbol));
    }

    /// Publish a candle, overwriting the single slot for its
    /// `(venue, symbol, interval)`. Only the most recent bar is retained.
    pub fn set_kline(&self, kline: Kline) {
        let key = kline_key(kline.exchange, kline.market, &kline.symbol, kline.interval);
        let handle = Arc::new(kline);
        match self.klines.get(&key) {
            Some(entry) => entry.store(handle),
            None => {
                self.klines.insert(key, ArcSwap::from(handle));
            }
        }
    }

    /// Latest candle for a venue symbol and interval.
    #[must_use]
    pub fn kline(
        &self,
        exchange: ExchangeName,
        market: MarketType,
        symbol: &str,
        interval: Interval,
    ) -> Option<Arc<Kline>> {
        self.klines
            .get(&kline_key(exchange, market, symbol, interval))
            .map(|entry| entry.load_full())
    }
}
