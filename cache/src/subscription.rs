//! Declared subscription intent, tracked per connector
//!
//! The registry is the single source of truth for what a connector should be
//! subscribed to; the session layer is stateless about intent. Diff-style
//! returns keep subscribe/unsubscribe frames idempotent on the wire: callers
//! only send frames for symbols that actually changed state.

use common::Interval;
use parking_lot::RwLock;
use std::collections::BTreeSet;

#[derive(Default)]
struct Inner {
    kline_symbols: BTreeSet<String>,
    depth_symbols: BTreeSet<String>,
}

/// Subscription intent for one connector: which symbols want candles, which
/// want depth. Symbols are canonicalized to upper case on entry. The candle
/// interval is fixed at one minute for every symbol.
#[derive(Default)]
pub struct SubscriptionRegistry {
    inner: RwLock<Inner>,
}

impl SubscriptionRegistry {
    /// Candle interval applied to every kline subscription.
    pub const INTERVAL: Interval = Interval::Min1;

    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add symbols to the kline channel. Returns only the symbols that were
    /// newly added, in input order.
    pub fn add_kline(&self, symbols: &[String]) -> Vec<String> {
        let mut inner = self.inner.write();
        symbols
            .iter()
            .map(|s| s.to_uppercase())
            .filter(|s| inner.kline_symbols.insert(s.clone()))
            .collect()
    }

    /// Add symbols to the depth channel. Returns only the symbols that were
    /// newly added, in input order.
    pub fn add_depth(&self, symbols: &[String]) -> Vec<String> {
        let mut inner = self.inner.write();
        symbols
            .iter()
            .map(|s| s.to_uppercase())
            .filter(|s| inner.depth_symbols.insert(s.clone()))
            .collect()
    }

    /// Add symbols to both channels at once. Returns the symbols newly added
    /// to at least one channel.
    pub fn add_all(&self, symbols: &[String]) -> Vec<String> {
        let mut inner = self.inner.write();
        symbols
            .iter()
            .map(|s| s.to_uppercase())
            .filter(|s| {
                let kline_new = inner.kline_symbols.insert(s.clone());
                let depth_new = inner.depth_symbols.insert(s.clone());
                kline_new || depth_new
            })
            .collect()
    }

    /// Remove symbols from the connector's scope entirely. A removed symbol
    /// leaves **both** the kline and the depth channel, even if the caller
    /// only meant one of them; this mirrors the upstream behavior and is a
    /// known sharp edge. Returns the symbols that were actually subscribed
    /// somewhere.
    pub fn remove(&self, symbols: &[String]) -> Vec<String> {
        let mut inner = self.inner.write();
        symbols
            .iter()
            .map(|s| s.to_uppercase())
            .filter(|s| {
                let had_kline = inner.kline_symbols.remove(s);
                let had_depth = inner.depth_symbols.remove(s);
                had_kline || had_depth
            })
            .collect()
    }

    /// Current intent as `(kline_symbols, depth_symbols)`. Used to rebuild
    /// the subscribe frame after a reconnect.
    #[must_use]
    pub fn snapshot(&self) -> (Vec<String>, Vec<String>) {
        let inner = self.inner.read();
        (
            inner.kline_symbols.iter().cloned().collect(),
            inner.depth_symbols.iter().cloned().collect(),
        )
    }

    /// True when neither channel has any symbols.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let inner = self.inner.read();
        inner.kline_symbols.is_empty() && inner.depth_symbols.is_empty()
    }

    /// Forget all intent.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.kline_symbols.clear();
        inner.depth_symbols.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn syms(items: &[&str]) -> Vec<String> {
        items.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn add_kline_returns_only_new_symbols() {
        let reg = SubscriptionRegistry::new();
        assert_eq!(reg.add_kline(&syms(&["BTC", "ETH"])), syms(&["BTC", "ETH"]));
        assert_eq!(reg.add_kline(&syms(&["ETH", "BNB"])), syms(&["BNB"]));
        assert_eq!(reg.add_kline(&syms(&["ETH"])), Vec::<String>::new());
    }

    #[test]
    fn channels_are_disjoint() {
        let reg = SubscriptionRegistry::new();
        reg.add_kline(&syms(&["BTCUSDT"]));
        assert_eq!(reg.add_depth(&syms(&["BTCUSDT"])), syms(&["BTCUSDT"]));

        let (kline, depth) = reg.snapshot();
        assert_eq!(kline, syms(&["BTCUSDT"]));
        assert_eq!(depth, syms(&["BTCUSDT"]));
    }

    #[test]
    fn symbols_upper_cased_on_entry() {
        let reg = SubscriptionRegistry::new();
        reg.add_kline(&syms(&["btcusdt"]));
        assert_eq!(reg.add_kline(&syms(&["BTCUSDT"])), Vec::<String>::new());
        let (kline, _) = reg.snapshot();
        assert_eq!(kline, syms(&["BTCUSDT"]));
    }

    #[test]
    fn remove_silences_both_channels() {
        let reg = SubscriptionRegistry::new();
        reg.add_kline(&syms(&["BTCUSDT", "ETHUSDT"]));
        reg.add_depth(&syms(&["BTCUSDT"]));

        assert_eq!(reg.remove(&syms(&["BTCUSDT", "XRPUSDT"])), syms(&["BTCUSDT"]));
        let (kline, depth) = reg.snapshot();
        assert_eq!(kline, syms(&["ETHUSDT"]));
        assert!(depth.is_empty());
    }

    #[test]
    fn add_all_touches_both_channels() {
        let reg = SubscriptionRegistry::new();
        reg.add_depth(&syms(&["BTCUSDT"]));
        assert_eq!(reg.add_all(&syms(&["BTCUSDT", "ETHUSDT"])), syms(&["BTCUSDT", "ETHUSDT"]));
        let (kline, depth) = reg.snapshot();
        assert_eq!(kline, syms(&["BTCUSDT", "ETHUSDT"]));
        assert_eq!(depth, syms(&["BTCUSDT", "ETHUSDT"]));
    }

    #[test]
    fn clear_empties_everything() {
        let reg = SubscriptionRegistry::new();
        reg.add_all(&syms(&["BTCUSDT"]));
        assert!(!reg.is_empty());
        reg.clear();
        assert!(reg.is_empty());
    }
}
