//! The user-facing entry point

use crate::{Manager, SdkError};
use cache::SnapshotCache;
use common::{Depth, ExchangeName, Kline, MarketType, Symbol};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Fixed venue order used by priority reads: the first venue with data wins.
pub const VENUE_PRIORITY: [ExchangeName; 5] = [
    ExchangeName::Binance,
    ExchangeName::Okx,
    ExchangeName::Bybit,
    ExchangeName::Gate,
    ExchangeName::Mexc,
];

/// One venue declaration: exchange, market segment and weight. Weight zero
/// removes the venue and tears its connector down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeConfig {
    /// Exchange to connect to
    pub exchange: ExchangeName,
    /// Market segment to serve
    pub market: MarketType,
    /// Non-zero weight registers or updates; zero removes
    pub weight: u32,
}

/// Multi-venue market-data handle. Declare venues and canonical pairs, start
/// the streams, then read books and candles without caring which venue or
/// symbol convention served them.
pub struct Sdk {
    manager: Manager,
    symbols: RwLock<Vec<Symbol>>,
    cancel: CancellationToken,
}

impl Default for Sdk {
    fn default() -> Self {
        Self::new()
    }
}

impl Sdk {
    /// Fresh instance with no venues and no symbols.
    pub fn new() -> Self {
        let cancel = CancellationToken::new();
        Self {
            manager: Manager::new(cancel.child_token()),
            symbols: RwLock::new(Vec::new()),
            cancel,
        }
    }

    /// The shared snapshot cache, for embedders that read it directly.
    pub fn cache(&self) -> Arc<SnapshotCache> {
        self.manager.cache()
    }

    /// Add, update or remove a venue. Weight zero tears the connector down;
    /// adding an existing venue with the same weight is a no-op.
    pub async fn add_exchange(&self, config: ExchangeConfig) -> Result<(), SdkError> {
        if config.weight == 0 {
            match self.manager.remove_connector(config.exchange, config.market).await {
                Ok(()) | Err(SdkError::VenueNotRegistered { .. }) => return Ok(()),
                Err(err) => return Err(err),
            }
        }
        match self.manager.weight(config.exchange, config.market) {
            Some(weight) if weight == config.weight => Ok(()),
            Some(_) => self
                .manager
                .update_weight(config.exchange, config.market, config.weight),
            None => {
                self.manager
                    .add_connector(config.exchange, config.market, config.weight);
                Ok(())
            }
        }
    }

    /// Add several venues at once.
    pub async fn add_exchanges(&self, configs: &[ExchangeConfig]) -> Result<(), SdkError> {
        for config in configs {
            self.add_exchange(*config).await?;
        }
        Ok(())
    }

    /// Remove a venue; sugar for a zero-weight [`Sdk::add_exchange`].
    pub async fn remove_exchange(
        &self,
        exchange: ExchangeName,
        market: MarketType,
    ) -> Result<(), SdkError> {
        self.add_exchange(ExchangeConfig {
            exchange,
            market,
            weight: 0,
        })
        .await
    }

    /// Whether a venue is currently registered.
    pub fn is_exchange_active(&self, exchange: ExchangeName, market: MarketType) -> bool {
        self.manager.weight(exchange, market).is_some()
    }

    /// Registered venue declarations.
    pub fn exchange_configs(&self) -> Vec<ExchangeConfig> {
        self.manager
            .configs()
            .into_iter()
            .map(|(exchange, market, weight)| ExchangeConfig {
                exchange,
                market,
                weight,
            })
            .collect()
    }

    /// Declare canonical pairs (`BASE/QUOTE` or `BASE/QUOTE:MARGIN`); the
    /// market segment is inferred per pair. Unparsable entries are skipped
    /// with a warning.
    pub fn add_symbols(&self, symbols: &[&str]) {
        let mut declared = self.symbols.write();
        for raw in symbols {
            match Symbol::parse(raw) {
                Ok(symbol) => {
                    if !declared.contains(&symbol) {
                        declared.push(symbol);
                    }
                }
                Err(err) => warn!(symbol = raw, error = %err, "skipping bad symbol"),
            }
        }
    }

    /// Declared canonical pairs.
    pub fn symbols(&self) -> Vec<Symbol> {
        self.symbols.read().clone()
    }

    /// Convenience one-shot: declare pairs, start every configured venue and
    /// issue one batched kline + depth subscription per connector for the
    /// pairs matching its market.
    pub async fn add_symbols_and_subscribe(&self, symbols: &[&str]) -> Result<(), SdkError> {
        self.add_symbols(symbols);
        self.start().await?;

        let declared = self.symbols();
        for connector in self.manager.connectors() {
            let formatted: Vec<String> = declared
                .iter()
                .filter(|symbol| symbol.market == connector.market())
                .map(|symbol| symbol.format_for(connector.exchange()))
                .collect();
            if formatted.is_empty() {
                continue;
            }
            info!(
                exchange = %connector.exchange(),
                market = %connector.market(),
                symbols = ?formatted,
                "batch subscribing"
            );
            if let Err(err) = connector.subscribe_kline(&formatted).await {
                warn!(exchange = %connector.exchange(), error = %err, "kline subscribe failed");
            }
            if let Err(err) = connector.subscribe_depth(&formatted).await {
                warn!(exchange = %connector.exchange(), error = %err, "depth subscribe failed");
            }
        }
        Ok(())
    }

    /// Connect every registered venue and spawn its read loop. Partial
    /// failure is tolerated; an error means no venue connected at all.
    pub async fn start(&self) -> Result<(), SdkError> {
        self.manager.start_all().await
    }

    /// Subscribe candles for venue-formatted symbols on an explicit venue.
    pub async fn subscribe_kline(
        &self,
        exchange: ExchangeName,
        market: MarketType,
        symbols: &[String],
    ) -> Result<(), SdkError> {
        self.manager.subscribe_kline(exchange, market, symbols).await
    }

    /// Subscribe depth for venue-formatted symbols on an explicit venue.
    pub async fn subscribe_depth(
        &self,
        exchange: ExchangeName,
        market: MarketType,
        symbols: &[String],
    ) -> Result<(), SdkError> {
        self.manager.subscribe_depth(exchange, market, symbols).await
    }

    /// Unsubscribe symbols on an explicit venue. Removal is scope-wide: the
    /// symbols leave both the kline and the depth channel.
    pub async fn unsubscribe(
        &self,
        exchange: ExchangeName,
        market: MarketType,
        symbols: &[String],
    ) -> Result<(), SdkError> {
        self.manager.unsubscribe(exchange, market, symbols).await
    }

    /// Latest candle for a canonical pair, trying venues in
    /// [`VENUE_PRIORITY`] order.
    pub fn watch_kline(&self, symbol: &str) -> Option<Arc<Kline>> {
        let parsed = match Symbol::parse(symbol) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(symbol, error = %err, "bad canonical symbol");
                return None;
            }
        };
        VENUE_PRIORITY.iter().find_map(|exchange| {
            self.manager
                .watch_kline(*exchange, parsed.market, &parsed.format_for(*exchange))
        })
    }

    /// Latest depth for a canonical pair, trying venues in
    /// [`VENUE_PRIORITY`] order.
    pub fn watch_depth(&self, symbol: &str) -> Option<Arc<Depth>> {
        let parsed = match Symbol::parse(symbol) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(symbol, error = %err, "bad canonical symbol");
                return None;
            }
        };
        VENUE_PRIORITY.iter().find_map(|exchange| {
            self.manager
                .watch_depth(*exchange, parsed.market, &parsed.format_for(*exchange))
        })
    }

    /// Fetch a depth snapshot synchronously over REST from the first
    /// registered venue serving `market`, caching the result.
    pub async fn fetch_depth(
        &self,
        market: MarketType,
        base: &str,
        quote: &str,
        limit: u32,
    ) -> Result<Depth, SdkError> {
        let symbol = Symbol::from_parts(base, quote, market);
        self.manager
            .fetch_depth(
                &VENUE_PRIORITY,
                market,
                |exchange| symbol.format_for(exchange),
                limit,
            )
            .await
    }

    /// Stop every read loop and reconnect timer. Published cache entries
    /// stay readable until the process exits.
    pub fn shutdown(&self) {
        info!("shutting down");
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::{Interval, PriceLevel};
    use rust_decimal_macros::dec;

    fn depth(exchange: ExchangeName, symbol: &str, bid: rust_decimal::Decimal) -> Depth {
        Depth {
            exchange,
            market: MarketType::Spot,
            symbol: symbol.to_string(),
            bids: vec![PriceLevel::new(bid, dec!(1))],
            asks: vec![PriceLevel::new(bid + dec!(1), dec!(1))],
            updated_at: Utc::now(),
            last_update_id: "1".to_string(),
        }
    }

    fn kline(exchange: ExchangeName, symbol: &str, close: rust_decimal::Decimal) -> Kline {
        Kline {
            exchange,
            market: MarketType::Spot,
            symbol: symbol.to_string(),
            interval: Interval::Min1,
            open_time: Utc::now(),
            close_time: Utc::now(),
            open: close,
            high: close,
            low: close,
            close,
            volume: dec!(1),
            quote_volume: dec!(1),
            trade_count: 1,
            is_final: false,
            event_time: Utc::now(),
            adapt_volume: dec!(1),
        }
    }

    #[test]
    fn watch_depth_prefers_binance() {
        let sdk = Sdk::new();
        let cache = sdk.cache();
        cache.set_depth(depth(ExchangeName::Okx, "BTC-USDT", dec!(99)));
        cache.set_depth(depth(ExchangeName::Binance, "BTCUSDT", dec!(100)));

        let read = sdk.watch_depth("BTC/USDT").unwrap();
        assert_eq!(read.exchange, ExchangeName::Binance);
        assert_eq!(read.bids[0].price, dec!(100));
    }

    #[test]
    fn watch_kline_falls_back_then_prefers_higher_priority() {
        let sdk = Sdk::new();
        let cache = sdk.cache();

        cache.set_kline(kline(ExchangeName::Okx, "BTC-USDT", dec!(99)));
        let read = sdk.watch_kline("BTC/USDT").unwrap();
        assert_eq!(read.exchange, ExchangeName::Okx);

        cache.set_kline(kline(ExchangeName::Binance, "BTCUSDT", dec!(100)));
        let read = sdk.watch_kline("BTC/USDT").unwrap();
        assert_eq!(read.exchange, ExchangeName::Binance);
        assert_eq!(read.close, dec!(100));
    }

    #[test]
    fn watch_uses_the_inferred_market_segment() {
        let sdk = Sdk::new();
        let cache = sdk.cache();
        cache.set_depth(depth(ExchangeName::Binance, "BTCUSDT", dec!(100)));

        // futures lookup must not hit the spot entry
        assert!(sdk.watch_depth("BTC/USDT:USDT").is_none());
        assert!(sdk.watch_depth("BTC/USDT").is_some());
    }

    #[test]
    fn watch_rejects_garbage_symbols() {
        let sdk = Sdk::new();
        assert!(sdk.watch_depth("BTCUSDT").is_none());
        assert!(sdk.watch_kline("").is_none());
    }

    #[tokio::test]
    async fn subscribe_unknown_venue_errors() {
        let sdk = Sdk::new();
        let err = sdk
            .subscribe_kline(ExchangeName::Binance, MarketType::Spot, &["BTCUSDT".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, SdkError::VenueNotRegistered { .. }));
    }

    #[tokio::test]
    async fn fetch_depth_without_venues_errors() {
        let sdk = Sdk::new();
        let err = sdk
            .fetch_depth(MarketType::Spot, "BTC", "USDT", 100)
            .await
            .unwrap_err();
        assert!(matches!(err, SdkError::NoVenueForMarket(MarketType::Spot)));
    }

    #[tokio::test]
    async fn exchange_lifecycle() {
        let sdk = Sdk::new();
        let config = ExchangeConfig {
            exchange: ExchangeName::Binance,
            market: MarketType::Spot,
            weight: 3,
        };
        sdk.add_exchange(config).await.unwrap();
        assert!(sdk.is_exchange_active(ExchangeName::Binance, MarketType::Spot));
        assert_eq!(sdk.exchange_configs(), vec![config]);

        // same weight: no-op; different weight: update
        sdk.add_exchange(config).await.unwrap();
        sdk.add_exchange(ExchangeConfig { weight: 5, ..config }).await.unwrap();
        assert_eq!(sdk.exchange_configs()[0].weight, 5);

        // weight zero removes, and removing a missing venue stays quiet
        sdk.remove_exchange(ExchangeName::Binance, MarketType::Spot)
            .await
            .unwrap();
        assert!(!sdk.is_exchange_active(ExchangeName::Binance, MarketType::Spot));
        sdk.remove_exchange(ExchangeName::Binance, MarketType::Spot)
            .await
            .unwrap();
    }

    #[test]
    fn add_symbols_skips_bad_entries_and_dedupes() {
        let sdk = Sdk::new();
        sdk.add_symbols(&["BTC/USDT", "nonsense", "BTC/USDT", "ETH/USD:ETH"]);
        let declared = sdk.symbols();
        assert_eq!(declared.len(), 2);
        assert_eq!(declared[0].to_string(), "BTC/USDT");
        assert_eq!(declared[1].market, MarketType::FuturesCoin);
    }
}
