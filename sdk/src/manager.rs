//! Connector registry backing the façade
//!
//! Holds one connector per `(exchange, market)` key together with its
//! configured weight, the shared snapshot cache, and the root cancellation
//! token every connector hangs off.

use crate::SdkError;
use cache::{SnapshotCache, SubscriptionRegistry};
use common::{Depth, ExchangeName, Kline, MarketType};
use dashmap::DashMap;
use feeds::{connector_for, Connector};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

struct ConnectorEntry {
    connector: Arc<Connector>,
    weight: u32,
}

/// Registry of live connectors plus the process-wide cache.
pub struct Manager {
    cache: Arc<SnapshotCache>,
    connectors: DashMap<String, ConnectorEntry>,
    cancel: CancellationToken,
}

fn key(exchange: ExchangeName, market: MarketType) -> String {
    format!("{exchange}:{market}")
}

impl Manager {
    /// Empty registry whose connectors are children of `cancel`.
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cache: Arc::new(SnapshotCache::new()),
            connectors: DashMap::new(),
            cancel,
        }
    }

    /// The shared snapshot cache.
    pub fn cache(&self) -> Arc<SnapshotCache> {
        Arc::clone(&self.cache)
    }

    /// Create and register a connector. No-op when the key already exists.
    pub fn add_connector(&self, exchange: ExchangeName, market: MarketType, weight: u32) {
        self.connectors.entry(key(exchange, market)).or_insert_with(|| {
            info!(%exchange, %market, weight, "registering connector");
            ConnectorEntry {
                connector: connector_for(
                    exchange,
                    market,
                    Arc::clone(&self.cache),
                    self.cancel.child_token(),
                ),
                weight,
            }
        });
    }

    /// Tear a connector down and forget it.
    pub async fn remove_connector(
        &self,
        exchange: ExchangeName,
        market: MarketType,
    ) -> Result<(), SdkError> {
        let Some((_, entry)) = self.connectors.remove(&key(exchange, market)) else {
            return Err(SdkError::VenueNotRegistered { exchange, market });
        };
        entry.connector.shutdown().await;
        info!(%exchange, %market, "connector removed");
        Ok(())
    }

    /// Configured weight of a venue, when registered.
    pub fn weight(&self, exchange: ExchangeName, market: MarketType) -> Option<u32> {
        self.connectors
            .get(&key(exchange, market))
            .map(|entry| entry.weight)
    }

    /// Update the weight of a registered venue.
    pub fn update_weight(
        &self,
        exchange: ExchangeName,
        market: MarketType,
        weight: u32,
    ) -> Result<(), SdkError> {
        let Some(mut entry) = self.connectors.get_mut(&key(exchange, market)) else {
            return Err(SdkError::VenueNotRegistered { exchange, market });
        };
        entry.weight = weight;
        info!(%exchange, %market, weight, "weight updated");
        Ok(())
    }

    /// Registered `(exchange, market, weight)` triples.
    pub fn configs(&self) -> Vec<(ExchangeName, MarketType, u32)> {
        self.connectors
            .iter()
            .map(|entry| {
                (
                    entry.connector.exchange(),
                    entry.connector.market(),
                    entry.weight,
                )
            })
            .collect()
    }

    fn get(&self, exchange: ExchangeName, market: MarketType) -> Option<Arc<Connector>> {
        self.connectors
            .get(&key(exchange, market))
            .map(|entry| Arc::clone(&entry.connector))
    }

    /// Every registered connector.
    pub fn connectors(&self) -> Vec<Arc<Connector>> {
        self.connectors
            .iter()
            .map(|entry| Arc::clone(&entry.connector))
            .collect()
    }

    /// Connect every registered venue and spawn its read loop. Partial
    /// failure is tolerated; only a total failure is an error.
    pub async fn start_all(&self) -> Result<(), SdkError> {
        let connectors = self.connectors();
        if connectors.is_empty() {
            return Ok(());
        }
        let mut connected = 0_usize;
        let mut failed = Vec::new();
        for connector in connectors {
            match connector.start().await {
                Ok(()) => connected += 1,
                Err(err) => {
                    error!(
                        exchange = %connector.exchange(),
                        market = %connector.market(),
                        error = %err,
                        "connect failed"
                    );
                    failed.push(format!("{}:{}", connector.exchange(), connector.market()));
                }
            }
        }
        if failed.is_empty() {
            info!(connected, "all venue connections up");
        } else {
            warn!(connected, failed = ?failed, "some venue connections failed");
        }
        if connected == 0 {
            return Err(SdkError::AllConnectionsFailed);
        }
        Ok(())
    }

    /// Subscribe candles on one venue.
    pub async fn subscribe_kline(
        &self,
        exchange: ExchangeName,
        market: MarketType,
        symbols: &[String],
    ) -> Result<(), SdkError> {
        let connector = self
            .get(exchange, market)
            .ok_or(SdkError::VenueNotRegistered { exchange, market })?;
        connector.subscribe_kline(symbols).await?;
        Ok(())
    }

    /// Subscribe depth on one venue.
    pub async fn subscribe_depth(
        &self,
        exchange: ExchangeName,
        market: MarketType,
        symbols: &[String],
    ) -> Result<(), SdkError> {
        let connector = self
            .get(exchange, market)
            .ok_or(SdkError::VenueNotRegistered { exchange, market })?;
        connector.subscribe_depth(symbols).await?;
        Ok(())
    }

    /// Unsubscribe symbols from one venue (both channels).
    pub async fn unsubscribe(
        &self,
        exchange: ExchangeName,
        market: MarketType,
        symbols: &[String],
    ) -> Result<(), SdkError> {
        let connector = self
            .get(exchange, market)
            .ok_or(SdkError::VenueNotRegistered { exchange, market })?;
        connector.unsubscribe(symbols).await?;
        Ok(())
    }

    /// Fetch a depth snapshot synchronously through the first venue serving
    /// the market (in priority order), caching the result.
    pub async fn fetch_depth(
        &self,
        priority: &[ExchangeName],
        market: MarketType,
        symbol_for: impl Fn(ExchangeName) -> String,
        limit: u32,
    ) -> Result<Depth, SdkError> {
        for exchange in priority {
            let Some(connector) = self.get(*exchange, market) else {
                continue;
            };
            let symbol = symbol_for(*exchange);
            match connector
                .snapshot_source()
                .depth_snapshot(&symbol, limit)
                .await
            {
                Ok(depth) => {
                    self.cache.set_depth(depth.clone());
                    return Ok(depth);
                }
                Err(err) => {
                    warn!(%exchange, %market, %symbol, error = %err, "depth fetch failed, trying next venue");
                }
            }
        }
        Err(SdkError::NoVenueForMarket(market))
    }

    /// Latest candle for a venue symbol at the fixed subscription interval.
    pub fn watch_kline(
        &self,
        exchange: ExchangeName,
        market: MarketType,
        symbol: &str,
    ) -> Option<Arc<Kline>> {
        self.cache
            .kline(exchange, market, symbol, SubscriptionRegistry::INTERVAL)
    }

    /// Latest depth projection for a venue symbol.
    pub fn watch_depth(
        &self,
        exchange: ExchangeName,
        market: MarketType,
        symbol: &str,
    ) -> Option<Arc<Depth>> {
        self.cache.depth(exchange, market, symbol)
    }
}
