//! Per-symbol state machine driving snapshot loads, resyncs and publication
//!
//! Books are created lazily on the first depth event for a symbol, loaded
//! synchronously from a REST snapshot, and rebuilt whenever the delta stream
//! gaps. The engine is owned by its connector's read loop, so every symbol's
//! deltas are applied in strict wire order; readers only ever see the
//! immutable projections this engine publishes to the cache.

use crate::book::{ApplyOutcome, DepthUpdate, OrderBook};
use async_trait::async_trait;
use cache::SnapshotCache;
use common::{Depth, ExchangeName, MarketType};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Deadline for a single snapshot fetch.
pub const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(5);

/// Levels requested from the snapshot endpoint.
const SNAPSHOT_LIMIT: u32 = 100;

/// Snapshot attempts during a resync before the symbol is marked failed.
const RESYNC_ATTEMPTS: u32 = 3;

/// Failure to obtain or install a depth snapshot.
#[derive(Debug, Error)]
pub enum BookError {
    /// The snapshot response carried no usable `last_update_id`.
    #[error("depth snapshot is missing a last update id")]
    MissingUpdateId,
    /// The snapshot request failed.
    #[error("depth snapshot fetch failed: {0}")]
    Snapshot(String),
    /// The snapshot request exceeded [`SNAPSHOT_TIMEOUT`].
    #[error("depth snapshot fetch timed out")]
    Timeout,
}

/// Capability to fetch a point-in-time order book out-of-band. Injected into
/// the engine at construction; implementations must be idempotent and
/// side-effect-free.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Fetch a depth snapshot for a venue-formatted symbol.
    async fn depth_snapshot(&self, symbol: &str, limit: u32) -> Result<Depth, BookError>;
}

/// Lifecycle of one symbol's book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookState {
    /// No snapshot requested yet.
    Empty,
    /// Initial snapshot in flight.
    Loading,
    /// Snapshot installed, deltas applying.
    Live,
    /// Gap detected, rebuild in flight.
    Resyncing,
    /// Rebuild exhausted its retries; the symbol is dark until the connector
    /// is rebuilt. Readers see an absent cache entry, never poisoned data.
    Failed,
}

struct SymbolBook {
    book: OrderBook,
    state: BookState,
}

/// Order-book engine for one connector. Single-threaded by construction: the
/// owning read loop feeds it events one at a time.
pub struct DepthEngine {
    exchange: ExchangeName,
    market: MarketType,
    source: Arc<dyn SnapshotSource>,
    cache: Arc<SnapshotCache>,
    books: HashMap<String, SymbolBook>,
}

impl DepthEngine {
    /// Create an engine publishing to `cache` and snapshotting via `source`.
    #[must_use]
    pub fn new(
        exchange: ExchangeName,
        market: MarketType,
        source: Arc<dyn SnapshotSource>,
        cache: Arc<SnapshotCache>,
    ) -> Self {
        Self {
            exchange,
            market,
            source,
            cache,
            books: HashMap::new(),
        }
    }

    /// Lifecycle state of a symbol's book, if one exists.
    #[must_use]
    pub fn state(&self, symbol: &str) -> Option<BookState> {
        self.books.get(symbol).map(|entry| entry.state)
    }

    /// Drop failed books so the next depth event rebuilds them from scratch.
    /// Called after a successful reconnect: a fresh stream is a fresh chance.
    pub fn reset_failed(&mut self) {
        self.books
            .retain(|_, entry| entry.state != BookState::Failed);
    }

    /// Feed one depth event through the state machine. May fetch a snapshot
    /// (bounded by [`SNAPSHOT_TIMEOUT`]) before the delta is considered.
    pub async fn on_depth_update(&mut self, update: DepthUpdate) {
        let symbol = update.symbol.clone();

        match self.state(&symbol) {
            Some(BookState::Failed) => {
                debug!(%symbol, "ignoring delta for failed book");
                return;
            }
            Some(BookState::Live) => {}
            _ => {
                if !self.load_initial(&symbol).await {
                    return;
                }
            }
        }

        let Some(entry) = self.books.get_mut(&symbol) else {
            return;
        };
        match entry.book.apply(&update) {
            ApplyOutcome::Applied => {
                self.publish(&symbol, update.event_time_ms);
            }
            ApplyOutcome::Stale => {
                debug!(
                    %symbol,
                    final_update_id = update.final_update_id,
                    "dropping stale delta"
                );
            }
            ApplyOutcome::Gap => {
                warn!(
                    %symbol,
                    last_update_id = entry.book.last_update_id(),
                    first_update_id = update.first_update_id,
                    "sequence gap beyond threshold, rebuilding from snapshot"
                );
                self.resync(&symbol).await;
            }
        }
    }

    /// First snapshot for a symbol. A failure here is cheap to retry: the
    /// book stays `Empty` and the next depth event tries again, which keeps
    /// recovery cost proportional to stream activity.
    async fn load_initial(&mut self, symbol: &str) -> bool {
        self.books.insert(
            symbol.to_string(),
            SymbolBook {
                book: OrderBook::new(),
                state: BookState::Loading,
            },
        );

        match self.fetch_snapshot(symbol).await {
            Ok(snapshot) => self.install(symbol, &snapshot),
            Err(err) => {
                warn!(symbol, error = %err, "initial snapshot failed, retrying on next event");
                if let Some(entry) = self.books.get_mut(symbol) {
                    entry.state = BookState::Empty;
                }
                false
            }
        }
    }

    /// Rebuild after a gap: discard state and re-fetch, retrying with a
    /// linear backoff. Once the retries run out the symbol is marked failed
    /// and its cache entry removed.
    async fn resync(&mut self, symbol: &str) {
        if let Some(entry) = self.books.get_mut(symbol) {
            entry.book = OrderBook::new();
            entry.state = BookState::Resyncing;
        }

        for attempt in 1..=RESYNC_ATTEMPTS {
            match self.fetch_snapshot(symbol).await {
                Ok(snapshot) => {
                    if self.install(symbol, &snapshot) {
                        return;
                    }
                }
                Err(err) => {
                    warn!(symbol, attempt, error = %err, "resync snapshot failed");
                }
            }
            if attempt < RESYNC_ATTEMPTS {
                tokio::time::sleep(Duration::from_secs(u64::from(attempt))).await;
            }
        }

        error!(symbol, "resync exhausted retries, marking book failed");
        if let Some(entry) = self.books.get_mut(symbol) {
            entry.state = BookState::Failed;
        }
        self.cache.remove_depth(self.exchange, self.market, symbol);
    }

    /// Install a fetched snapshot and go live. Returns false when the
    /// snapshot is unusable (missing update id).
    fn install(&mut self, symbol: &str, snapshot: &Depth) -> bool {
        let Some(entry) = self.books.get_mut(symbol) else {
            return false;
        };
        match entry.book.load_snapshot(snapshot) {
            Ok(()) => {
                entry.state = BookState::Live;
                debug!(
                    symbol,
                    last_update_id = entry.book.last_update_id(),
                    bids = snapshot.bids.len(),
                    asks = snapshot.asks.len(),
                    "snapshot installed"
                );
                true
            }
            Err(err) => {
                warn!(symbol, error = %err, "unusable snapshot");
                entry.state = BookState::Empty;
                false
            }
        }
    }

    async fn fetch_snapshot(&self, symbol: &str) -> Result<Depth, BookError> {
        tokio::time::timeout(
            SNAPSHOT_TIMEOUT,
            self.source.depth_snapshot(symbol, SNAPSHOT_LIMIT),
        )
        .await
        .map_err(|_| BookError::Timeout)?
    }

    /// Publish the current projection. A crossed top-of-book indicates an
    /// upstream problem; it is logged, not repaired.
    fn publish(&self, symbol: &str, event_time_ms: i64) {
        let Some(entry) = self.books.get(symbol) else {
            return;
        };
        let depth = entry
            .book
            .project(self.exchange, self.market, symbol, event_time_ms);
        if depth.is_crossed() {
            warn!(
                symbol,
                bid = ?depth.best_bid().map(|l| l.price),
                ask = ?depth.best_ask().map(|l| l.price),
                "crossed book published"
            );
        }
        self.cache.set_depth(depth);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::PriceLevel;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubSource {
        responses: Mutex<VecDeque<Result<Depth, BookError>>>,
        fetches: AtomicUsize,
    }

    impl StubSource {
        fn new(responses: Vec<Result<Depth, BookError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                fetches: AtomicUsize::new(0),
            })
        }

        fn fetch_count(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SnapshotSource for StubSource {
        async fn depth_snapshot(&self, _symbol: &str, _limit: u32) -> Result<Depth, BookError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(BookError::Snapshot("stub exhausted".to_string())))
        }
    }

    fn snapshot(id: i64, bids: &[(&str, &str)], asks: &[(&str, &str)]) -> Depth {
        let level = |(p, q): &(&str, &str)| PriceLevel::new(p.parse().unwrap(), q.parse().unwrap());
        Depth {
            exchange: ExchangeName::Binance,
            market: MarketType::Spot,
            symbol: "BTCUSDT".to_string(),
            bids: bids.iter().map(level).collect(),
            asks: asks.iter().map(level).collect(),
            updated_at: Utc::now(),
            last_update_id: id.to_string(),
        }
    }

    fn update(first: i64, last: i64, bids: &[(&str, &str)], asks: &[(&str, &str)]) -> DepthUpdate {
        let level = |(p, q): &(&str, &str)| [(*p).to_string(), (*q).to_string()];
        DepthUpdate {
            event_time_ms: 1_700_000_000_000,
            symbol: "BTCUSDT".to_string(),
            first_update_id: first,
            final_update_id: last,
            bids: bids.iter().map(level).collect(),
            asks: asks.iter().map(level).collect(),
        }
    }

    fn engine_with(source: Arc<StubSource>) -> (DepthEngine, Arc<SnapshotCache>) {
        let cache = Arc::new(SnapshotCache::new());
        let engine = DepthEngine::new(
            ExchangeName::Binance,
            MarketType::Spot,
            source,
            Arc::clone(&cache),
        );
        (engine, cache)
    }

    fn cached(cache: &SnapshotCache) -> Option<Arc<Depth>> {
        cache.depth(ExchangeName::Binance, MarketType::Spot, "BTCUSDT")
    }

    #[tokio::test]
    async fn clean_start_publishes_after_first_delta() {
        let source = StubSource::new(vec![Ok(snapshot(
            1000,
            &[("100", "1"), ("99", "2")],
            &[("101", "3")],
        ))]);
        let (mut engine, cache) = engine_with(Arc::clone(&source));

        engine
            .on_depth_update(update(1001, 1001, &[("100", "0")], &[("101", "5")]))
            .await;

        let depth = cached(&cache).unwrap();
        assert_eq!(depth.last_update_id, "1001");
        assert_eq!(depth.bids, vec![PriceLevel::new(dec!(99), dec!(2))]);
        assert_eq!(depth.asks, vec![PriceLevel::new(dec!(101), dec!(5))]);
        assert_eq!(source.fetch_count(), 1);
        assert_eq!(engine.state("BTCUSDT"), Some(BookState::Live));
    }

    #[tokio::test]
    async fn stale_delta_changes_nothing_and_refetches_nothing() {
        let source = StubSource::new(vec![Ok(snapshot(
            1000,
            &[("100", "1"), ("99", "2")],
            &[("101", "3")],
        ))]);
        let (mut engine, cache) = engine_with(Arc::clone(&source));

        engine
            .on_depth_update(update(1001, 1001, &[("100", "0")], &[("101", "5")]))
            .await;
        let before = cached(&cache).unwrap();

        engine
            .on_depth_update(update(500, 999, &[("99", "7")], &[]))
            .await;

        let after = cached(&cache).unwrap();
        assert_eq!(before, after);
        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test]
    async fn gap_triggers_exactly_one_refetch() {
        let source = StubSource::new(vec![
            Ok(snapshot(1000, &[("100", "1")], &[("101", "3")])),
            Ok(snapshot(3005, &[("100", "4")], &[("101", "6")])),
        ]);
        let (mut engine, cache) = engine_with(Arc::clone(&source));

        engine
            .on_depth_update(update(1001, 1001, &[("99", "2")], &[]))
            .await;
        assert_eq!(source.fetch_count(), 1);

        // first id jumps past last + GAP_THRESHOLD: discard, refetch, go live
        engine
            .on_depth_update(update(3000, 3010, &[("98", "1")], &[]))
            .await;
        assert_eq!(source.fetch_count(), 2);
        assert_eq!(engine.state("BTCUSDT"), Some(BookState::Live));

        // the book reflects only post-snapshot state
        engine
            .on_depth_update(update(3006, 3008, &[("99.5", "2")], &[]))
            .await;
        let depth = cached(&cache).unwrap();
        assert_eq!(depth.last_update_id, "3008");
        assert_eq!(depth.bids[0].price, dec!(100));
        assert_eq!(depth.bids[1].price, dec!(99.5));
        assert!(depth.bids.iter().all(|l| l.price != dec!(99)));
        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test]
    async fn canonical_price_collision_across_snapshot_and_delta() {
        let source = StubSource::new(vec![Ok(snapshot(1, &[("50.500", "7")], &[]))]);
        let (mut engine, cache) = engine_with(source);

        engine
            .on_depth_update(update(2, 2, &[("50.5", "0")], &[]))
            .await;

        let depth = cached(&cache).unwrap();
        assert!(depth.bids.iter().all(|l| l.price != dec!(50.5)));
        assert!(depth.bids.is_empty());
    }

    #[tokio::test]
    async fn initial_snapshot_failure_retries_on_next_event() {
        let source = StubSource::new(vec![
            Err(BookError::Snapshot("boom".to_string())),
            Ok(snapshot(10, &[("100", "1")], &[])),
        ]);
        let (mut engine, cache) = engine_with(Arc::clone(&source));

        engine.on_depth_update(update(11, 11, &[("99", "1")], &[])).await;
        assert!(cached(&cache).is_none());
        assert_eq!(engine.state("BTCUSDT"), Some(BookState::Empty));

        engine.on_depth_update(update(11, 12, &[("99", "1")], &[])).await;
        assert_eq!(source.fetch_count(), 2);
        let depth = cached(&cache).unwrap();
        assert_eq!(depth.last_update_id, "12");
    }

    #[tokio::test(start_paused = true)]
    async fn resync_exhaustion_marks_failed_and_clears_cache() {
        let source = StubSource::new(vec![Ok(snapshot(1000, &[("100", "1")], &[]))]);
        let (mut engine, cache) = engine_with(Arc::clone(&source));

        engine
            .on_depth_update(update(1001, 1001, &[("99", "1")], &[]))
            .await;
        assert!(cached(&cache).is_some());

        // every resync attempt hits the exhausted stub and fails
        engine
            .on_depth_update(update(5000, 5001, &[("98", "1")], &[]))
            .await;
        assert_eq!(engine.state("BTCUSDT"), Some(BookState::Failed));
        assert!(cached(&cache).is_none());
        assert_eq!(source.fetch_count(), 1 + 3);

        // failed books ignore further deltas entirely
        engine
            .on_depth_update(update(5002, 5003, &[("98", "1")], &[]))
            .await;
        assert_eq!(source.fetch_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_failed_allows_a_fresh_rebuild() {
        let source = StubSource::new(vec![Ok(snapshot(1000, &[("100", "1")], &[]))]);
        let (mut engine, cache) = engine_with(Arc::clone(&source));

        engine
            .on_depth_update(update(1001, 1001, &[("99", "1")], &[]))
            .await;
        engine
            .on_depth_update(update(5000, 5001, &[("98", "1")], &[]))
            .await;
        assert_eq!(engine.state("BTCUSDT"), Some(BookState::Failed));

        engine.reset_failed();
        assert_eq!(engine.state("BTCUSDT"), None);

        source
            .responses
            .lock()
            .push_back(Ok(snapshot(6000, &[("97", "1")], &[])));
        engine
            .on_depth_update(update(6001, 6001, &[("96", "1")], &[]))
            .await;
        let depth = cached(&cache).unwrap();
        assert_eq!(depth.last_update_id, "6001");
    }
}
