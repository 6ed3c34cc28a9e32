//! Per-symbol book state: canonical price keys, sequence rules, truncation

use chrono::{DateTime, Utc};
use common::{Depth, ExchangeName, MarketType, PriceLevel};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::debug;

/// Levels kept per side at rest. The venue's diff channel may later reference
/// a pruned price; at this depth that is accepted and the next snapshot
/// rebuild self-heals.
pub const MAX_LEVELS: usize = 100;

/// A delta whose first id exceeds `last_update_id + GAP_THRESHOLD` indicates
/// lost packets and forces a rebuild. A strict `+1` continuity rule would
/// resync on every coalesced update; this tolerance matches observed
/// per-venue burst sizes.
pub const GAP_THRESHOLD: i64 = 1000;

/// Normalized incremental depth update, as decoded from a venue frame.
/// Levels are raw price/quantity strings; parsing and canonicalization happen
/// at apply time so the book controls key formatting.
#[derive(Debug, Clone)]
pub struct DepthUpdate {
    /// Venue event time in milliseconds
    pub event_time_ms: i64,
    /// Venue-formatted symbol
    pub symbol: String,
    /// First update id covered by this event
    pub first_update_id: i64,
    /// Final update id covered by this event
    pub final_update_id: i64,
    /// Bid changes as `[price, quantity]`; zero quantity deletes the level
    pub bids: Vec<[String; 2]>,
    /// Ask changes as `[price, quantity]`; zero quantity deletes the level
    pub asks: Vec<[String; 2]>,
}

/// What the sequence rules decided about one delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The delta was applied and `last_update_id` advanced.
    Applied,
    /// The delta was entirely covered by the snapshot or an earlier delta
    /// and was dropped. Replays are idempotent.
    Stale,
    /// The delta starts beyond the gap threshold; the book must be rebuilt
    /// from a fresh snapshot. Nothing was mutated.
    Gap,
}

/// One symbol's order book.
///
/// Both sides are keyed by the canonical decimal price
/// ([`Decimal::normalize`], which strips trailing fractional zeros), so a
/// snapshot level `"100.00"` and a delta level `"100"` collide as required.
/// `last_update_id == 0` means uninitialized (snapshot pending).
#[derive(Debug, Default)]
pub struct OrderBook {
    last_update_id: i64,
    bids: BTreeMap<Decimal, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
}

impl OrderBook {
    /// Create an empty, uninitialized book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number of the last applied update; 0 when no snapshot has
    /// been installed yet.
    #[must_use]
    pub const fn last_update_id(&self) -> i64 {
        self.last_update_id
    }

    /// Replace the book contents with a snapshot. The snapshot's
    /// `last_update_id` string must parse to a positive integer.
    ///
    /// # Errors
    ///
    /// [`crate::BookError::MissingUpdateId`] when the snapshot carries no
    /// usable update id; the caller treats this as a failed snapshot.
    pub fn load_snapshot(&mut self, snapshot: &Depth) -> Result<(), crate::BookError> {
        let id: i64 = snapshot
            .last_update_id
            .parse()
            .map_err(|_| crate::BookError::MissingUpdateId)?;
        if id <= 0 {
            return Err(crate::BookError::MissingUpdateId);
        }

        self.bids.clear();
        self.asks.clear();
        for level in &snapshot.bids {
            if !level.quantity.is_zero() {
                self.bids.insert(level.price.normalize(), level.quantity);
            }
        }
        for level in &snapshot.asks {
            if !level.quantity.is_zero() {
                self.asks.insert(level.price.normalize(), level.quantity);
            }
        }
        self.last_update_id = id;
        self.truncate();
        Ok(())
    }

    /// Run one delta through the sequence rules and, when accepted, apply it
    /// to both sides, advance `last_update_id` and prune to [`MAX_LEVELS`].
    pub fn apply(&mut self, update: &DepthUpdate) -> ApplyOutcome {
        if update.final_update_id < self.last_update_id {
            return ApplyOutcome::Stale;
        }
        if update.first_update_id > self.last_update_id + GAP_THRESHOLD {
            return ApplyOutcome::Gap;
        }

        for [price, quantity] in &update.bids {
            Self::set_level(&mut self.bids, price, quantity);
        }
        for [price, quantity] in &update.asks {
            Self::set_level(&mut self.asks, price, quantity);
        }
        self.last_update_id = update.final_update_id;
        self.truncate();
        ApplyOutcome::Applied
    }

    /// Insert, overwrite or delete a single level. The canonical decimal
    /// value is the key; the raw wire string never is.
    fn set_level(side: &mut BTreeMap<Decimal, Decimal>, price: &str, quantity: &str) {
        let (Ok(price), Ok(quantity)) = (price.parse::<Decimal>(), quantity.parse::<Decimal>())
        else {
            debug!(price, quantity, "skipping unparsable level");
            return;
        };
        let price = price.normalize();
        if quantity.is_zero() {
            side.remove(&price);
        } else {
            side.insert(price, quantity);
        }
    }

    /// Prune each side to its best [`MAX_LEVELS`]: highest-priced bids,
    /// lowest-priced asks.
    fn truncate(&mut self) {
        while self.bids.len() > MAX_LEVELS {
            self.bids.pop_first();
        }
        while self.asks.len() > MAX_LEVELS {
            self.asks.pop_last();
        }
    }

    /// Quantity resting at a bid price, if present. Lookup is canonical.
    #[must_use]
    pub fn bid_quantity(&self, price: Decimal) -> Option<Decimal> {
        self.bids.get(&price.normalize()).copied()
    }

    /// Quantity resting at an ask price, if present. Lookup is canonical.
    #[must_use]
    pub fn ask_quantity(&self, price: Decimal) -> Option<Decimal> {
        self.asks.get(&price.normalize()).copied()
    }

    /// Number of levels per side as `(bids, asks)`.
    #[must_use]
    pub fn depth(&self) -> (usize, usize) {
        (self.bids.len(), self.asks.len())
    }

    /// Build the immutable projection published to readers: bids descending,
    /// asks ascending, both capped at [`MAX_LEVELS`], stamped with the event
    /// time and the current `last_update_id`.
    #[must_use]
    pub fn project(
        &self,
        exchange: ExchangeName,
        market: MarketType,
        symbol: &str,
        event_time_ms: i64,
    ) -> Depth {
        let bids = self
            .bids
            .iter()
            .rev()
            .take(MAX_LEVELS)
            .map(|(price, quantity)| PriceLevel::new(*price, *quantity))
            .collect();
        let asks = self
            .asks
            .iter()
            .take(MAX_LEVELS)
            .map(|(price, quantity)| PriceLevel::new(*price, *quantity))
            .collect();

        Depth {
            exchange,
            market,
            symbol: symbol.to_string(),
            bids,
            asks,
            updated_at: DateTime::<Utc>::from_timestamp_millis(event_time_ms)
                .unwrap_or_else(Utc::now),
            last_update_id: self.last_update_id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

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

    #[test]
    fn snapshot_then_delta() {
        let mut book = OrderBook::new();
        book.load_snapshot(&snapshot(1000, &[("100", "1"), ("99", "2")], &[("101", "3")]))
            .unwrap();
        assert_eq!(book.last_update_id(), 1000);

        let outcome = book.apply(&update(1001, 1001, &[("100", "0")], &[("101", "5")]));
        assert_eq!(outcome, ApplyOutcome::Applied);

        let depth = book.project(ExchangeName::Binance, MarketType::Spot, "BTCUSDT", 0);
        assert_eq!(depth.last_update_id, "1001");
        assert_eq!(depth.bids, vec![PriceLevel::new(dec!(99), dec!(2))]);
        assert_eq!(depth.asks, vec![PriceLevel::new(dec!(101), dec!(5))]);
    }

    #[test]
    fn last_update_id_strictly_increases() {
        let mut book = OrderBook::new();
        book.load_snapshot(&snapshot(10, &[("100", "1")], &[])).unwrap();

        let mut previous = book.last_update_id();
        for id in [11, 15, 400, 401] {
            assert_eq!(
                book.apply(&update(id, id, &[("100", "2")], &[])),
                ApplyOutcome::Applied
            );
            assert!(book.last_update_id() > previous);
            previous = book.last_update_id();
        }
    }

    #[test]
    fn stale_delta_is_idempotent() {
        let mut book = OrderBook::new();
        book.load_snapshot(&snapshot(1000, &[("100", "1"), ("99", "2")], &[("101", "3")]))
            .unwrap();
        book.apply(&update(1001, 1001, &[("100", "0")], &[("101", "5")]));

        // entirely covered by the snapshot and the first delta
        let outcome = book.apply(&update(500, 999, &[("99", "9")], &[("101", "9")]));
        assert_eq!(outcome, ApplyOutcome::Stale);
        assert_eq!(book.last_update_id(), 1001);
        assert_eq!(book.bid_quantity(dec!(99)), Some(dec!(2)));
        assert_eq!(book.ask_quantity(dec!(101)), Some(dec!(5)));
    }

    #[test]
    fn equal_numeric_prices_collide_across_formats() {
        let mut book = OrderBook::new();
        book.load_snapshot(&snapshot(1, &[("50.500", "7")], &[])).unwrap();
        assert_eq!(book.bid_quantity(dec!(50.5)), Some(dec!(7)));

        // delete with different trailing-zero formatting
        book.apply(&update(2, 2, &[("50.5", "0")], &[]));
        assert_eq!(book.bid_quantity(dec!(50.5)), None);
        assert_eq!(book.bid_quantity(dec!(50.500)), None);
        assert_eq!(book.depth(), (0, 0));
    }

    #[test]
    fn set_then_delete_with_more_precision() {
        let mut book = OrderBook::new();
        book.load_snapshot(&snapshot(1, &[], &[("0.070", "3")])).unwrap();
        book.apply(&update(2, 2, &[], &[("0.07000", "0")]));
        assert_eq!(book.ask_quantity(dec!(0.07)), None);
    }

    #[test]
    fn gap_detected_beyond_threshold() {
        let mut book = OrderBook::new();
        book.load_snapshot(&snapshot(1000, &[("100", "1")], &[])).unwrap();

        // exactly at the threshold still applies
        assert_eq!(
            book.apply(&update(2000, 2001, &[("100", "2")], &[])),
            ApplyOutcome::Applied
        );
        // beyond it does not, and nothing is mutated
        assert_eq!(
            book.apply(&update(3002, 3010, &[("100", "9")], &[])),
            ApplyOutcome::Gap
        );
        assert_eq!(book.last_update_id(), 2001);
        assert_eq!(book.bid_quantity(dec!(100)), Some(dec!(2)));
    }

    #[test]
    fn sides_stay_bounded() {
        let mut book = OrderBook::new();
        book.load_snapshot(&snapshot(1, &[("1", "1")], &[("100000", "1")]))
            .unwrap();

        for i in 0..150 {
            let bid_price = format!("{}", 1000 + i);
            let ask_price = format!("{}", 90_000 - i);
            book.apply(&update(
                2 + i,
                2 + i,
                &[(bid_price.as_str(), "1")],
                &[(ask_price.as_str(), "1")],
            ));
        }

        let (bids, asks) = book.depth();
        assert_eq!(bids, MAX_LEVELS);
        assert_eq!(asks, MAX_LEVELS);

        // the best levels survived pruning: highest bids, lowest asks
        assert_eq!(book.bid_quantity(dec!(1149)), Some(dec!(1)));
        assert_eq!(book.bid_quantity(dec!(1)), None);
        assert_eq!(book.ask_quantity(dec!(89851)), Some(dec!(1)));
        assert_eq!(book.ask_quantity(dec!(100000)), None);
    }

    #[test]
    fn projection_is_sorted_and_capped() {
        let mut book = OrderBook::new();
        book.load_snapshot(&snapshot(
            1,
            &[("99", "1"), ("101", "1"), ("100", "1")],
            &[("103", "1"), ("102", "1"), ("104", "1")],
        ))
        .unwrap();

        let depth = book.project(ExchangeName::Binance, MarketType::Spot, "BTCUSDT", 0);
        let bid_prices: Vec<_> = depth.bids.iter().map(|l| l.price).collect();
        let ask_prices: Vec<_> = depth.asks.iter().map(|l| l.price).collect();
        assert_eq!(bid_prices, vec![dec!(101), dec!(100), dec!(99)]);
        assert_eq!(ask_prices, vec![dec!(102), dec!(103), dec!(104)]);
    }

    #[test]
    fn snapshot_without_update_id_is_rejected() {
        let mut book = OrderBook::new();
        let mut snap = snapshot(1, &[("100", "1")], &[]);
        snap.last_update_id = String::new();
        assert!(book.load_snapshot(&snap).is_err());

        snap.last_update_id = "0".to_string();
        assert!(book.load_snapshot(&snap).is_err());
        assert_eq!(book.last_update_id(), 0);
    }

    #[test]
    fn unparsable_levels_are_skipped() {
        let mut book = OrderBook::new();
        book.load_snapshot(&snapshot(1, &[("100", "1")], &[])).unwrap();
        book.apply(&update(2, 2, &[("abc", "1"), ("101", "2")], &[]));
        assert_eq!(book.bid_quantity(dec!(101)), Some(dec!(2)));
        assert_eq!(book.depth(), (2, 0));
    }
}
