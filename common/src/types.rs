//! Venue, market and market-data value types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeName {
    /// Binance
    Binance,
    /// OKX
    Okx,
    /// Bybit
    Bybit,
    /// Gate.io
    Gate,
    /// MEXC
    Mexc,
}

impl ExchangeName {
    /// Stable lowercase identifier, used in cache keys and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Binance => "binance",
            Self::Okx => "okx",
            Self::Bybit => "bybit",
            Self::Gate => "gate",
            Self::Mexc => "mexc",
        }
    }
}

impl fmt::Display for ExchangeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Market segment served by one connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketType {
    /// Spot market
    Spot,
    /// USDT-margined perpetual futures
    FuturesUsdt,
    /// Coin-margined perpetual futures
    FuturesCoin,
}

impl MarketType {
    /// Stable identifier, used in cache keys and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Spot => "spot",
            Self::FuturesUsdt => "futures_usdt",
            Self::FuturesCoin => "futures_coin",
        }
    }
}

impl fmt::Display for MarketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Candle interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    /// 1 minute
    #[serde(rename = "1m")]
    Min1,
    /// 3 minutes
    #[serde(rename = "3m")]
    Min3,
    /// 5 minutes
    #[serde(rename = "5m")]
    Min5,
    /// 15 minutes
    #[serde(rename = "15m")]
    Min15,
    /// 30 minutes
    #[serde(rename = "30m")]
    Min30,
    /// 1 hour
    #[serde(rename = "1h")]
    Hour1,
    /// 4 hours
    #[serde(rename = "4h")]
    Hour4,
    /// 1 day
    #[serde(rename = "1d")]
    Day1,
}

impl Interval {
    /// Bar length in milliseconds.
    #[must_use]
    pub const fn as_millis(self) -> i64 {
        match self {
            Self::Min1 => 60_000,
            Self::Min3 => 180_000,
            Self::Min5 => 300_000,
            Self::Min15 => 900_000,
            Self::Min30 => 1_800_000,
            Self::Hour1 => 3_600_000,
            Self::Hour4 => 14_400_000,
            Self::Day1 => 86_400_000,
        }
    }

    /// Wire representation shared by most venues.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Min1 => "1m",
            Self::Min3 => "3m",
            Self::Min5 => "5m",
            Self::Min15 => "15m",
            Self::Min30 => "30m",
            Self::Hour1 => "1h",
            Self::Hour4 => "4h",
            Self::Day1 => "1d",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Self::Min1),
            "3m" => Ok(Self::Min3),
            "5m" => Ok(Self::Min5),
            "15m" => Ok(Self::Min15),
            "30m" => Ok(Self::Min30),
            "1h" => Ok(Self::Hour1),
            "4h" => Ok(Self::Hour4),
            "1d" => Ok(Self::Day1),
            other => Err(format!("unknown interval: {other}")),
        }
    }
}

/// Side of the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Buy side
    Bid,
    /// Sell side
    Ask,
}

/// A single order-book level. Zero quantity is never stored; on the wire it
/// encodes deletion of the level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    /// Level price
    pub price: Decimal,
    /// Total quantity resting at this price
    pub quantity: Decimal,
}

impl PriceLevel {
    /// Create a level.
    #[must_use]
    pub const fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity }
    }
}

/// Immutable order-book projection published to readers.
///
/// Bids are sorted descending, asks ascending, both truncated to the
/// publisher's level cap. `last_update_id` is the venue sequence number at
/// which this projection was consistent, formatted as a string at this
/// boundary only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Depth {
    /// Source exchange
    pub exchange: ExchangeName,
    /// Source market segment
    pub market: MarketType,
    /// Venue-formatted symbol
    pub symbol: String,
    /// Buy levels, best (highest) first
    pub bids: Vec<PriceLevel>,
    /// Sell levels, best (lowest) first
    pub asks: Vec<PriceLevel>,
    /// When this projection was built
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
    /// Venue sequence number of the last applied update
    #[serde(rename = "lastUpdateId")]
    pub last_update_id: String,
}

impl Depth {
    /// Best bid, if any.
    #[must_use]
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    /// Best ask, if any.
    #[must_use]
    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }

    /// True when best bid >= best ask. A crossed projection indicates an
    /// upstream problem; it is logged by the publisher, never repaired.
    #[must_use]
    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => bid.price >= ask.price,
            _ => false,
        }
    }
}

/// Normalized candle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kline {
    /// Source exchange
    pub exchange: ExchangeName,
    /// Source market segment
    pub market: MarketType,
    /// Venue-formatted symbol
    pub symbol: String,
    /// Bar interval
    pub interval: Interval,
    /// Bar open time
    #[serde(rename = "openTime")]
    pub open_time: DateTime<Utc>,
    /// Bar close time
    #[serde(rename = "closeTime")]
    pub close_time: DateTime<Utc>,
    /// Open price
    pub open: Decimal,
    /// High price
    pub high: Decimal,
    /// Low price
    pub low: Decimal,
    /// Close price
    pub close: Decimal,
    /// Base-asset volume
    pub volume: Decimal,
    /// Quote-asset volume
    #[serde(rename = "quoteVolume")]
    pub quote_volume: Decimal,
    /// Number of trades in the bar
    #[serde(rename = "tradeNum")]
    pub trade_count: i64,
    /// Whether the bar is closed
    #[serde(rename = "isFinal")]
    pub is_final: bool,
    /// Venue event time of the frame that produced this candle
    #[serde(rename = "eventTime")]
    pub event_time: DateTime<Utc>,
    /// Per-second volume estimate for the in-progress bar; see the candle
    /// decoder for the derivation
    #[serde(rename = "adaptVolume")]
    pub adapt_volume: Decimal,
}
