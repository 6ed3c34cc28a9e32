//! Canonical trading-pair parsing and per-venue symbol formatting
//!
//! The canonical form is `BASE/QUOTE` for spot and `BASE/QUOTE:MARGIN` for
//! futures. The market segment is inferred from the margin currency:
//! `margin == quote` is a USDT-margined contract, `margin == base` a
//! coin-margined one.

use crate::types::{ExchangeName, MarketType};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Failure to parse a canonical symbol string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SymbolError {
    /// Input did not contain a `BASE/QUOTE` pair.
    #[error("invalid symbol format, expected BASE/QUOTE[:MARGIN], got: {0}")]
    Format(String),
    /// Base or quote currency was empty.
    #[error("base and quote cannot be empty: {0}")]
    Empty(String),
}

/// A parsed trading pair, venue-independent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol {
    /// Base currency, upper case (e.g. `BTC`)
    pub base: String,
    /// Quote currency, upper case (e.g. `USDT`)
    pub quote: String,
    /// Margin currency for futures, upper case; `None` for spot
    pub margin: Option<String>,
    /// Market segment inferred from the canonical form
    pub market: MarketType,
}

impl Symbol {
    /// Parse a canonical `BASE/QUOTE[:MARGIN]` string, inferring the market
    /// segment. Whitespace around components is ignored and currencies are
    /// upper-cased.
    ///
    /// # Errors
    ///
    /// Returns [`SymbolError`] when the string is not of the canonical form.
    pub fn parse(input: &str) -> Result<Self, SymbolError> {
        let input = input.trim();

        let (pair, margin) = match input.split_once(':') {
            Some((pair, margin)) => {
                let margin = margin.trim();
                if margin.is_empty() {
                    return Err(SymbolError::Empty(input.to_string()));
                }
                (pair, Some(margin.to_uppercase()))
            }
            None => (input, None),
        };

        let (base, quote) = pair
            .split_once('/')
            .ok_or_else(|| SymbolError::Format(input.to_string()))?;
        let base = base.trim().to_uppercase();
        let quote = quote.trim().to_uppercase();
        if base.is_empty() || quote.is_empty() {
            return Err(SymbolError::Empty(input.to_string()));
        }

        let market = match &margin {
            None => MarketType::Spot,
            Some(margin) if *margin == base => MarketType::FuturesCoin,
            // quote-margined and anything unrecognized default to the
            // USDT-margined segment, matching venue conventions
            Some(_) => MarketType::FuturesUsdt,
        };

        Ok(Self {
            base,
            quote,
            margin,
            market,
        })
    }

    /// Build a futures/spot symbol from parts, deriving the margin currency
    /// from the market segment when not given.
    #[must_use]
    pub fn from_parts(base: &str, quote: &str, market: MarketType) -> Self {
        let base = base.to_uppercase();
        let quote = quote.to_uppercase();
        let margin = match market {
            MarketType::Spot => None,
            MarketType::FuturesUsdt => Some(quote.clone()),
            MarketType::FuturesCoin => Some(base.clone()),
        };
        Self {
            base,
            quote,
            margin,
            market,
        }
    }

    /// Format this pair the way the given venue names it on the wire.
    ///
    /// | Venue | Spot | USDT-margined | Coin-margined |
    /// |---|---|---|---|
    /// | Binance | `BTCUSDT` | `BTCUSDT` | `BTCUSD_PERP` |
    /// | OKX | `BTC-USDT` | `BTC-USDT-SWAP` | `BTC-USD-SWAP` |
    /// | Bybit | `BTCUSDT` | `BTCUSDT` | `BTCUSD` |
    /// | Gate | `BTC_USDT` | `BTC_USDT` | `BTC_USD` |
    /// | MEXC | `BTCUSDT` | `BTCUSDT` | `BTCUSD` |
    #[must_use]
    pub fn format_for(&self, exchange: ExchangeName) -> String {
        match exchange {
            ExchangeName::Binance => match self.market {
                MarketType::Spot | MarketType::FuturesUsdt => {
                    format!("{}{}", self.base, self.quote)
                }
                MarketType::FuturesCoin => format!("{}{}_PERP", self.base, self.quote),
            },
            ExchangeName::Okx => match self.market {
                MarketType::Spot => format!("{}-{}", self.base, self.quote),
                MarketType::FuturesUsdt | MarketType::FuturesCoin => {
                    format!("{}-{}-SWAP", self.base, self.quote)
                }
            },
            ExchangeName::Bybit | ExchangeName::Mexc => {
                format!("{}{}", self.base, self.quote)
            }
            ExchangeName::Gate => format!("{}_{}", self.base, self.quote),
        }
    }

    /// True for the spot segment.
    #[must_use]
    pub const fn is_spot(&self) -> bool {
        matches!(self.market, MarketType::Spot)
    }

    /// True for either futures segment.
    #[must_use]
    pub const fn is_futures(&self) -> bool {
        matches!(
            self.market,
            MarketType::FuturesUsdt | MarketType::FuturesCoin
        )
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.margin {
            Some(margin) => write!(f, "{}/{}:{margin}", self.base, self.quote),
            None => write!(f, "{}/{}", self.base, self.quote),
        }
    }
}
