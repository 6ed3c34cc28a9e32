//! Canonical market-data types for the multi-venue feed engine
//!
//! Venue-independent representations of order-book depth, candles and
//! trading pairs. Per-venue symbol conventions are confined to
//! [`symbol::Symbol`]; everything downstream works with these types only.

#![deny(warnings)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(dead_code)]
#![deny(unused)]
#![deny(missing_docs)]
#![forbid(unsafe_code)]

pub mod symbol;
pub mod types;

pub use symbol::{Symbol, SymbolError};
pub use types::{Depth, ExchangeName, Interval, Kline, MarketType, PriceLevel, Side};
