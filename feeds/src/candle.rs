//! Candle assembly shared by every venue codec
//!
//! Venues differ in frame layout but the derived fields must be computed
//! identically everywhere so downstream consumers can compare candles across
//! venues.

use chrono::{DateTime, Utc};
use common::{ExchangeName, Interval, Kline, MarketType};
use rust_decimal::Decimal;

/// Venue-agnostic candle fields, as extracted by a codec.
#[derive(Debug, Clone)]
pub struct RawCandle {
    /// Bar open time in milliseconds
    pub open_time_ms: i64,
    /// Bar close time in milliseconds
    pub close_time_ms: i64,
    /// Bar interval
    pub interval: Interval,
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
    /// Quote-asset volume; zero when the venue does not report it
    pub quote_volume: Decimal,
    /// Trades in the bar; zero when the venue does not report it
    pub trade_count: i64,
    /// Whether the bar is closed
    pub is_final: bool,
}

/// Per-second volume estimate for the bar.
///
/// Normalizes an in-progress bar by its elapsed fraction: with `t` the event
/// time while the bar is open (or the close time once final), `s` is the
/// seconds-within-minute of `t` including milliseconds, rounded to three
/// decimals. The estimate is `volume / s`, falling back to the raw volume
/// when `s` is zero.
pub fn adapt_volume(volume: Decimal, is_final: bool, event_time_ms: i64, close_time_ms: i64) -> Decimal {
    let t = if is_final { close_time_ms } else { event_time_ms };
    let seconds_within_minute = (t / 1000).rem_euclid(60);
    let millis = t.rem_euclid(1000);
    // exact three-decimal value, e.g. 10.333
    let elapsed = Decimal::new(seconds_within_minute * 1000 + millis, 3);
    if elapsed > Decimal::ZERO {
        volume / elapsed
    } else {
        volume
    }
}

/// Assemble the normalized candle published to the cache.
pub fn build_kline(
    exchange: ExchangeName,
    market: MarketType,
    symbol: String,
    raw: RawCandle,
    event_time_ms: i64,
) -> Kline {
    let adapt = adapt_volume(raw.volume, raw.is_final, event_time_ms, raw.close_time_ms);
    Kline {
        exchange,
        market,
        symbol,
        interval: raw.interval,
        open_time: millis_to_utc(raw.open_time_ms),
        close_time: millis_to_utc(raw.close_time_ms),
        open: raw.open,
        high: raw.high,
        low: raw.low,
        close: raw.close,
        volume: raw.volume,
        quote_volume: raw.quote_volume,
        trade_count: raw.trade_count,
        is_final: raw.is_final,
        event_time: millis_to_utc(event_time_ms),
        adapt_volume: adapt,
    }
}

fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    // a minute boundary in milliseconds
    const MINUTE_START_MS: i64 = 1_700_000_040_000;

    #[test]
    fn open_bar_divides_by_elapsed_seconds() {
        let got = adapt_volume(dec!(62.0), false, MINUTE_START_MS + 10_333, 0);
        let expected = dec!(62.0) / dec!(10.333);
        assert_eq!(got, expected);
        // sanity on the magnitude
        assert!((got - dec!(5.9997)).abs() < dec!(0.001));
    }

    #[test]
    fn final_bar_uses_close_time() {
        // close at second 59.999 of the minute
        let close = MINUTE_START_MS + 59_999;
        let got = adapt_volume(dec!(120), true, 0, close);
        assert_eq!(got, dec!(120) / dec!(59.999));
    }

    #[test]
    fn zero_elapsed_falls_back_to_raw_volume() {
        let got = adapt_volume(dec!(7.5), false, MINUTE_START_MS, 0);
        assert_eq!(got, dec!(7.5));
    }

    #[test]
    fn build_kline_stamps_times_and_derivation() {
        let raw = RawCandle {
            open_time_ms: MINUTE_START_MS,
            close_time_ms: MINUTE_START_MS + 59_999,
            interval: Interval::Min1,
            open: dec!(100),
            high: dec!(110),
            low: dec!(95),
            close: dec!(105),
            volume: dec!(62.0),
            quote_volume: dec!(6300),
            trade_count: 42,
            is_final: false,
        };
        let kline = build_kline(
            ExchangeName::Binance,
            MarketType::Spot,
            "BTCUSDT".to_string(),
            raw,
            MINUTE_START_MS + 10_333,
        );
        assert_eq!(kline.adapt_volume, dec!(62.0) / dec!(10.333));
        assert_eq!(kline.event_time.timestamp_millis(), MINUTE_START_MS + 10_333);
        assert_eq!(kline.close_time.timestamp_millis(), MINUTE_START_MS + 59_999);
        assert!(!kline.is_final);
    }
}
