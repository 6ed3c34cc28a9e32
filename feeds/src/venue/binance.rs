//! Binance codec and snapshot client
//!
//! Streams: `<symbol>@kline_1m` and `<symbol>@depth`, subscribed through a
//! single `SUBSCRIBE` frame. Depth events carry first/final update ids; the
//! snapshot endpoint returns `lastUpdateId` in the same sequence space.
//! Binance pings at the protocol level; the session answers with pongs.

use crate::candle::{build_kline, RawCandle};
use crate::error::FeedError;
use crate::session::HeartbeatPolicy;
use crate::venue::{string_levels, VenueCodec, VenueEvent};
use async_trait::async_trait;
use book::{BookError, DepthUpdate, SnapshotSource};
use chrono::Utc;
use common::{Depth, ExchangeName, Interval, MarketType};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const SPOT_WS: &str = "wss://stream.binance.com:9443/ws";
const FUTURES_USDT_WS: &str = "wss://fstream.binance.com/ws";
const FUTURES_COIN_WS: &str = "wss://dstream.binance.com/ws";

const SPOT_API: &str = "https://api.binance.com";
const FUTURES_USDT_API: &str = "https://fapi.binance.com";
const FUTURES_COIN_API: &str = "https://dapi.binance.com";

const SNAPSHOT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Binance wire codec for one market segment.
pub struct BinanceCodec {
    market: MarketType,
}

impl BinanceCodec {
    /// Codec for the given market segment.
    pub fn new(market: MarketType) -> Self {
        Self { market }
    }

    fn parse_kline(&self, data: &Value) -> Result<VenueEvent, FeedError> {
        let frame: KlineFrame =
            serde_json::from_value(data.clone()).map_err(|err| FeedError::Malformed(err.to_string()))?;
        let k = frame.kline;
        let raw = RawCandle {
            open_time_ms: k.open_time,
            close_time_ms: k.close_time,
            interval: k.interval.parse().unwrap_or(Interval::Min1),
            open: parse_decimal(&k.open)?,
            high: parse_decimal(&k.high)?,
            low: parse_decimal(&k.low)?,
            close: parse_decimal(&k.close)?,
            volume: parse_decimal(&k.volume)?,
            quote_volume: parse_decimal(&k.quote_volume)?,
            trade_count: k.trade_count,
            is_final: k.is_final,
        };
        Ok(VenueEvent::Kline(build_kline(
            ExchangeName::Binance,
            self.market,
            frame.symbol.to_uppercase(),
            raw,
            frame.event_time,
        )))
    }

    fn parse_depth(data: &Value) -> Result<VenueEvent, FeedError> {
        let frame: DepthFrame =
            serde_json::from_value(data.clone()).map_err(|err| FeedError::Malformed(err.to_string()))?;
        Ok(VenueEvent::Depth(DepthUpdate {
            event_time_ms: frame.event_time,
            symbol: frame.symbol.to_uppercase(),
            first_update_id: frame.first_update_id,
            final_update_id: frame.final_update_id,
            bids: frame.bids,
            asks: frame.asks,
        }))
    }
}

impl VenueCodec for BinanceCodec {
    fn exchange(&self) -> ExchangeName {
        ExchangeName::Binance
    }

    fn market(&self) -> MarketType {
        self.market
    }

    fn ws_url(&self) -> String {
        match self.market {
            MarketType::Spot => SPOT_WS,
            MarketType::FuturesUsdt => FUTURES_USDT_WS,
            MarketType::FuturesCoin => FUTURES_COIN_WS,
        }
        .to_string()
    }

    fn heartbeat(&self) -> HeartbeatPolicy {
        HeartbeatPolicy::ServerPing
    }

    fn subscribe_frames(&self, kline_symbols: &[String], depth_symbols: &[String]) -> Vec<Value> {
        let streams = streams(kline_symbols, depth_symbols);
        if streams.is_empty() {
            return Vec::new();
        }
        vec![json!({ "method": "SUBSCRIBE", "params": streams })]
    }

    fn unsubscribe_frames(&self, kline_symbols: &[String], depth_symbols: &[String]) -> Vec<Value> {
        let streams = streams(kline_symbols, depth_symbols);
        if streams.is_empty() {
            return Vec::new();
        }
        vec![json!({ "method": "UNSUBSCRIBE", "params": streams })]
    }

    fn parse_frame(&self, text: &str) -> Result<VenueEvent, FeedError> {
        let value: Value =
            serde_json::from_str(text).map_err(|err| FeedError::Malformed(err.to_string()))?;
        // combined-stream frames wrap the payload in {"stream":..,"data":..}
        let data = value.get("data").unwrap_or(&value);

        let Some(event) = data.get("e").and_then(Value::as_str) else {
            // {"result":null,"id":..} subscription acknowledgement
            return Ok(VenueEvent::Ack);
        };
        match event {
            "kline" => self.parse_kline(data),
            "depthUpdate" => Self::parse_depth(data),
            other => {
                debug!(event = other, "ignoring unknown binance event");
                Ok(VenueEvent::Ignore)
            }
        }
    }
}

fn streams(kline_symbols: &[String], depth_symbols: &[String]) -> Vec<String> {
    let mut streams = Vec::with_capacity(kline_symbols.len() + depth_symbols.len());
    for symbol in kline_symbols {
        streams.push(format!("{}@kline_1m", symbol.to_lowercase()));
    }
    for symbol in depth_symbols {
        streams.push(format!("{}@depth", symbol.to_lowercase()));
    }
    streams
}

fn parse_decimal(text: &str) -> Result<rust_decimal::Decimal, FeedError> {
    text.parse()
        .map_err(|_| FeedError::Malformed(format!("bad decimal: {text}")))
}

#[derive(Debug, Deserialize)]
struct KlineFrame {
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "k")]
    kline: KlinePayload,
}

#[derive(Debug, Deserialize)]
struct KlinePayload {
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "T")]
    close_time: i64,
    #[serde(rename = "i")]
    interval: String,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "n")]
    trade_count: i64,
    #[serde(rename = "x")]
    is_final: bool,
    #[serde(rename = "q")]
    quote_volume: String,
}

#[derive(Debug, Deserialize)]
struct DepthFrame {
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "U")]
    first_update_id: i64,
    #[serde(rename = "u")]
    final_update_id: i64,
    #[serde(rename = "b")]
    bids: Vec<[String; 2]>,
    #[serde(rename = "a")]
    asks: Vec<[String; 2]>,
}

#[derive(Debug, Deserialize)]
struct SnapshotResponse {
    #[serde(rename = "lastUpdateId")]
    last_update_id: i64,
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
}

/// Binance depth snapshot client.
pub struct BinanceRest {
    http: reqwest::Client,
    market: MarketType,
}

impl BinanceRest {
    /// Client for the given market segment.
    pub fn new(market: MarketType) -> Self {
        Self {
            http: reqwest::Client::new(),
            market,
        }
    }

    fn endpoint(&self) -> String {
        match self.market {
            MarketType::Spot => format!("{SPOT_API}/api/v3/depth"),
            MarketType::FuturesUsdt => format!("{FUTURES_USDT_API}/fapi/v1/depth"),
            MarketType::FuturesCoin => format!("{FUTURES_COIN_API}/dapi/v1/depth"),
        }
    }
}

#[async_trait]
impl SnapshotSource for BinanceRest {
    async fn depth_snapshot(&self, symbol: &str, limit: u32) -> Result<Depth, BookError> {
        let response = self
            .http
            .get(self.endpoint())
            .timeout(SNAPSHOT_HTTP_TIMEOUT)
            .query(&[("symbol", symbol.to_uppercase()), ("limit", limit.to_string())])
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| BookError::Snapshot(err.to_string()))?;
        let snapshot: SnapshotResponse = response
            .json()
            .await
            .map_err(|err| BookError::Snapshot(err.to_string()))?;

        Ok(Depth {
            exchange: ExchangeName::Binance,
            market: self.market,
            symbol: symbol.to_uppercase(),
            bids: string_levels(&snapshot.bids),
            asks: string_levels(&snapshot.asks),
            updated_at: Utc::now(),
            last_update_id: snapshot.last_update_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::PriceLevel;
    use rust_decimal_macros::dec;

    fn codec() -> BinanceCodec {
        BinanceCodec::new(MarketType::Spot)
    }

    #[test]
    fn one_batched_subscribe_frame() {
        let frames = codec().subscribe_frames(
            &["BTCUSDT".to_string(), "ETHUSDT".to_string()],
            &["BTCUSDT".to_string()],
        );
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["method"], "SUBSCRIBE");
        let params: Vec<&str> = frames[0]["params"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert_eq!(params, vec!["btcusdt@kline_1m", "ethusdt@kline_1m", "btcusdt@depth"]);
    }

    #[test]
    fn no_frames_for_empty_diff() {
        assert!(codec().subscribe_frames(&[], &[]).is_empty());
        assert!(codec().unsubscribe_frames(&[], &[]).is_empty());
    }

    #[test]
    fn depth_frame_parses_to_normalized_update() {
        let text = r#"{
            "e":"depthUpdate","E":1700000000123,"s":"BTCUSDT",
            "U":157,"u":160,
            "b":[["0.0024","10"],["0.0022","0"]],
            "a":[["0.0026","100"]]
        }"#;
        let event = codec().parse_frame(text).unwrap();
        let VenueEvent::Depth(update) = event else {
            panic!("expected depth event");
        };
        assert_eq!(update.symbol, "BTCUSDT");
        assert_eq!(update.first_update_id, 157);
        assert_eq!(update.final_update_id, 160);
        assert_eq!(update.event_time_ms, 1_700_000_000_123);
        assert_eq!(update.bids.len(), 2);
        assert_eq!(update.bids[1], ["0.0022".to_string(), "0".to_string()]);
        assert_eq!(update.asks.len(), 1);
    }

    #[test]
    fn combined_stream_wrapper_is_unwrapped() {
        let text = r#"{"stream":"btcusdt@depth","data":{
            "e":"depthUpdate","E":1,"s":"BTCUSDT","U":1,"u":2,"b":[],"a":[]
        }}"#;
        assert!(matches!(
            codec().parse_frame(text).unwrap(),
            VenueEvent::Depth(_)
        ));
    }

    #[test]
    fn kline_frame_parses_with_adapt_volume() {
        // event 10.333s into the bar's minute
        let text = r#"{
            "e":"kline","E":1700000050333,"s":"btcusdt",
            "k":{"t":1700000040000,"T":1700000099999,"s":"BTCUSDT","i":"1m",
                 "o":"100.1","c":"101.2","h":"102.0","l":"99.8",
                 "v":"62.0","n":7,"x":false,"q":"6270.5"}
        }"#;
        let event = codec().parse_frame(text).unwrap();
        let VenueEvent::Kline(kline) = event else {
            panic!("expected kline event");
        };
        assert_eq!(kline.symbol, "BTCUSDT");
        assert_eq!(kline.interval, Interval::Min1);
        assert_eq!(kline.open, dec!(100.1));
        assert_eq!(kline.trade_count, 7);
        assert!(!kline.is_final);
        assert_eq!(kline.adapt_volume, dec!(62.0) / dec!(10.333));
    }

    #[test]
    fn subscription_ack_is_recognized() {
        assert!(matches!(
            codec().parse_frame(r#"{"result":null,"id":1}"#).unwrap(),
            VenueEvent::Ack
        ));
    }

    #[test]
    fn unknown_event_is_ignored() {
        assert!(matches!(
            codec()
                .parse_frame(r#"{"e":"aggTrade","E":1,"s":"BTCUSDT"}"#)
                .unwrap(),
            VenueEvent::Ignore
        ));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(codec().parse_frame("not json").is_err());
    }

    #[test]
    fn snapshot_levels_parse_decimals() {
        let levels = string_levels(&[
            ["100.50".to_string(), "1.5".to_string()],
            ["bad".to_string(), "1".to_string()],
        ]);
        assert_eq!(levels, vec![PriceLevel::new(dec!(100.50), dec!(1.5))]);
    }

    #[test]
    fn endpoints_follow_market() {
        assert!(BinanceRest::new(MarketType::Spot).endpoint().contains("api/v3"));
        assert!(BinanceRest::new(MarketType::FuturesUsdt)
            .endpoint()
            .contains("fapi/v1"));
        assert!(BinanceRest::new(MarketType::FuturesCoin)
            .endpoint()
            .contains("dapi/v1"));
    }
}
