//! MEXC codec and snapshot client
//!
//! Spot v3 protobuf-free JSON channels: `spot@public.kline.v3.api@<symbol>@1m`
//! and `spot@public.depth.v3.api@<symbol>@20`, subscribed with a
//! `SUBSCRIPTION` method frame. Heartbeat is the same literal text ping/pong
//! exchange OKX uses. The REST depth endpoint is Binance-compatible.

use crate::candle::{build_kline, RawCandle};
use crate::error::FeedError;
use crate::session::HeartbeatPolicy;
use crate::venue::{VenueCodec, VenueEvent};
use async_trait::async_trait;
use book::{BookError, DepthUpdate, SnapshotSource};
use chrono::Utc;
use common::{Depth, ExchangeName, Interval, MarketType};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const WS_URL: &str = "wss://wbs.mexc.com/ws";
const API_URL: &str = "https://api.mexc.com";

const SNAPSHOT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// MEXC wire codec for one market segment.
pub struct MexcCodec {
    market: MarketType,
}

impl MexcCodec {
    /// Codec for the given market segment.
    pub fn new(market: MarketType) -> Self {
        Self { market }
    }

    fn parse_kline(&self, value: &Value) -> Result<VenueEvent, FeedError> {
        let symbol = value
            .get("s")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let event_time = value.get("t").and_then(Value::as_i64).unwrap_or_default();
        let Some(bar) = value.pointer("/d/k") else {
            return Err(FeedError::Malformed("kline frame without payload".to_string()));
        };

        let field = |key: &str| -> Result<&str, FeedError> {
            bar.get(key)
                .and_then(Value::as_str)
                .ok_or_else(|| FeedError::Malformed(format!("kline field {key} missing")))
        };
        let open_time = bar.get("t").and_then(Value::as_i64).unwrap_or_default() * 1000;
        let close_time = bar.get("T").and_then(Value::as_i64).unwrap_or_default() * 1000;
        let raw = RawCandle {
            open_time_ms: open_time,
            close_time_ms: close_time,
            interval: Interval::Min1,
            open: parse_decimal(field("o")?)?,
            high: parse_decimal(field("h")?)?,
            low: parse_decimal(field("l")?)?,
            close: parse_decimal(field("c")?)?,
            volume: parse_decimal(field("v")?)?,
            quote_volume: bar
                .get("a")
                .and_then(Value::as_str)
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            trade_count: 0,
            is_final: false,
        };
        Ok(VenueEvent::Kline(build_kline(
            ExchangeName::Mexc,
            self.market,
            symbol,
            raw,
            event_time,
        )))
    }

    fn parse_depth(value: &Value) -> Result<VenueEvent, FeedError> {
        let symbol = value
            .get("s")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if symbol.is_empty() {
            return Err(FeedError::Malformed("depth frame without symbol".to_string()));
        }
        let event_time = value.get("t").and_then(Value::as_i64).unwrap_or_default();
        let Some(data) = value.get("d") else {
            return Err(FeedError::Malformed("depth frame without payload".to_string()));
        };
        let version = data
            .get("r")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();

        Ok(VenueEvent::Depth(DepthUpdate {
            event_time_ms: event_time,
            symbol,
            first_update_id: version,
            final_update_id: version,
            bids: object_levels(data.get("bids")),
            asks: object_levels(data.get("asks")),
        }))
    }
}

impl VenueCodec for MexcCodec {
    fn exchange(&self) -> ExchangeName {
        ExchangeName::Mexc
    }

    fn market(&self) -> MarketType {
        self.market
    }

    fn ws_url(&self) -> String {
        WS_URL.to_string()
    }

    fn heartbeat(&self) -> HeartbeatPolicy {
        HeartbeatPolicy::ClientTextPing {
            ping: "ping",
            pong: "pong",
        }
    }

    fn subscribe_frames(&self, kline_symbols: &[String], depth_symbols: &[String]) -> Vec<Value> {
        let params = channels(kline_symbols, depth_symbols);
        if params.is_empty() {
            return Vec::new();
        }
        vec![json!({ "method": "SUBSCRIPTION", "params": params })]
    }

    fn unsubscribe_frames(&self, kline_symbols: &[String], depth_symbols: &[String]) -> Vec<Value> {
        let params = channels(kline_symbols, depth_symbols);
        if params.is_empty() {
            return Vec::new();
        }
        vec![json!({ "method": "UNSUBSCRIPTION", "params": params })]
    }

    fn parse_frame(&self, text: &str) -> Result<VenueEvent, FeedError> {
        let value: Value =
            serde_json::from_str(text).map_err(|err| FeedError::Malformed(err.to_string()))?;

        let Some(channel) = value.get("c").and_then(Value::as_str) else {
            // {"id":0,"code":0,"msg":"..."} subscription acknowledgement
            return Ok(VenueEvent::Ack);
        };
        if channel.contains("kline") {
            self.parse_kline(&value)
        } else if channel.contains("depth") {
            Self::parse_depth(&value)
        } else {
            debug!(channel, "ignoring unknown mexc channel");
            Ok(VenueEvent::Ignore)
        }
    }
}

fn channels(kline_symbols: &[String], depth_symbols: &[String]) -> Vec<String> {
    let mut params = Vec::with_capacity(kline_symbols.len() + depth_symbols.len());
    for symbol in kline_symbols {
        params.push(format!("spot@public.kline.v3.api@{symbol}@1m"));
    }
    for symbol in depth_symbols {
        params.push(format!("spot@public.depth.v3.api@{symbol}@20"));
    }
    params
}

/// Depth levels arrive as `{"p": price, "v": quantity}` objects.
fn object_levels(value: Option<&Value>) -> Vec<[String; 2]> {
    let Some(rows) = value.and_then(Value::as_array) else {
        return Vec::new();
    };
    rows.iter()
        .filter_map(|row| {
            let price = row.get("p").and_then(Value::as_str)?;
            let quantity = row.get("v").and_then(Value::as_str)?;
            Some([price.to_string(), quantity.to_string()])
        })
        .collect()
}

fn parse_decimal(text: &str) -> Result<rust_decimal::Decimal, FeedError> {
    text.parse()
        .map_err(|_| FeedError::Malformed(format!("bad decimal: {text}")))
}

#[derive(Debug, Deserialize)]
struct SnapshotResponse {
    #[serde(rename = "lastUpdateId")]
    last_update_id: i64,
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
}

/// MEXC depth snapshot client.
pub struct MexcRest {
    http: reqwest::Client,
    market: MarketType,
}

impl MexcRest {
    /// Client for the given market segment.
    pub fn new(market: MarketType) -> Self {
        Self {
            http: reqwest::Client::new(),
            market,
        }
    }
}

#[async_trait]
impl SnapshotSource for MexcRest {
    async fn depth_snapshot(&self, symbol: &str, limit: u32) -> Result<Depth, BookError> {
        let response = self
            .http
            .get(format!("{API_URL}/api/v3/depth"))
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
            exchange: ExchangeName::Mexc,
            market: self.market,
            symbol: symbol.to_uppercase(),
            bids: super::string_levels(&snapshot.bids),
            asks: super::string_levels(&snapshot.asks),
            updated_at: Utc::now(),
            last_update_id: snapshot.last_update_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn codec() -> MexcCodec {
        MexcCodec::new(MarketType::Spot)
    }

    #[test]
    fn subscription_frame_lists_channels() {
        let frames = codec().subscribe_frames(&["BTCUSDT".to_string()], &["ETHUSDT".to_string()]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["method"], "SUBSCRIPTION");
        let params: Vec<&str> = frames[0]["params"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert_eq!(
            params,
            vec![
                "spot@public.kline.v3.api@BTCUSDT@1m",
                "spot@public.depth.v3.api@ETHUSDT@20"
            ]
        );
    }

    #[test]
    fn depth_frame_parses_object_levels() {
        let text = r#"{
            "c":"spot@public.depth.v3.api@BTCUSDT@20","s":"BTCUSDT","t":1700000000123,
            "d":{"r":"3407459756","bids":[{"p":"20290.89","v":"0.670365"}],
                 "asks":[{"p":"20292.03","v":"0.0"}]}
        }"#;
        let VenueEvent::Depth(update) = codec().parse_frame(text).unwrap() else {
            panic!("expected depth event");
        };
        assert_eq!(update.symbol, "BTCUSDT");
        assert_eq!(update.final_update_id, 3_407_459_756);
        assert_eq!(update.bids, vec![["20290.89".to_string(), "0.670365".to_string()]]);
        assert_eq!(update.asks, vec![["20292.03".to_string(), "0.0".to_string()]]);
    }

    #[test]
    fn kline_frame_parses() {
        let text = r#"{
            "c":"spot@public.kline.v3.api@BTCUSDT@1m","s":"BTCUSDT","t":1700000050333,
            "d":{"e":"spot@public.kline.v3.api",
                 "k":{"t":1700000040,"T":1700000100,"i":"Min1",
                      "o":"100.1","c":"101.2","h":"102.0","l":"99.8",
                      "v":"62.0","a":"6270.5"}}
        }"#;
        let VenueEvent::Kline(kline) = codec().parse_frame(text).unwrap() else {
            panic!("expected kline event");
        };
        assert_eq!(kline.symbol, "BTCUSDT");
        assert_eq!(kline.close, dec!(101.2));
        // open bars divide by the event time's seconds-in-minute
        assert_eq!(kline.adapt_volume, dec!(62.0) / dec!(10.333));
    }

    #[test]
    fn ack_without_channel() {
        assert!(matches!(
            codec().parse_frame(r#"{"id":0,"code":0,"msg":"subscribed"}"#).unwrap(),
            VenueEvent::Ack
        ));
    }
}
