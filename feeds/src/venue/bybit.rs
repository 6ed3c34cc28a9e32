//! Bybit codec and snapshot client
//!
//! v5 public streams, one endpoint per category (spot/linear/inverse).
//! Topics: `kline.1.<symbol>` and `orderbook.50.<symbol>`. The client sends
//! `{"op":"ping"}` heartbeats. Depth events carry a single update id `u`;
//! both ends of the normalized range are set to it.

use crate::candle::{build_kline, RawCandle};
use crate::error::FeedError;
use crate::session::HeartbeatPolicy;
use crate::venue::{levels_from_arrays, VenueCodec, VenueEvent};
use async_trait::async_trait;
use book::{BookError, DepthUpdate, SnapshotSource};
use chrono::Utc;
use common::{Depth, ExchangeName, Interval, MarketType};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const SPOT_WS: &str = "wss://stream.bybit.com/v5/public/spot";
const LINEAR_WS: &str = "wss://stream.bybit.com/v5/public/linear";
const INVERSE_WS: &str = "wss://stream.bybit.com/v5/public/inverse";
const API_URL: &str = "https://api.bybit.com";

const SNAPSHOT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Bybit wire codec for one market segment.
pub struct BybitCodec {
    market: MarketType,
}

impl BybitCodec {
    /// Codec for the given market segment.
    pub fn new(market: MarketType) -> Self {
        Self { market }
    }

    fn parse_kline(&self, value: &Value) -> Result<VenueEvent, FeedError> {
        let symbol = value
            .get("topic")
            .and_then(Value::as_str)
            .and_then(|topic| topic.rsplit('.').next())
            .unwrap_or_default()
            .to_string();
        let Some(row) = value
            .get("data")
            .and_then(Value::as_array)
            .and_then(|rows| rows.last())
        else {
            return Ok(VenueEvent::Ignore);
        };
        let bar: KlineRow = serde_json::from_value(row.clone())
            .map_err(|err| FeedError::Malformed(err.to_string()))?;
        let event_time = bar.timestamp;
        let raw = RawCandle {
            open_time_ms: bar.start,
            close_time_ms: bar.end,
            interval: Interval::Min1,
            open: parse_decimal(&bar.open)?,
            high: parse_decimal(&bar.high)?,
            low: parse_decimal(&bar.low)?,
            close: parse_decimal(&bar.close)?,
            volume: parse_decimal(&bar.volume)?,
            quote_volume: bar
                .turnover
                .as_deref()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            trade_count: 0,
            is_final: bar.confirm,
        };
        Ok(VenueEvent::Kline(build_kline(
            ExchangeName::Bybit,
            self.market,
            symbol,
            raw,
            event_time,
        )))
    }

    fn parse_orderbook(value: &Value) -> Result<VenueEvent, FeedError> {
        let Some(data) = value.get("data") else {
            return Ok(VenueEvent::Ignore);
        };
        let symbol = data
            .get("s")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if symbol.is_empty() {
            return Err(FeedError::Malformed("orderbook frame without symbol".to_string()));
        }
        let update_id = data.get("u").and_then(Value::as_i64).unwrap_or_default();
        let event_time = value.get("ts").and_then(Value::as_i64).unwrap_or_default();

        Ok(VenueEvent::Depth(DepthUpdate {
            event_time_ms: event_time,
            symbol,
            first_update_id: update_id,
            final_update_id: update_id,
            bids: levels_from_arrays(data.get("b")),
            asks: levels_from_arrays(data.get("a")),
        }))
    }

    fn category(&self) -> &'static str {
        match self.market {
            MarketType::Spot => "spot",
            MarketType::FuturesUsdt => "linear",
            MarketType::FuturesCoin => "inverse",
        }
    }
}

impl VenueCodec for BybitCodec {
    fn exchange(&self) -> ExchangeName {
        ExchangeName::Bybit
    }

    fn market(&self) -> MarketType {
        self.market
    }

    fn ws_url(&self) -> String {
        match self.market {
            MarketType::Spot => SPOT_WS,
            MarketType::FuturesUsdt => LINEAR_WS,
            MarketType::FuturesCoin => INVERSE_WS,
        }
        .to_string()
    }

    fn heartbeat(&self) -> HeartbeatPolicy {
        HeartbeatPolicy::AppLevelPing {
            outbound: Some(r#"{"op":"ping"}"#),
            inbound_marker: Some(r#""op":"pong""#),
            reply: None,
        }
    }

    fn subscribe_frames(&self, kline_symbols: &[String], depth_symbols: &[String]) -> Vec<Value> {
        let args = topics(kline_symbols, depth_symbols);
        if args.is_empty() {
            return Vec::new();
        }
        vec![json!({ "op": "subscribe", "args": args })]
    }

    fn unsubscribe_frames(&self, kline_symbols: &[String], depth_symbols: &[String]) -> Vec<Value> {
        let args = topics(kline_symbols, depth_symbols);
        if args.is_empty() {
            return Vec::new();
        }
        vec![json!({ "op": "unsubscribe", "args": args })]
    }

    fn parse_frame(&self, text: &str) -> Result<VenueEvent, FeedError> {
        let value: Value =
            serde_json::from_str(text).map_err(|err| FeedError::Malformed(err.to_string()))?;

        if value.get("op").is_some() {
            // subscribe/unsubscribe acknowledgements (pongs never reach here)
            return Ok(VenueEvent::Ack);
        }

        let topic = value.get("topic").and_then(Value::as_str).unwrap_or_default();
        if topic.starts_with("kline.") {
            self.parse_kline(&value)
        } else if topic.starts_with("orderbook.") {
            Self::parse_orderbook(&value)
        } else {
            debug!(topic, "ignoring unknown bybit topic");
            Ok(VenueEvent::Ignore)
        }
    }
}

fn topics(kline_symbols: &[String], depth_symbols: &[String]) -> Vec<String> {
    let mut topics = Vec::with_capacity(kline_symbols.len() + depth_symbols.len());
    for symbol in kline_symbols {
        topics.push(format!("kline.1.{symbol}"));
    }
    for symbol in depth_symbols {
        topics.push(format!("orderbook.50.{symbol}"));
    }
    topics
}

fn parse_decimal(text: &str) -> Result<rust_decimal::Decimal, FeedError> {
    text.parse()
        .map_err(|_| FeedError::Malformed(format!("bad decimal: {text}")))
}

#[derive(Debug, Deserialize)]
struct KlineRow {
    start: i64,
    end: i64,
    open: String,
    high: String,
    low: String,
    close: String,
    volume: String,
    turnover: Option<String>,
    confirm: bool,
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct OrderbookResponse {
    #[serde(rename = "retCode")]
    ret_code: i64,
    result: OrderbookResult,
}

#[derive(Debug, Deserialize)]
struct OrderbookResult {
    b: Vec<[String; 2]>,
    a: Vec<[String; 2]>,
    u: i64,
}

/// Bybit depth snapshot client.
pub struct BybitRest {
    http: reqwest::Client,
    market: MarketType,
}

impl BybitRest {
    /// Client for the given market segment.
    pub fn new(market: MarketType) -> Self {
        Self {
            http: reqwest::Client::new(),
            market,
        }
    }
}

#[async_trait]
impl SnapshotSource for BybitRest {
    async fn depth_snapshot(&self, symbol: &str, limit: u32) -> Result<Depth, BookError> {
        let category = BybitCodec::new(self.market).category();
        let response = self
            .http
            .get(format!("{API_URL}/v5/market/orderbook"))
            .timeout(SNAPSHOT_HTTP_TIMEOUT)
            .query(&[
                ("category", category.to_string()),
                ("symbol", symbol.to_uppercase()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| BookError::Snapshot(err.to_string()))?;
        let body: OrderbookResponse = response
            .json()
            .await
            .map_err(|err| BookError::Snapshot(err.to_string()))?;
        if body.ret_code != 0 {
            return Err(BookError::Snapshot(format!(
                "bybit error code {}",
                body.ret_code
            )));
        }

        Ok(Depth {
            exchange: ExchangeName::Bybit,
            market: self.market,
            symbol: symbol.to_uppercase(),
            bids: super::string_levels(&body.result.b),
            asks: super::string_levels(&body.result.a),
            updated_at: Utc::now(),
            last_update_id: body.result.u.to_string(),
        })
    }
}
