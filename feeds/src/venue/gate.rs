//! Gate codec and snapshot client
//!
//! JSON-RPC-style channels, one subscribe frame per symbol. Spot uses
//! `spot.candlesticks` / `spot.order_book`; the futures endpoints mirror
//! them under the `futures.` prefix. The server pings with
//! `{"method":"server.ping"}` and expects a `server.pong` reply.

use crate::candle::{build_kline, RawCandle};
use crate::error::FeedError;
use crate::session::HeartbeatPolicy;
use crate::venue::{levels_from_arrays, VenueCodec, VenueEvent};
use async_trait::async_trait;
use book::{BookError, DepthUpdate, SnapshotSource};
use chrono::Utc;
use common::{Depth, ExchangeName, Interval, MarketType, PriceLevel};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const SPOT_WS: &str = "wss://api.gateio.ws/ws/v4/";
const FUTURES_USDT_WS: &str = "wss://fx-ws.gateio.ws/v4/ws/usdt";
const FUTURES_COIN_WS: &str = "wss://fx-ws.gateio.ws/v4/ws/btc";
const API_URL: &str = "https://api.gateio.ws/api/v4";

const SNAPSHOT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Gate wire codec for one market segment.
pub struct GateCodec {
    market: MarketType,
}

impl GateCodec {
    /// Codec for the given market segment.
    pub fn new(market: MarketType) -> Self {
        Self { market }
    }

    fn channel_prefix(&self) -> &'static str {
        match self.market {
            MarketType::Spot => "spot",
            MarketType::FuturesUsdt | MarketType::FuturesCoin => "futures",
        }
    }

    fn candlesticks_channel(&self) -> String {
        format!("{}.candlesticks", self.channel_prefix())
    }

    fn order_book_channel(&self) -> String {
        format!("{}.order_book", self.channel_prefix())
    }

    fn parse_candlesticks(&self, result: &Value) -> Result<VenueEvent, FeedError> {
        let field = |key: &str| -> Result<&str, FeedError> {
            result
                .get(key)
                .and_then(Value::as_str)
                .ok_or_else(|| FeedError::Malformed(format!("candlestick field {key} missing")))
        };
        let symbol = field("currency_pair")?.to_string();
        let interval: Interval = result
            .get("interval")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .unwrap_or(Interval::Min1);
        let open_time: i64 = field("t")?
            .parse()
            .map_err(|_| FeedError::Malformed("bad candlestick timestamp".to_string()))?;
        let open_time_ms = open_time * 1000;
        let close_time_ms = open_time_ms + interval.as_millis() - 1;
        let is_final = result
            .get("window_close")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        let event_time = if is_final {
            close_time_ms
        } else {
            Utc::now().timestamp_millis()
        };
        let raw = RawCandle {
            open_time_ms,
            close_time_ms,
            interval,
            open: parse_decimal(field("open")?)?,
            high: parse_decimal(field("high")?)?,
            low: parse_decimal(field("low")?)?,
            close: parse_decimal(field("close")?)?,
            volume: parse_decimal(field("base_volume")?)?,
            quote_volume: result
                .get("quote_volume")
                .and_then(Value::as_str)
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            trade_count: 0,
            is_final,
        };
        Ok(VenueEvent::Kline(build_kline(
            ExchangeName::Gate,
            self.market,
            symbol,
            raw,
            event_time,
        )))
    }

    fn parse_order_book(result: &Value) -> Result<VenueEvent, FeedError> {
        let symbol = result
            .get("s")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if symbol.is_empty() {
            return Err(FeedError::Malformed("order_book frame without symbol".to_string()));
        }
        let update_id = result
            .get("lastUpdateId")
            .and_then(Value::as_i64)
            .unwrap_or_default();
        let event_time = result.get("t").and_then(Value::as_i64).unwrap_or_default();

        Ok(VenueEvent::Depth(DepthUpdate {
            event_time_ms: event_time,
            symbol,
            first_update_id: update_id,
            final_update_id: update_id,
            bids: levels_from_arrays(result.get("bids")),
            asks: levels_from_arrays(result.get("asks")),
        }))
    }
}

impl VenueCodec for GateCodec {
    fn exchange(&self) -> ExchangeName {
        ExchangeName::Gate
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
        HeartbeatPolicy::AppLevelPing {
            outbound: None,
            inbound_marker: Some("server.ping"),
            reply: Some(r#"{"method":"server.pong","params":[],"id":null}"#),
        }
    }

    fn subscribe_frames(&self, kline_symbols: &[String], depth_symbols: &[String]) -> Vec<Value> {
        self.frames("subscribe", kline_symbols, depth_symbols)
    }

    fn unsubscribe_frames(&self, kline_symbols: &[String], depth_symbols: &[String]) -> Vec<Value> {
        self.frames("unsubscribe", kline_symbols, depth_symbols)
    }

    fn parse_frame(&self, text: &str) -> Result<VenueEvent, FeedError> {
        let value: Value =
            serde_json::from_str(text).map_err(|err| FeedError::Malformed(err.to_string()))?;

        if value.get("event").and_then(Value::as_str) == Some("subscribe")
            || value.get("event").and_then(Value::as_str) == Some("unsubscribe")
        {
            return Ok(VenueEvent::Ack);
        }

        let channel = value.get("channel").and_then(Value::as_str).unwrap_or_default();
        let Some(result) = value.get("result") else {
            debug!(channel, "gate frame without result, ignoring");
            return Ok(VenueEvent::Ignore);
        };

        if channel == self.candlesticks_channel() {
            self.parse_candlesticks(result)
        } else if channel == self.order_book_channel() {
            Self::parse_order_book(result)
        } else {
            debug!(channel, "ignoring unknown gate channel");
            Ok(VenueEvent::Ignore)
        }
    }
}

impl GateCodec {
    /// One frame per symbol: Gate's protocol does not batch payloads.
    fn frames(&self, event: &str, kline_symbols: &[String], depth_symbols: &[String]) -> Vec<Value> {
        let now = Utc::now().timestamp();
        let mut frames = Vec::with_capacity(kline_symbols.len() + depth_symbols.len());
        for symbol in kline_symbols {
            frames.push(json!({
                "time": now,
                "channel": self.candlesticks_channel(),
                "event": event,
                "payload": ["1m", symbol],
            }));
        }
        for symbol in depth_symbols {
            frames.push(json!({
                "time": now,
                "channel": self.order_book_channel(),
                "event": event,
                "payload": [symbol, "20", "100ms"],
            }));
        }
        frames
    }
}

fn parse_decimal(text: &str) -> Result<rust_decimal::Decimal, FeedError> {
    text.parse()
        .map_err(|_| FeedError::Malformed(format!("bad decimal: {text}")))
}

#[derive(Debug, Deserialize)]
struct SpotOrderBookResponse {
    id: i64,
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
}

#[derive(Debug, Deserialize)]
struct FuturesOrderBookResponse {
    id: i64,
    bids: Vec<FuturesLevel>,
    asks: Vec<FuturesLevel>,
}

#[derive(Debug, Deserialize)]
struct FuturesLevel {
    p: String,
    s: i64,
}

/// Gate depth snapshot client.
pub struct GateRest {
    http: reqwest::Client,
    market: MarketType,
}

impl GateRest {
    /// Client for the given market segment.
    pub fn new(market: MarketType) -> Self {
        Self {
            http: reqwest::Client::new(),
            market,
        }
    }

    async fn spot_snapshot(&self, symbol: &str, limit: u32) -> Result<Depth, BookError> {
        let response = self
            .http
            .get(format!("{API_URL}/spot/order_book"))
            .timeout(SNAPSHOT_HTTP_TIMEOUT)
            .query(&[
                ("currency_pair", symbol.to_string()),
                ("limit", limit.to_string()),
                ("with_id", "true".to_string()),
            ])
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| BookError::Snapshot(err.to_string()))?;
        let book: SpotOrderBookResponse = response
            .json()
            .await
            .map_err(|err| BookError::Snapshot(err.to_string()))?;

        Ok(Depth {
            exchange: ExchangeName::Gate,
            market: self.market,
            symbol: symbol.to_string(),
            bids: super::string_levels(&book.bids),
            asks: super::string_levels(&book.asks),
            updated_at: Utc::now(),
            last_update_id: book.id.to_string(),
        })
    }

    async fn futures_snapshot(&self, symbol: &str, limit: u32) -> Result<Depth, BookError> {
        let settle = match self.market {
            MarketType::FuturesCoin => "btc",
            _ => "usdt",
        };
        let response = self
            .http
            .get(format!("{API_URL}/futures/{settle}/order_book"))
            .timeout(SNAPSHOT_HTTP_TIMEOUT)
            .query(&[
                ("contract", symbol.to_string()),
                ("limit", limit.to_string()),
                ("with_id", "true".to_string()),
            ])
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| BookError::Snapshot(err.to_string()))?;
        let book: FuturesOrderBookResponse = response
            .json()
            .await
            .map_err(|err| BookError::Snapshot(err.to_string()))?;

        Ok(Depth {
            exchange: ExchangeName::Gate,
            market: self.market,
            symbol: symbol.to_string(),
            bids: futures_levels(&book.bids),
            asks: futures_levels(&book.asks),
            updated_at: Utc::now(),
            last_update_id: book.id.to_string(),
        })
    }
}

#[async_trait]
impl SnapshotSource for GateRest {
    async fn depth_snapshot(&self, symbol: &str, limit: u32) -> Result<Depth, BookError> {
        match self.market {
            MarketType::Spot => self.spot_snapshot(symbol, limit).await,
            MarketType::FuturesUsdt | MarketType::FuturesCoin => {
                self.futures_snapshot(symbol, limit).await
            }
        }
    }
}

fn futures_levels(levels: &[FuturesLevel]) -> Vec<PriceLevel> {
    levels
        .iter()
        .filter_map(|level| {
            Some(PriceLevel::new(
                level.p.parse().ok()?,
                rust_decimal::Decimal::from(level.s),
            ))
        })
        .collect()
}
