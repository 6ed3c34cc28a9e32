//! OKX codec and snapshot client
//!
//! All market segments share the public v5 endpoint; instruments are told
//! apart by `instId`. Channels: `candle1m` and `books`. OKX keeps streams
//! alive with a literal text ping/pong exchange initiated by the client.
//! Depth events carry `seqId`/`prevSeqId`; the REST books endpoint has no
//! sequence id, so its `ts` stands in as the snapshot version.

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

const WS_URL: &str = "wss://ws.okx.com:8443/ws/v5/public";
const API_URL: &str = "https://www.okx.com";

const SNAPSHOT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// OKX wire codec for one market segment.
pub struct OkxCodec {
    market: MarketType,
}

impl OkxCodec {
    /// Codec for the given market segment.
    pub fn new(market: MarketType) -> Self {
        Self { market }
    }

    fn parse_candles(&self, inst_id: &str, channel: &str, data: &Value) -> Result<VenueEvent, FeedError> {
        let interval = channel
            .strip_prefix("candle")
            .and_then(|bar| bar.to_lowercase().parse().ok())
            .unwrap_or(Interval::Min1);
        let Some(rows) = data.as_array() else {
            return Err(FeedError::Malformed("candle data is not an array".to_string()));
        };
        // pushes batch several bars; only the newest one matters downstream
        let Some(row) = rows.last().and_then(Value::as_array) else {
            return Ok(VenueEvent::Ignore);
        };
        if row.len() < 6 {
            return Err(FeedError::Malformed("candle row too short".to_string()));
        }

        let open_time: i64 = row_str(row, 0)?
            .parse()
            .map_err(|_| FeedError::Malformed("bad candle timestamp".to_string()))?;
        let close_time = open_time + interval.as_millis() - 1;
        let is_final = row.get(8).and_then(Value::as_str) == Some("1");
        let event_time = if is_final {
            close_time
        } else {
            Utc::now().timestamp_millis()
        };
        let raw = RawCandle {
            open_time_ms: open_time,
            close_time_ms: close_time,
            interval,
            open: parse_decimal(row_str(row, 1)?)?,
            high: parse_decimal(row_str(row, 2)?)?,
            low: parse_decimal(row_str(row, 3)?)?,
            close: parse_decimal(row_str(row, 4)?)?,
            volume: parse_decimal(row_str(row, 5)?)?,
            quote_volume: row
                .get(7)
                .and_then(Value::as_str)
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            trade_count: 0,
            is_final,
        };
        Ok(VenueEvent::Kline(build_kline(
            ExchangeName::Okx,
            self.market,
            inst_id.to_string(),
            raw,
            event_time,
        )))
    }

    fn parse_books(inst_id: &str, data: &Value) -> Result<VenueEvent, FeedError> {
        let Some(entry) = data.as_array().and_then(|rows| rows.last()) else {
            return Ok(VenueEvent::Ignore);
        };
        let event_time: i64 = entry
            .get("ts")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();
        let seq_id = entry.get("seqId").and_then(Value::as_i64).unwrap_or_default();
        let prev_seq_id = entry.get("prevSeqId").and_then(Value::as_i64).unwrap_or(-1);
        let first_update_id = if prev_seq_id >= 0 { prev_seq_id + 1 } else { seq_id };

        Ok(VenueEvent::Depth(DepthUpdate {
            event_time_ms: event_time,
            symbol: inst_id.to_string(),
            first_update_id,
            final_update_id: seq_id,
            bids: levels_from_arrays(entry.get("bids")),
            asks: levels_from_arrays(entry.get("asks")),
        }))
    }
}

impl VenueCodec for OkxCodec {
    fn exchange(&self) -> ExchangeName {
        ExchangeName::Okx
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
        let args = channel_args(kline_symbols, depth_symbols);
        if args.is_empty() {
            return Vec::new();
        }
        vec![json!({ "op": "subscribe", "args": args })]
    }

    fn unsubscribe_frames(&self, kline_symbols: &[String], depth_symbols: &[String]) -> Vec<Value> {
        let args = channel_args(kline_symbols, depth_symbols);
        if args.is_empty() {
            return Vec::new();
        }
        vec![json!({ "op": "unsubscribe", "args": args })]
    }

    fn parse_frame(&self, text: &str) -> Result<VenueEvent, FeedError> {
        let value: Value =
            serde_json::from_str(text).map_err(|err| FeedError::Malformed(err.to_string()))?;

        if let Some(event) = value.get("event").and_then(Value::as_str) {
            return match event {
                "subscribe" | "unsubscribe" => Ok(VenueEvent::Ack),
                "error" => Err(FeedError::Malformed(text.to_string())),
                other => {
                    debug!(event = other, "ignoring okx event");
                    Ok(VenueEvent::Ignore)
                }
            };
        }

        let (Some(channel), Some(inst_id)) = (
            value.pointer("/arg/channel").and_then(Value::as_str),
            value.pointer("/arg/instId").and_then(Value::as_str),
        ) else {
            debug!("okx frame without arg, ignoring");
            return Ok(VenueEvent::Ignore);
        };
        let null = Value::Null;
        let data = value.get("data").unwrap_or(&null);

        if channel.starts_with("candle") {
            self.parse_candles(inst_id, channel, data)
        } else if channel.starts_with("books") {
            Self::parse_books(inst_id, data)
        } else {
            debug!(channel, "ignoring unknown okx channel");
            Ok(VenueEvent::Ignore)
        }
    }
}

fn channel_args(kline_symbols: &[String], depth_symbols: &[String]) -> Vec<Value> {
    let mut args = Vec::with_capacity(kline_symbols.len() + depth_symbols.len());
    for symbol in kline_symbols {
        args.push(json!({ "channel": "candle1m", "instId": symbol }));
    }
    for symbol in depth_symbols {
        args.push(json!({ "channel": "books", "instId": symbol }));
    }
    args
}

fn row_str(row: &[Value], index: usize) -> Result<&str, FeedError> {
    row.get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| FeedError::Malformed(format!("candle column {index} missing")))
}

fn parse_decimal(text: &str) -> Result<rust_decimal::Decimal, FeedError> {
    text.parse()
        .map_err(|_| FeedError::Malformed(format!("bad decimal: {text}")))
}

#[derive(Debug, Deserialize)]
struct BooksResponse {
    code: String,
    data: Vec<BooksEntry>,
}

#[derive(Debug, Deserialize)]
struct BooksEntry {
    bids: Vec<Vec<String>>,
    asks: Vec<Vec<String>>,
    ts: String,
}

/// OKX depth snapshot client.
pub struct OkxRest {
    http: reqwest::Client,
    market: MarketType,
}

impl OkxRest {
    /// Client for the given market segment.
    pub fn new(market: MarketType) -> Self {
        Self {
            http: reqwest::Client::new(),
            market,
        }
    }
}

#[async_trait]
impl SnapshotSource for OkxRest {
    async fn depth_snapshot(&self, symbol: &str, limit: u32) -> Result<Depth, BookError> {
        let response = self
            .http
            .get(format!("{API_URL}/api/v5/market/books"))
            .timeout(SNAPSHOT_HTTP_TIMEOUT)
            .query(&[("instId", symbol.to_string()), ("sz", limit.to_string())])
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| BookError::Snapshot(err.to_string()))?;
        let books: BooksResponse = response
            .json()
            .await
            .map_err(|err| BookError::Snapshot(err.to_string()))?;
        if books.code != "0" {
            return Err(BookError::Snapshot(format!("okx error code {}", books.code)));
        }
        let entry = books
            .data
            .into_iter()
            .next()
            .ok_or_else(|| BookError::Snapshot("empty books response".to_string()))?;

        Ok(Depth {
            exchange: ExchangeName::Okx,
            market: self.market,
            symbol: symbol.to_string(),
            bids: vec_levels(&entry.bids),
            asks: vec_levels(&entry.asks),
            updated_at: Utc::now(),
            last_update_id: entry.ts,
        })
    }
}

fn vec_levels(levels: &[Vec<String>]) -> Vec<PriceLevel> {
    levels
        .iter()
        .filter_map(|row| {
            let price = row.first()?.parse().ok()?;
            let quantity = row.get(1)?.parse().ok()?;
            Some(PriceLevel::new(price, quantity))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn codec() -> OkxCodec {
        OkxCodec::new(MarketType::Spot)
    }

    #[test]
    fn subscribe_frame_pairs_channels_with_instruments() {
        let frames = codec().subscribe_frames(
            &["BTC-USDT".to_string()],
            &["BTC-USDT".to_string(), "ETH-USDT".to_string()],
        );
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["op"], "subscribe");
        let args = frames[0]["args"].as_array().unwrap();
        assert_eq!(args.len(), 3);
        assert_eq!(args[0]["channel"], "candle1m");
        assert_eq!(args[1]["channel"], "books");
        assert_eq!(args[1]["instId"], "BTC-USDT");
    }

    #[test]
    fn books_update_maps_sequence_ids() {
        let text = r#"{
            "arg":{"channel":"books","instId":"BTC-USDT"},
            "action":"update",
            "data":[{"asks":[["8476.98","415","0","13"]],
                     "bids":[["8476.97","256","0","12"]],
                     "ts":"1597026383085","seqId":123456,"prevSeqId":123455}]
        }"#;
        let VenueEvent::Depth(update) = codec().parse_frame(text).unwrap() else {
            panic!("expected depth event");
        };
        assert_eq!(update.symbol, "BTC-USDT");
        assert_eq!(update.first_update_id, 123_456);
        assert_eq!(update.final_update_id, 123_456);
        assert_eq!(update.event_time_ms, 1_597_026_383_085);
        assert_eq!(update.asks, vec![["8476.98".to_string(), "415".to_string()]]);
    }

    #[test]
    fn final_candle_parses_with_close_time_derivation() {
        let text = r#"{
            "arg":{"channel":"candle1m","instId":"BTC-USDT"},
            "data":[["1700000040000","100.1","102.0","99.8","101.2","62.0","1.2","6270.5","1"]]
        }"#;
        let VenueEvent::Kline(kline) = codec().parse_frame(text).unwrap() else {
            panic!("expected kline event");
        };
        assert!(kline.is_final);
        assert_eq!(kline.symbol, "BTC-USDT");
        assert_eq!(kline.open, dec!(100.1));
        assert_eq!(kline.close_time.timestamp_millis(), 1_700_000_040_000 + 59_999);
        // final bars divide by the close time's 59.999s
        assert_eq!(kline.adapt_volume, dec!(62.0) / dec!(59.999));
    }

    #[test]
    fn ack_and_errors() {
        assert!(matches!(
            codec()
                .parse_frame(r#"{"event":"subscribe","arg":{"channel":"books","instId":"BTC-USDT"}}"#)
                .unwrap(),
            VenueEvent::Ack
        ));
        assert!(codec()
            .parse_frame(r#"{"event":"error","code":"60012","msg":"bad request"}"#)
            .is_err());
    }
}
