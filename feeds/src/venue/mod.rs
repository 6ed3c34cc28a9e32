//! Per-venue wire formats behind a uniform codec interface
//!
//! A codec owns everything venue-specific: endpoints, heartbeat payloads,
//! subscribe frame layout and frame parsing. Parsing returns a normalized
//! [`VenueEvent`], so the connector and the book engine never see raw venue
//! JSON.

pub mod binance;
pub mod bybit;
pub mod gate;
pub mod mexc;
pub mod okx;

use crate::connector::Connector;
use crate::error::FeedError;
use crate::session::HeartbeatPolicy;
use book::DepthUpdate;
use cache::SnapshotCache;
use common::{ExchangeName, Kline, MarketType, PriceLevel};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub use binance::{BinanceCodec, BinanceRest};
pub use bybit::{BybitCodec, BybitRest};
pub use gate::{GateCodec, GateRest};
pub use mexc::{MexcCodec, MexcRest};
pub use okx::{OkxCodec, OkxRest};

/// A frame normalized out of venue-specific JSON.
#[derive(Debug)]
pub enum VenueEvent {
    /// Incremental depth update
    Depth(DepthUpdate),
    /// Candle update
    Kline(Kline),
    /// Subscription acknowledgement; logged and dropped
    Ack,
    /// Recognized but irrelevant traffic (unknown channels, empty pushes)
    Ignore,
}

/// Venue-specific wire knowledge: endpoints, heartbeats, subscribe frames
/// and frame parsing.
pub trait VenueCodec: Send + Sync {
    /// Which exchange this codec speaks for.
    fn exchange(&self) -> ExchangeName;

    /// Which market segment this codec serves.
    fn market(&self) -> MarketType;

    /// Streaming endpoint.
    fn ws_url(&self) -> String;

    /// Keepalive behavior for this venue.
    fn heartbeat(&self) -> HeartbeatPolicy;

    /// Frames subscribing the given symbols; most venues batch everything
    /// into a single frame, some require one frame per symbol.
    fn subscribe_frames(&self, kline_symbols: &[String], depth_symbols: &[String]) -> Vec<Value>;

    /// Frames unsubscribing the given symbols.
    fn unsubscribe_frames(&self, kline_symbols: &[String], depth_symbols: &[String]) -> Vec<Value>;

    /// Decode one text frame into a normalized event.
    fn parse_frame(&self, text: &str) -> Result<VenueEvent, FeedError>;
}

/// Build the connector for a venue: its codec, snapshot client and session,
/// wired to the shared cache and cancellation tree.
pub fn connector_for(
    exchange: ExchangeName,
    market: MarketType,
    cache: Arc<SnapshotCache>,
    cancel: CancellationToken,
) -> Arc<Connector> {
    match exchange {
        ExchangeName::Binance => Connector::new(
            Arc::new(BinanceCodec::new(market)),
            Arc::new(BinanceRest::new(market)),
            cache,
            cancel,
        ),
        ExchangeName::Okx => Connector::new(
            Arc::new(OkxCodec::new(market)),
            Arc::new(OkxRest::new(market)),
            cache,
            cancel,
        ),
        ExchangeName::Bybit => Connector::new(
            Arc::new(BybitCodec::new(market)),
            Arc::new(BybitRest::new(market)),
            cache,
            cancel,
        ),
        ExchangeName::Gate => Connector::new(
            Arc::new(GateCodec::new(market)),
            Arc::new(GateRest::new(market)),
            cache,
            cancel,
        ),
        ExchangeName::Mexc => Connector::new(
            Arc::new(MexcCodec::new(market)),
            Arc::new(MexcRest::new(market)),
            cache,
            cancel,
        ),
    }
}

/// Shared helper: parse `[price, qty]` string arrays out of a JSON array of
/// arrays, tolerating extra columns (some venues append order counts).
pub(crate) fn levels_from_arrays(value: Option<&Value>) -> Vec<[String; 2]> {
    let Some(rows) = value.and_then(Value::as_array) else {
        return Vec::new();
    };
    rows.iter()
        .filter_map(|row| {
            let row = row.as_array()?;
            let price = row.first().and_then(Value::as_str)?;
            let quantity = row.get(1).and_then(Value::as_str)?;
            Some([price.to_string(), quantity.to_string()])
        })
        .collect()
}

/// Shared helper: convert `[price, qty]` string pairs from a REST snapshot
/// into typed levels, skipping anything unparsable.
pub(crate) fn string_levels(levels: &[[String; 2]]) -> Vec<PriceLevel> {
    levels
        .iter()
        .filter_map(|[price, quantity]| {
            Some(PriceLevel::new(price.parse().ok()?, quantity.parse().ok()?))
        })
        .collect()
}
