//! Quick start: three Binance venues, a handful of pairs, reads on a ticker.
//!
//! Log verbosity comes from the `LOG_LEVEL` env var
//! (`DEBUG|INFO|WARN|ERROR`, default `INFO`).

use anyhow::Result;
use common::{ExchangeName, MarketType};
use sdk::{ExchangeConfig, Sdk};
use std::time::Duration;
use tracing::Level;

fn init_logging() {
    let level = match std::env::var("LOG_LEVEL")
        .unwrap_or_default()
        .to_uppercase()
        .as_str()
    {
        "DEBUG" => Level::DEBUG,
        "WARN" => Level::WARN,
        "ERROR" => Level::ERROR,
        _ => Level::INFO,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let sdk = Sdk::new();

    sdk.add_exchanges(&[
        ExchangeConfig {
            exchange: ExchangeName::Binance,
            market: MarketType::Spot,
            weight: 3,
        },
        ExchangeConfig {
            exchange: ExchangeName::Binance,
            market: MarketType::FuturesUsdt,
            weight: 1,
        },
        ExchangeConfig {
            exchange: ExchangeName::Binance,
            market: MarketType::FuturesCoin,
            weight: 1,
        },
    ])
    .await?;

    // spot, a USDT-margined contract and a coin-margined contract
    sdk.add_symbols_and_subscribe(&[
        "BTC/USDT",
        "ETH/USDT",
        "BNB/USDT",
        "BTC/USDT:USDT",
        "ETH/USD:ETH",
    ])
    .await?;

    println!("streaming; Ctrl-C to exit");
    let mut ticker = tokio::time::interval(Duration::from_secs(3));
    loop {
        tokio::select! {
            _ = ticker.tick() => print_status(&sdk),
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    sdk.shutdown();
    Ok(())
}

fn print_status(sdk: &Sdk) {
    for symbol in ["BTC/USDT", "BTC/USDT:USDT", "ETH/USD:ETH"] {
        match sdk.watch_kline(symbol) {
            Some(kline) => println!(
                "{symbol} kline: o={} h={} l={} c={} v={}",
                kline.open, kline.high, kline.low, kline.close, kline.volume
            ),
            None => println!("{symbol} kline: no data yet"),
        }
        match sdk.watch_depth(symbol) {
            Some(depth) => println!(
                "{symbol} depth: {} bids / {} asks, best bid={:?} best ask={:?}",
                depth.bids.len(),
                depth.asks.len(),
                depth.best_bid().map(|l| l.price),
                depth.best_ask().map(|l| l.price),
            ),
            None => println!("{symbol} depth: no data yet"),
        }
    }
    println!("---");
}
