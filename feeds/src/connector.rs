//! One venue connector: session, subscription intent, book engine, recovery
//!
//! Each connector owns a single streaming session to one
//! `(exchange, market)` pair. Its read loop parses frames through the venue
//! codec, feeds depth updates into the book engine and candles straight into
//! the cache. On any session failure the loop closes the socket, waits out
//! the backoff, reconnects, and replays the full subscription intent in one
//! pass; depth snapshots are *not* refetched proactively — the engine asks
//! for one when the next depth event arrives, keeping recovery cost
//! proportional to activity.

use crate::error::FeedError;
use crate::reconnect::Backoff;
use crate::session::{Session, SessionReader};
use crate::venue::{VenueCodec, VenueEvent};
use book::{DepthEngine, SnapshotSource};
use cache::{SnapshotCache, SubscriptionRegistry};
use common::{ExchangeName, MarketType};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Streaming connector for one `(exchange, market)` pair.
pub struct Connector {
    codec: Arc<dyn VenueCodec>,
    snapshots: Arc<dyn SnapshotSource>,
    session: Session,
    registry: SubscriptionRegistry,
    cache: Arc<SnapshotCache>,
    cancel: CancellationToken,
    started: AtomicBool,
}

impl Connector {
    /// Wire a connector from its venue codec and snapshot client.
    pub fn new(
        codec: Arc<dyn VenueCodec>,
        snapshots: Arc<dyn SnapshotSource>,
        cache: Arc<SnapshotCache>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let session = Session::new(codec.ws_url(), codec.heartbeat());
        Arc::new(Self {
            codec,
            snapshots,
            session,
            registry: SubscriptionRegistry::new(),
            cache,
            cancel,
            started: AtomicBool::new(false),
        })
    }

    /// The exchange this connector serves.
    pub fn exchange(&self) -> ExchangeName {
        self.codec.exchange()
    }

    /// The market segment this connector serves.
    pub fn market(&self) -> MarketType {
        self.codec.market()
    }

    /// Snapshot client, shared with synchronous depth fetches.
    pub fn snapshot_source(&self) -> Arc<dyn SnapshotSource> {
        Arc::clone(&self.snapshots)
    }

    /// Connect and spawn the read loop. Idempotent: later calls are no-ops.
    pub async fn start(self: &Arc<Self>) -> Result<(), FeedError> {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!(exchange = %self.exchange(), market = %self.market(), "already started");
            return Ok(());
        }
        let reader = match self.session.connect().await {
            Ok(Some(reader)) => reader,
            Ok(None) => return Ok(()),
            Err(err) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(err);
            }
        };
        self.replay_intent().await;

        let connector = Arc::clone(self);
        tokio::spawn(async move {
            connector.run(reader).await;
        });
        Ok(())
    }

    /// Declare kline intent and subscribe the newly added symbols when the
    /// socket is up. Intent is kept either way and replayed on reconnect.
    pub async fn subscribe_kline(&self, symbols: &[String]) -> Result<(), FeedError> {
        let newly_added = self.registry.add_kline(symbols);
        if newly_added.is_empty() {
            debug!(exchange = %self.exchange(), "kline symbols already subscribed");
            return Ok(());
        }
        info!(exchange = %self.exchange(), market = %self.market(), symbols = ?newly_added, "subscribing kline");
        self.send_frames(self.codec.subscribe_frames(&newly_added, &[]))
            .await
    }

    /// Declare depth intent and subscribe the newly added symbols when the
    /// socket is up.
    pub async fn subscribe_depth(&self, symbols: &[String]) -> Result<(), FeedError> {
        let newly_added = self.registry.add_depth(symbols);
        if newly_added.is_empty() {
            debug!(exchange = %self.exchange(), "depth symbols already subscribed");
            return Ok(());
        }
        info!(exchange = %self.exchange(), market = %self.market(), symbols = ?newly_added, "subscribing depth");
        self.send_frames(self.codec.subscribe_frames(&[], &newly_added))
            .await
    }

    /// Remove symbols from this connector's scope entirely (both channels)
    /// and unsubscribe the ones that were actually subscribed.
    pub async fn unsubscribe(&self, symbols: &[String]) -> Result<(), FeedError> {
        let removed = self.registry.remove(symbols);
        if removed.is_empty() {
            return Ok(());
        }
        info!(exchange = %self.exchange(), market = %self.market(), symbols = ?removed, "unsubscribing");
        self.send_frames(self.codec.unsubscribe_frames(&removed, &removed))
            .await
    }

    /// Tear the connector down: cancel its tasks and close the socket.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.session.close().await;
        info!(exchange = %self.exchange(), market = %self.market(), "connector shut down");
    }

    async fn send_frames(&self, frames: Vec<serde_json::Value>) -> Result<(), FeedError> {
        if !self.session.is_connected() {
            warn!(exchange = %self.exchange(), "not connected, intent saved and applied after connect");
            return Ok(());
        }
        for frame in frames {
            debug!(exchange = %self.exchange(), %frame, "sending frame");
            self.session.send(&frame).await?;
        }
        Ok(())
    }

    /// Send the full subscription intent in one pass, bundling kline and
    /// depth streams.
    async fn replay_intent(&self) {
        let (kline_symbols, depth_symbols) = self.registry.snapshot();
        if kline_symbols.is_empty() && depth_symbols.is_empty() {
            return;
        }
        info!(
            exchange = %self.exchange(),
            market = %self.market(),
            kline = kline_symbols.len(),
            depth = depth_symbols.len(),
            "replaying subscription intent"
        );
        if let Err(err) = self
            .send_frames(self.codec.subscribe_frames(&kline_symbols, &depth_symbols))
            .await
        {
            warn!(exchange = %self.exchange(), error = %err, "failed to replay subscriptions");
        }
    }

    /// Read loop: one task per session. Owns the book engine, so every
    /// symbol's deltas apply in strict wire order.
    async fn run(self: Arc<Self>, mut reader: SessionReader) {
        let mut engine = DepthEngine::new(
            self.exchange(),
            self.market(),
            Arc::clone(&self.snapshots),
            Arc::clone(&self.cache),
        );
        let mut backoff = Backoff::new();

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    self.session.close().await;
                    debug!(exchange = %self.exchange(), "read loop cancelled");
                    return;
                }
                frame = self.session.read(&mut reader) => match frame {
                    Ok(text) => {
                        // dispatch may fetch a snapshot; cancellation wins
                        // over in-flight work, discarding partial state
                        tokio::select! {
                            () = self.cancel.cancelled() => {
                                self.session.close().await;
                                return;
                            }
                            () = self.dispatch(&mut engine, &text) => {}
                        }
                    }
                    Err(err) => {
                        warn!(exchange = %self.exchange(), market = %self.market(), error = %err, "session failed");
                        self.session.close().await;
                        match self.reconnect(&mut backoff).await {
                            Some(new_reader) => {
                                reader = new_reader;
                                // a fresh stream is a fresh chance for books
                                // that gave up
                                engine.reset_failed();
                            }
                            None => return,
                        }
                    }
                }
            }
        }
    }

    async fn dispatch(&self, engine: &mut DepthEngine, text: &str) {
        match self.codec.parse_frame(text) {
            Ok(VenueEvent::Depth(update)) => engine.on_depth_update(update).await,
            Ok(VenueEvent::Kline(kline)) => self.cache.set_kline(kline),
            Ok(VenueEvent::Ack) => {
                debug!(exchange = %self.exchange(), "subscription acknowledged");
            }
            Ok(VenueEvent::Ignore) => {}
            Err(err) => {
                warn!(exchange = %self.exchange(), error = %err, "skipping malformed frame");
            }
        }
    }

    /// Keep trying to reconnect until it works or the connector is torn
    /// down. On success the whole subscription intent is replayed.
    async fn reconnect(&self, backoff: &mut Backoff) -> Option<SessionReader> {
        loop {
            let delay = backoff.next_delay();
            info!(
                exchange = %self.exchange(),
                market = %self.market(),
                attempt = backoff.attempt(),
                delay_secs = delay.as_secs(),
                "reconnecting"
            );
            tokio::select! {
                () = self.cancel.cancelled() => return None,
                () = tokio::time::sleep(delay) => {}
            }

            match self.session.connect().await {
                Ok(Some(reader)) => {
                    backoff.reset();
                    self.replay_intent().await;
                    return Some(reader);
                }
                Ok(None) => {
                    // stale writer without a reader; force-close and redial
                    self.session.close().await;
                }
                Err(err) => {
                    warn!(exchange = %self.exchange(), error = %err, "reconnect attempt failed");
                }
            }
        }
    }
}
