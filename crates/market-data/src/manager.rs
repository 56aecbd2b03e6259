//! Keeps an [`OrderBook`] consistent with the exchange across the snapshot +
//! diff-stream protocol.
//!
//! The manager runs as a single task per symbol and follows the documented
//! Binance futures synchronization procedure: fetch a REST snapshot, discard
//! buffered diffs from before it, find the first diff whose id range covers
//! the snapshot, then require every further diff to be contiguous
//! (`pu == last applied u`). Any discontinuity or a diff that sat too long in
//! the queue sends the manager back to a fresh snapshot.
//!
//! The snapshot fetch holds the book lock across its HTTP await so samplers
//! never observe a half-reloaded book.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::binance::types::{DepthDiff, DepthSnapshot};
use crate::orderbook::OrderBook;
use crate::ratelimiter::RateLimiter;

/// Errors that end a manager task.
///
/// Everything else (bad levels, discontinuities, crossed books) is handled
/// in place; only a failed snapshot fetch is fatal, and the supervisor
/// answers it by recreating the tracker.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Network or TLS failure talking to the snapshot endpoint.
    #[error("snapshot request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// The snapshot endpoint answered with a non-200 status.
    #[error("snapshot endpoint returned status {0}")]
    BadStatus(reqwest::StatusCode),
}

/// Source of depth snapshots.
///
/// The seam exists so the manager can be driven hermetically in tests; the
/// one production implementation is [`RestSnapshotSource`].
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Fetch a full depth snapshot.
    async fn fetch(&self) -> Result<DepthSnapshot, SyncError>;
}

/// Snapshot source backed by the Binance futures REST depth endpoint.
pub struct RestSnapshotSource {
    http: reqwest::Client,
    url: String,
}

impl RestSnapshotSource {
    /// Build a source for the given snapshot URL.
    pub fn new(url: String, timeout: Duration) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, url })
    }
}

#[async_trait]
impl SnapshotSource for RestSnapshotSource {
    async fn fetch(&self) -> Result<DepthSnapshot, SyncError> {
        let resp = self.http.get(&self.url).send().await?;
        if resp.status() != reqwest::StatusCode::OK {
            return Err(SyncError::BadStatus(resp.status()));
        }
        Ok(resp.json().await?)
    }
}

/// Synchronization phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncState {
    /// The book is unseeded or known stale; fetch before applying anything.
    NeedSnapshot,
    /// Snapshot loaded; waiting for the diff whose range covers it.
    AfterSnapshot,
    /// Contiguous diffs are being applied.
    InSync,
}

/// Per-symbol book synchronizer.
pub struct BookManager<S> {
    source: S,
    book: Arc<Mutex<OrderBook>>,
    rx: mpsc::Receiver<DepthDiff>,
    limiter: Arc<RateLimiter>,
    update_period: Duration,
    snapshot_weight: u32,
    cancel: CancellationToken,
    state: SyncState,
    last_id: u64,
}

impl<S: SnapshotSource> BookManager<S> {
    /// Create a manager over a diff queue and a shared book.
    ///
    /// `update_period` is the stream cadence; a diff whose receive latency
    /// reaches twice this value is treated as stale. `snapshot_weight` is
    /// charged against `limiter` for every snapshot fetch.
    pub fn new(
        source: S,
        book: Arc<Mutex<OrderBook>>,
        rx: mpsc::Receiver<DepthDiff>,
        limiter: Arc<RateLimiter>,
        update_period: Duration,
        snapshot_weight: u32,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            book,
            rx,
            limiter,
            update_period,
            snapshot_weight,
            cancel,
            state: SyncState::NeedSnapshot,
            last_id: 0,
        }
    }

    /// Id of the last applied event (or of the current snapshot).
    pub fn last_update_id(&self) -> u64 {
        self.last_id
    }

    /// Run until cancelled, the diff queue closes, or a snapshot fetch fails.
    pub async fn run(&mut self) -> Result<(), SyncError> {
        loop {
            if self.state == SyncState::NeedSnapshot {
                self.drain();
                if !self.reload().await? {
                    return Ok(());
                }
                self.state = SyncState::AfterSnapshot;
                continue;
            }

            let diff = tokio::select! {
                d = self.rx.recv() => match d {
                    Some(d) => d,
                    None => {
                        tracing::info!("diff queue closed, manager stopping");
                        return Ok(());
                    }
                },
                _ = self.cancel.cancelled() => return Ok(()),
            };

            self.on_diff(diff).await;
        }
    }

    /// Discard everything currently buffered in the diff queue.
    ///
    /// Runs before every snapshot fetch so diffs from before the new snapshot
    /// can never be applied on top of it.
    fn drain(&mut self) {
        let mut discarded = 0u32;
        while self.rx.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            tracing::debug!(discarded, "drained diff queue");
        }
    }

    /// Fetch a snapshot and reload the book from it.
    ///
    /// Waits one stream tick per rate-limiter refusal. Returns `Ok(false)`
    /// when cancelled while waiting.
    async fn reload(&mut self) -> Result<bool, SyncError> {
        loop {
            if self.limiter.allow(self.snapshot_weight) {
                break;
            }
            tracing::debug!("snapshot fetch denied by rate limiter, waiting one tick");
            tokio::select! {
                _ = tokio::time::sleep(self.update_period) => {}
                _ = self.cancel.cancelled() => return Ok(false),
            }
        }

        // The lock spans the fetch: samplers must not observe a
        // half-reloaded book.
        let mut book = self.book.lock().await;
        tracing::info!("fetching depth snapshot");
        let snap = self.source.fetch().await?;

        book.clear();
        for pair in &snap.bids {
            if let Some((price, qty)) = parse_level(pair, "bid") {
                book.add_bid(price, qty);
            }
        }
        for pair in &snap.asks {
            if let Some((price, qty)) = parse_level(pair, "ask") {
                book.add_ask(price, qty);
            }
        }

        let (bid_levels, ask_levels) = book.level_count();
        tracing::info!(
            last_update_id = snap.last_update_id,
            bids = bid_levels,
            asks = ask_levels,
            "book reloaded from snapshot"
        );

        self.last_id = snap.last_update_id;
        Ok(true)
    }

    /// Advance the state machine with one diff.
    async fn on_diff(&mut self, diff: DepthDiff) {
        match self.state {
            SyncState::AfterSnapshot => {
                if diff.final_update_id < self.last_id {
                    tracing::debug!(
                        final_id = diff.final_update_id,
                        snapshot_id = self.last_id,
                        "dropping pre-snapshot diff"
                    );
                } else if diff.first_update_id <= self.last_id
                    && self.last_id <= diff.final_update_id
                {
                    self.apply(&diff).await;
                    self.last_id = diff.final_update_id;
                    self.state = SyncState::InSync;
                    tracing::info!(last_id = self.last_id, "book in sync");
                } else {
                    tracing::debug!(
                        first_id = diff.first_update_id,
                        final_id = diff.final_update_id,
                        snapshot_id = self.last_id,
                        "dropping diff not covering snapshot id"
                    );
                }
            }
            SyncState::InSync => {
                if diff.prev_update_id != self.last_id {
                    tracing::warn!(
                        expected = self.last_id,
                        got = diff.prev_update_id,
                        "update id mismatch, resyncing"
                    );
                    self.state = SyncState::NeedSnapshot;
                } else if diff.receive_latency >= 2 * self.update_period {
                    tracing::warn!(
                        latency_ms = diff.receive_latency.as_millis() as u64,
                        period_ms = self.update_period.as_millis() as u64,
                        "stale diff, resyncing"
                    );
                    self.state = SyncState::NeedSnapshot;
                } else {
                    self.apply(&diff).await;
                    self.last_id = diff.final_update_id;
                }
            }
            // run() fetches before reading the queue in this state.
            SyncState::NeedSnapshot => {}
        }
    }

    /// Apply one diff's levels under the book lock.
    async fn apply(&self, diff: &DepthDiff) {
        let mut book = self.book.lock().await;
        apply_diff(&mut book, diff);
    }
}

/// Apply a diff's levels to the book.
///
/// A diff with an empty side is dropped whole (the id bookkeeping still
/// advances in the caller). Within a side, unparsable levels are skipped
/// individually. A resulting crossed book is logged and left alone; the next
/// diff usually resolves it.
pub(crate) fn apply_diff(book: &mut OrderBook, diff: &DepthDiff) {
    if diff.bids.is_empty() || diff.asks.is_empty() {
        tracing::warn!(
            first_id = diff.first_update_id,
            final_id = diff.final_update_id,
            "diff with empty bids or asks, skipping"
        );
        return;
    }

    for pair in &diff.bids {
        if let Some((price, qty)) = parse_level(pair, "bid") {
            book.add_bid(price, qty);
        }
    }
    for pair in &diff.asks {
        if let Some((price, qty)) = parse_level(pair, "ask") {
            book.add_ask(price, qty);
        }
    }

    if book.is_crossed() {
        let bid = book.best_bid().map(|(p, _)| p).unwrap_or(f64::NAN);
        let ask = book.best_ask().map(|(p, _)| p).unwrap_or(f64::NAN);
        tracing::warn!(best_bid = bid, best_ask = ask, "crossed book");
    }
}

/// Parse one `[price, quantity]` string pair, logging and skipping bad input.
fn parse_level(pair: &[String; 2], side: &str) -> Option<(f64, f64)> {
    if pair[0].is_empty() || pair[1].is_empty() {
        tracing::warn!(side, "empty price or quantity in level");
        return None;
    }
    let price = match pair[0].parse::<f64>() {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(side, value = %pair[0], error = %e, "unparsable level price");
            return None;
        }
    };
    let qty = match pair[1].parse::<f64>() {
        Ok(q) => q,
        Err(e) => {
            tracing::warn!(side, value = %pair[1], error = %e, "unparsable level quantity");
            return None;
        }
    };
    Some((price, qty))
}
