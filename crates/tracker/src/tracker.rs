//! Per-symbol tracker: one depth stream, one book manager, one OFI sampler.
//!
//! A tracker binds a symbol to three tasks sharing one cancellation token.
//! The sampler wakes on whole-second boundaries and reads all four top-of-book
//! quantities inside a single book-lock critical section so the two sides can
//! never tear against each other. OFI follows the one-period delta rules: the
//! side's contribution depends on whether its rounded best price moved up,
//! down, or stayed.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use oflow_core::config::AppConfig;
use oflow_market_data::binance::DepthStream;
use oflow_market_data::manager::{BookManager, RestSnapshotSource};
use oflow_market_data::orderbook::OrderBook;
use oflow_market_data::ratelimiter::RateLimiter;
use oflow_webhook::Notification;

use crate::supervisor::TrackerFactory;

/// Total timeout for the snapshot REST client.
const SNAPSHOT_HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Handle to a running tracker.
///
/// Dropping the handle does not stop the tasks; call [`stop`](Self::stop).
pub struct TrackerHandle {
    symbol: String,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl TrackerHandle {
    /// Wrap already-spawned tasks into a handle.
    pub fn new(symbol: impl Into<String>, cancel: CancellationToken, tasks: Vec<JoinHandle<()>>) -> Self {
        Self {
            symbol: symbol.into(),
            cancel,
            tasks,
        }
    }

    /// The symbol this tracker follows.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Signal all child tasks to stop. They exit at their next suspension
    /// point; nothing waits for them here.
    pub fn stop(&self) {
        tracing::info!(symbol = %self.symbol, "stopping tracker");
        self.cancel.cancel();
    }

    /// `true` once every child task has exited.
    ///
    /// A finished tracker whose symbol is still wanted gets recreated by the
    /// supervisor on its next poll.
    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(JoinHandle::is_finished)
    }
}

/// Factory spawning real trackers against Binance.
pub struct BinanceTrackerFactory {
    config: Arc<AppConfig>,
    limiter: Arc<RateLimiter>,
    out: mpsc::Sender<Notification>,
}

impl BinanceTrackerFactory {
    /// Create a factory sharing one rate limiter and one outbound queue
    /// across all trackers.
    pub fn new(
        config: Arc<AppConfig>,
        limiter: Arc<RateLimiter>,
        out: mpsc::Sender<Notification>,
    ) -> Self {
        Self {
            config,
            limiter,
            out,
        }
    }
}

impl TrackerFactory for BinanceTrackerFactory {
    fn spawn(&self, symbol: &str) -> Result<TrackerHandle> {
        spawn_tracker(symbol, &self.config, self.limiter.clone(), self.out.clone())
    }
}

/// Start the three tasks for one symbol.
///
/// The stream and manager tasks cancel the shared token when they exit for
/// any reason, so a dead connection or a failed snapshot fetch tears the
/// whole tracker down and makes [`TrackerHandle::is_finished`] come true.
pub fn spawn_tracker(
    symbol: &str,
    config: &AppConfig,
    limiter: Arc<RateLimiter>,
    out: mpsc::Sender<Notification>,
) -> Result<TrackerHandle> {
    let cancel = CancellationToken::new();
    let book = Arc::new(Mutex::new(OrderBook::new(config.book.tick_size)));
    let (diff_tx, diff_rx) = mpsc::channel(config.stream.queue_capacity);

    let stream = DepthStream::new(
        config.binance.stream_url(symbol),
        config.stream.clone(),
        diff_tx,
        cancel.clone(),
    );
    let source = RestSnapshotSource::new(config.binance.snapshot_url(symbol), SNAPSHOT_HTTP_TIMEOUT)
        .context("failed to build snapshot client")?;
    let mut manager = BookManager::new(
        source,
        book.clone(),
        diff_rx,
        limiter,
        config.binance.update_period(),
        config.binance.snapshot_weight,
        cancel.clone(),
    );

    tracing::info!(symbol = %symbol, "starting tracker");

    let sym = symbol.to_string();
    let stream_cancel = cancel.clone();
    let stream_task = tokio::spawn(async move {
        if let Err(e) = stream.run().await {
            tracing::error!(symbol = %sym, error = %e, "depth stream failed");
        }
        stream_cancel.cancel();
    });

    let sym = symbol.to_string();
    let manager_cancel = cancel.clone();
    let manager_task = tokio::spawn(async move {
        if let Err(e) = manager.run().await {
            tracing::error!(symbol = %sym, error = %e, "book manager failed");
        }
        manager_cancel.cancel();
    });

    let sampler_task = tokio::spawn(sample_loop(
        symbol.to_string(),
        book,
        out,
        config.sampler.interval(),
        cancel.clone(),
    ));

    Ok(TrackerHandle::new(
        symbol,
        cancel,
        vec![stream_task, manager_task, sampler_task],
    ))
}

/// One top-of-book reading: tick-rounded best prices and the aggregated
/// volume inside each bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub bid_bucket: f64,
    pub bid_volume: f64,
    pub ask_bucket: f64,
    pub ask_volume: f64,
}

/// Read a full sample inside one lock critical section.
///
/// An empty side reads as bucket 0.0 / volume 0.0, so a tracker started
/// before its first snapshot simply reports zero flow.
pub async fn read_sample(book: &Mutex<OrderBook>) -> Sample {
    let book = book.lock().await;

    let (bid_bucket, bid_volume) = match book.best_bid() {
        Some((price, _)) => {
            let bucket = book.round_down_tick(price);
            (bucket, book.bid_volume(bucket).unwrap_or(0.0))
        }
        None => (0.0, 0.0),
    };

    let (ask_bucket, ask_volume) = match book.best_ask() {
        Some((price, _)) => {
            let bucket = book.round_up_tick(price);
            (bucket, book.ask_volume(bucket).unwrap_or(0.0))
        }
        None => (0.0, 0.0),
    };

    Sample {
        bid_bucket,
        bid_volume,
        ask_bucket,
        ask_volume,
    }
}

/// Bid-side flow contribution between two samples.
pub fn bid_delta(bucket: f64, prev_bucket: f64, volume: f64, prev_volume: f64) -> f64 {
    if bucket > prev_bucket {
        volume
    } else if bucket < prev_bucket {
        -prev_volume
    } else {
        volume - prev_volume
    }
}

/// Ask-side flow contribution between two samples; mirrored in sign.
pub fn ask_delta(bucket: f64, prev_bucket: f64, volume: f64, prev_volume: f64) -> f64 {
    if bucket > prev_bucket {
        -volume
    } else if bucket < prev_bucket {
        volume
    } else {
        volume - prev_volume
    }
}

/// Order flow imbalance between two consecutive samples.
pub fn ofi(current: &Sample, previous: &Sample) -> f64 {
    let bid = bid_delta(
        current.bid_bucket,
        previous.bid_bucket,
        current.bid_volume,
        previous.bid_volume,
    );
    let ask = ask_delta(
        current.ask_bucket,
        previous.ask_bucket,
        current.ask_volume,
        previous.ask_volume,
    );
    bid - ask
}

/// Cadence-aligned sampling loop.
///
/// Waits for the next whole-second boundary, seeds the previous sample, then
/// emits one notification per interval until cancelled.
async fn sample_loop(
    symbol: String,
    book: Arc<Mutex<OrderBook>>,
    out: mpsc::Sender<Notification>,
    interval: Duration,
    cancel: CancellationToken,
) {
    tokio::select! {
        _ = tokio::time::sleep(until_next_second()) => {}
        _ = cancel.cancelled() => return,
    }

    tracing::info!(symbol = %symbol, "sampler started");

    let mut previous = read_sample(&book).await;
    let mut ticker =
        tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let current = read_sample(&book).await;
                let value = ofi(&current, &previous);
                previous = current;

                tracing::debug!(symbol = %symbol, ofi = value, "sample");

                let note = Notification {
                    message: "simple message".to_string(),
                    ofi: value,
                    time: sample_time(),
                    ticker: symbol.to_uppercase(),
                };
                if out.send(note).await.is_err() {
                    tracing::info!(symbol = %symbol, "notification queue closed, sampler stopping");
                    return;
                }
            }
            _ = cancel.cancelled() => {
                tracing::info!(symbol = %symbol, "sampler stopped");
                return;
            }
        }
    }
}

/// Time until the next whole-second boundary of the wall clock.
fn until_next_second() -> Duration {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let nanos = now.subsec_nanos() as u64;
    if nanos == 0 {
        Duration::ZERO
    } else {
        Duration::from_nanos(1_000_000_000 - nanos)
    }
}

/// Wall-clock sample time in the sink's human-readable format.
fn sample_time() -> String {
    chrono::Utc::now().format("%d %b %y %H:%M UTC").to_string()
}
