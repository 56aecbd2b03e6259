//! End-to-end pipeline test: a book manager synchronized from a stub
//! snapshot source feeds the OFI sampling math. Wires the components
//! manually, with no network and no websocket.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use oflow_market_data::binance::types::{DepthDiff, DepthSnapshot};
use oflow_market_data::manager::{BookManager, SnapshotSource, SyncError};
use oflow_market_data::orderbook::OrderBook;
use oflow_market_data::ratelimiter::RateLimiter;
use oflow_tracker::tracker::{ofi, read_sample};

struct StubSource {
    snapshot: DepthSnapshot,
}

#[async_trait]
impl SnapshotSource for StubSource {
    async fn fetch(&self) -> Result<DepthSnapshot, SyncError> {
        Ok(self.snapshot.clone())
    }
}

fn level(price: &str, qty: &str) -> [String; 2] {
    [price.to_string(), qty.to_string()]
}

fn diff(first: u64, last: u64, prev: u64, bids: Vec<[String; 2]>, asks: Vec<[String; 2]>) -> DepthDiff {
    DepthDiff {
        first_update_id: first,
        final_update_id: last,
        prev_update_id: prev,
        bids,
        asks,
        receive_latency: Duration::from_millis(5),
    }
}

#[tokio::test]
async fn test_synced_book_through_ofi_sampling() {
    let book = Arc::new(Mutex::new(OrderBook::new(10.0)));
    let limiter = Arc::new(RateLimiter::new(2400, Duration::from_secs(60)));
    let (tx, rx) = mpsc::channel(150);

    let source = StubSource {
        snapshot: DepthSnapshot {
            last_update_id: 100,
            bids: vec![level("100.0", "1.0"), level("99.0", "2.0")],
            asks: vec![level("101.0", "1.5"), level("102.0", "2.5")],
        },
    };
    let mut manager = BookManager::new(
        source,
        book.clone(),
        rx,
        limiter,
        Duration::from_millis(100),
        20,
        CancellationToken::new(),
    );
    let manager_task = tokio::spawn(async move {
        let result = manager.run().await;
        (result, manager)
    });

    // Covering diff: grows the best-bid level from 1.0 to 3.0.
    tx.send(diff(
        95,
        105,
        0,
        vec![level("100.0", "3.0")],
        vec![level("101.0", "1.5")],
    ))
    .await
    .unwrap();

    // Contiguous follow-up that changes nothing inside the sampled buckets.
    tx.send(diff(
        106,
        110,
        105,
        vec![level("80.0", "5.0")],
        vec![level("130.0", "5.0")],
    ))
    .await
    .unwrap();
    drop(tx);

    let (result, manager) = manager_task.await.expect("join");
    result.expect("manager run");
    assert_eq!(manager.last_update_id(), 110);

    // Sample the synchronized book: best bid 100 → bucket 100, volume 3;
    // best ask 101 → bucket 110, volume 1.5 + 2.5 = 4.
    let sampled = read_sample(&book).await;
    assert_eq!(sampled.bid_bucket, 100.0);
    assert_eq!(sampled.bid_volume, 3.0);
    assert_eq!(sampled.ask_bucket, 110.0);
    assert_eq!(sampled.ask_volume, 4.0);

    // Identical consecutive samples → OFI 0.
    let resampled = read_sample(&book).await;
    assert_eq!(ofi(&resampled, &sampled), 0.0);

    // Against the pre-diff book state (bid volume 1.0 at the same buckets),
    // the sampled book shows +2.0 of bid flow and no ask flow.
    let before = oflow_tracker::tracker::Sample {
        bid_bucket: 100.0,
        bid_volume: 1.0,
        ask_bucket: 110.0,
        ask_volume: 4.0,
    };
    assert_eq!(ofi(&sampled, &before), 2.0);
}

#[tokio::test]
async fn test_resync_preserves_sampling_view() {
    // A desync mid-stream forces a refetch; afterwards the sampler sees the
    // fresh snapshot, not remnants of the stale book.
    struct TwoSnapshots {
        snaps: std::sync::Mutex<Vec<DepthSnapshot>>,
    }

    #[async_trait]
    impl SnapshotSource for TwoSnapshots {
        async fn fetch(&self) -> Result<DepthSnapshot, SyncError> {
            let mut snaps = self.snaps.lock().unwrap();
            if snaps.len() > 1 {
                Ok(snaps.remove(0))
            } else {
                Ok(snaps[0].clone())
            }
        }
    }

    let book = Arc::new(Mutex::new(OrderBook::new(10.0)));
    let limiter = Arc::new(RateLimiter::new(2400, Duration::from_secs(60)));
    let (tx, rx) = mpsc::channel(150);

    let source = TwoSnapshots {
        snaps: std::sync::Mutex::new(vec![
            DepthSnapshot {
                last_update_id: 100,
                bids: vec![level("100.0", "1.0")],
                asks: vec![level("101.0", "1.0")],
            },
            DepthSnapshot {
                last_update_id: 200,
                bids: vec![level("500.0", "7.0")],
                asks: vec![level("501.0", "8.0")],
            },
        ]),
    };
    let mut manager = BookManager::new(
        source,
        book.clone(),
        rx,
        limiter,
        Duration::from_millis(100),
        20,
        CancellationToken::new(),
    );
    let manager_task = tokio::spawn(async move {
        let result = manager.run().await;
        (result, manager)
    });

    tx.send(diff(95, 105, 0, vec![level("100.0", "2.0")], vec![level("101.0", "1.0")]))
        .await
        .unwrap();
    // Gap: pu != 105 → refetch lands on the 500/501 book.
    tx.send(diff(150, 160, 140, vec![level("100.0", "9.0")], vec![level("101.0", "9.0")]))
        .await
        .unwrap();
    drop(tx);

    let (result, manager) = manager_task.await.expect("join");
    result.expect("manager run");
    assert_eq!(manager.last_update_id(), 200);

    let sampled = read_sample(&book).await;
    assert_eq!(sampled.bid_bucket, 500.0);
    assert_eq!(sampled.bid_volume, 7.0);
    assert_eq!(sampled.ask_bucket, 510.0);
    assert_eq!(sampled.ask_volume, 8.0);
}
