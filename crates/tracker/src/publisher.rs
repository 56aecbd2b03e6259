//! Publisher: single consumer of the shared notification queue.
//!
//! All trackers fan notifications into one queue; this task delivers them to
//! the sink one at a time. Delivery failures are logged and swallowed; an
//! unreachable sink must never stall the samplers.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use oflow_webhook::{Notification, WebhookClient, WebhookError};

/// Destination for notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver one notification.
    async fn publish(&self, note: &Notification) -> Result<(), WebhookError>;
}

#[async_trait]
impl NotificationSink for WebhookClient {
    async fn publish(&self, note: &Notification) -> Result<(), WebhookError> {
        self.send_notification(note).await
    }
}

/// Consume the queue until it closes or `cancel` fires.
pub async fn run_publisher<S: NotificationSink>(
    sink: S,
    mut rx: mpsc::Receiver<Notification>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            note = rx.recv() => match note {
                Some(note) => {
                    if let Err(e) = sink.publish(&note).await {
                        tracing::warn!(ticker = %note.ticker, error = %e, "notification delivery failed");
                    }
                }
                None => break,
            },
            _ = cancel.cancelled() => break,
        }
    }
    tracing::info!("publisher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Sink that records deliveries and fails on demand.
    struct RecordingSink {
        seen: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl NotificationSink for std::sync::Arc<RecordingSink> {
        async fn publish(&self, note: &Notification) -> Result<(), WebhookError> {
            self.seen.lock().unwrap().push(note.ticker.clone());
            if self.fail {
                Err(WebhookError::UnexpectedStatus {
                    endpoint: "webhook",
                    status: reqwest_status(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn reqwest_status() -> reqwest::StatusCode {
        reqwest::StatusCode::INTERNAL_SERVER_ERROR
    }

    fn note(ticker: &str) -> Notification {
        Notification {
            message: "simple message".to_string(),
            ofi: 1.0,
            time: "02 Aug 26 14:03 UTC".to_string(),
            ticker: ticker.to_string(),
        }
    }

    #[tokio::test]
    async fn test_delivers_in_order() {
        let sink = std::sync::Arc::new(RecordingSink {
            seen: Mutex::new(Vec::new()),
            fail: false,
        });
        let (tx, rx) = mpsc::channel(8);

        tx.send(note("BTCUSDT")).await.unwrap();
        tx.send(note("ETHUSDT")).await.unwrap();
        drop(tx);

        run_publisher(sink.clone(), rx, CancellationToken::new()).await;

        assert_eq!(*sink.seen.lock().unwrap(), vec!["BTCUSDT", "ETHUSDT"]);
    }

    #[tokio::test]
    async fn test_failures_swallowed() {
        let sink = std::sync::Arc::new(RecordingSink {
            seen: Mutex::new(Vec::new()),
            fail: true,
        });
        let (tx, rx) = mpsc::channel(8);

        tx.send(note("BTCUSDT")).await.unwrap();
        tx.send(note("ETHUSDT")).await.unwrap();
        drop(tx);

        // Every delivery fails; the publisher still consumes the queue and
        // returns cleanly.
        run_publisher(sink.clone(), rx, CancellationToken::new()).await;

        assert_eq!(sink.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cancellation_stops_publisher() {
        let sink = std::sync::Arc::new(RecordingSink {
            seen: Mutex::new(Vec::new()),
            fail: false,
        });
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        cancel.cancel();

        run_publisher(sink, rx, cancel).await;
        drop(tx);
    }
}
