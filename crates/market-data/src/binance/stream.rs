//! Websocket reader for one symbol's incremental depth stream.
//!
//! [`DepthStream`] connects to the `{symbol}@depth@{period}ms` endpoint and
//! feeds decoded [`DepthDiff`]s into a bounded queue. The queue capacity (150
//! by default) is the backpressure mechanism: when the book manager falls
//! behind, the producer blocks on `send` instead of buffering unboundedly.
//!
//! Recoverable trouble (decode errors, zero update ids, server-side close)
//! reconnects after a flat backoff. A failed connect is unrecoverable here:
//! the task ends and the supervisor recreates the whole tracker.

use std::time::Instant;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use oflow_core::config::StreamConfig;

use super::types::DepthDiff;

/// A connected depth stream socket.
type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Why the frame loop stopped.
enum ReadOutcome {
    /// Cancelled, or the consumer dropped its receiver.
    Done,
    /// Bad frame or read error; reconnect after backoff.
    Reconnect,
}

/// Websocket producer for one symbol's depth diffs.
pub struct DepthStream {
    url: String,
    config: StreamConfig,
    tx: mpsc::Sender<DepthDiff>,
    cancel: CancellationToken,
}

impl DepthStream {
    /// Create a stream for the given websocket URL.
    ///
    /// `tx` should be bounded at the configured queue capacity; the stream
    /// blocks on it when the consumer lags.
    pub fn new(
        url: String,
        config: StreamConfig,
        tx: mpsc::Sender<DepthDiff>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            url,
            config,
            tx,
            cancel,
        }
    }

    /// Run the connect/read loop until cancelled.
    ///
    /// Returns `Err` only on connect failure; everything that happens on an
    /// established connection is handled by reconnecting.
    pub async fn run(self) -> Result<()> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            tracing::info!(url = %self.url, "connecting to depth stream");
            let (mut ws, _response) = tokio_tungstenite::connect_async(&self.url)
                .await
                .with_context(|| format!("failed to connect to {}", self.url))?;
            tracing::info!(url = %self.url, "depth stream connected");

            match self.read_frames(&mut ws).await {
                ReadOutcome::Done => {
                    let _ = ws.close(None).await;
                    tracing::info!(url = %self.url, "depth stream stopped");
                    return Ok(());
                }
                ReadOutcome::Reconnect => {
                    let _ = ws.close(None).await;
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.reconnect_backoff()) => {}
                        _ = self.cancel.cancelled() => return Ok(()),
                    }
                }
            }
        }
    }

    /// Read frames until something forces a reconnect or shutdown.
    async fn read_frames(&self, ws: &mut WsStream) -> ReadOutcome {
        loop {
            // Latency is measured from the moment we start waiting on the
            // transport, matching the staleness clock the manager checks.
            let started = Instant::now();

            let msg = tokio::select! {
                m = ws.next() => m,
                _ = self.cancel.cancelled() => return ReadOutcome::Done,
            };

            match msg {
                Some(Ok(Message::Text(text))) => {
                    let mut diff: DepthDiff = match serde_json::from_str(&text) {
                        Ok(diff) => diff,
                        Err(e) => {
                            tracing::warn!(error = %e, "depth frame decode failed, reconnecting");
                            return ReadOutcome::Reconnect;
                        }
                    };

                    if diff.final_update_id == 0 {
                        tracing::warn!("zero final update id, reconnecting");
                        return ReadOutcome::Reconnect;
                    }

                    diff.receive_latency = started.elapsed();

                    // Bounded send: blocks while the queue is full.
                    tokio::select! {
                        sent = self.tx.send(diff) => {
                            if sent.is_err() {
                                tracing::info!("diff consumer gone, stopping stream");
                                return ReadOutcome::Done;
                            }
                        }
                        _ = self.cancel.cancelled() => return ReadOutcome::Done,
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let deadline = self.config.write_deadline();
                    match tokio::time::timeout(deadline, ws.send(Message::Pong(data))).await {
                        Ok(Ok(())) => tracing::trace!("replied to ping with pong"),
                        Ok(Err(e)) => {
                            tracing::warn!(error = %e, "pong write failed, reconnecting");
                            return ReadOutcome::Reconnect;
                        }
                        Err(_) => {
                            tracing::warn!(
                                deadline_ms = deadline.as_millis() as u64,
                                "pong write deadline exceeded, reconnecting"
                            );
                            return ReadOutcome::Reconnect;
                        }
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::warn!(frame = ?frame, "server closed depth stream, reconnecting");
                    return ReadOutcome::Reconnect;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "depth stream read error, reconnecting");
                    return ReadOutcome::Reconnect;
                }
                None => {
                    tracing::warn!("depth stream ended, reconnecting");
                    return ReadOutcome::Reconnect;
                }
            }
        }
    }
}
