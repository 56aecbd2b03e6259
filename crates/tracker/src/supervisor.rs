//! Supervisor: keeps exactly one live tracker per registry symbol.
//!
//! The supervisor polls the symbol registry on a fixed interval and owns the
//! tracker map outright; no other task touches it. Reconciliation is
//! idempotent: polling the same registry twice starts nothing and stops
//! nothing. A tracker whose tasks have died (failed connect, fatal snapshot
//! fetch) is treated as absent and recreated while its symbol stays wanted.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use oflow_webhook::{WebhookClient, WebhookError};

use crate::tracker::TrackerHandle;

/// Source of the wanted symbol set.
#[async_trait]
pub trait SymbolRegistry: Send + Sync {
    /// Fetch the current symbol set.
    async fn get_symbols(&self) -> Result<Vec<String>, WebhookError>;
}

#[async_trait]
impl SymbolRegistry for WebhookClient {
    async fn get_symbols(&self) -> Result<Vec<String>, WebhookError> {
        WebhookClient::get_symbols(self).await
    }
}

/// Creates trackers on demand.
pub trait TrackerFactory: Send {
    /// Spawn a tracker for `symbol`.
    fn spawn(&self, symbol: &str) -> anyhow::Result<TrackerHandle>;
}

/// Owns the live tracker map and reconciles it against the registry.
pub struct Supervisor<R, F> {
    registry: R,
    factory: F,
    poll_interval: Duration,
    trackers: HashMap<String, TrackerHandle>,
}

impl<R: SymbolRegistry, F: TrackerFactory> Supervisor<R, F> {
    /// Create a supervisor with an empty live set.
    pub fn new(registry: R, factory: F, poll_interval: Duration) -> Self {
        Self {
            registry,
            factory,
            poll_interval,
            trackers: HashMap::new(),
        }
    }

    /// Poll and reconcile until cancelled, then stop every live tracker.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.poll_once().await,
                _ = cancel.cancelled() => break,
            }
        }

        for handle in self.trackers.values() {
            handle.stop();
        }
        tracing::info!("supervisor stopped");
    }

    /// One polling cycle. Registry failures leave the live set untouched.
    pub async fn poll_once(&mut self) {
        match self.registry.get_symbols().await {
            Ok(symbols) => self.reconcile(&symbols),
            Err(e) => tracing::warn!(error = %e, "registry poll failed, keeping live set"),
        }
    }

    /// Bring the live tracker set in line with `symbols`.
    pub fn reconcile(&mut self, symbols: &[String]) {
        // Dead trackers count as absent so a wanted symbol gets a fresh one.
        self.trackers.retain(|symbol, handle| {
            if handle.is_finished() {
                tracing::warn!(symbol = %symbol, "tracker died, removing from live set");
                false
            } else {
                true
            }
        });

        let wanted: HashSet<&str> = symbols.iter().map(String::as_str).collect();

        let stale: Vec<String> = self
            .trackers
            .keys()
            .filter(|symbol| !wanted.contains(symbol.as_str()))
            .cloned()
            .collect();
        for symbol in stale {
            if let Some(handle) = self.trackers.remove(&symbol) {
                handle.stop();
            }
        }

        for symbol in symbols {
            if !self.trackers.contains_key(symbol) {
                match self.factory.spawn(symbol) {
                    Ok(handle) => {
                        self.trackers.insert(symbol.clone(), handle);
                    }
                    Err(e) => {
                        tracing::error!(symbol = %symbol, error = %e, "failed to start tracker");
                    }
                }
            }
        }
    }

    /// Currently live symbols, sorted (diagnostics and tests).
    pub fn live_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.trackers.keys().cloned().collect();
        symbols.sort();
        symbols
    }
}
