//! Supervisor reconciliation tests driven through the registry and factory
//! seams. No network, no real trackers.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use oflow_tracker::supervisor::{Supervisor, SymbolRegistry, TrackerFactory};
use oflow_tracker::tracker::TrackerHandle;
use oflow_webhook::WebhookError;

/// Registry that always answers the same set.
struct FixedRegistry {
    symbols: Vec<String>,
}

#[async_trait]
impl SymbolRegistry for FixedRegistry {
    async fn get_symbols(&self) -> Result<Vec<String>, WebhookError> {
        Ok(self.symbols.clone())
    }
}

/// Registry replaying a scripted sequence of responses.
struct ScriptedRegistry {
    responses: Mutex<VecDeque<Result<Vec<String>, WebhookError>>>,
}

#[async_trait]
impl SymbolRegistry for ScriptedRegistry {
    async fn get_symbols(&self) -> Result<Vec<String>, WebhookError> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Factory producing inert trackers whose tasks idle until cancelled
/// (or, with `spawn_dead`, finish immediately).
#[derive(Clone, Default)]
struct StubFactory {
    spawn_dead: bool,
    spawns: Arc<Mutex<Vec<String>>>,
    cancels: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl StubFactory {
    fn spawn_count(&self, symbol: &str) -> usize {
        self.spawns
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.as_str() == symbol)
            .count()
    }

    fn is_stopped(&self, symbol: &str) -> bool {
        self.cancels
            .lock()
            .unwrap()
            .get(symbol)
            .map(|c| c.is_cancelled())
            .unwrap_or(false)
    }
}

impl TrackerFactory for StubFactory {
    fn spawn(&self, symbol: &str) -> anyhow::Result<TrackerHandle> {
        self.spawns.lock().unwrap().push(symbol.to_string());
        let cancel = CancellationToken::new();
        self.cancels
            .lock()
            .unwrap()
            .insert(symbol.to_string(), cancel.clone());

        let task = if self.spawn_dead {
            tokio::spawn(async {})
        } else {
            let c = cancel.clone();
            tokio::spawn(async move { c.cancelled().await })
        };

        Ok(TrackerHandle::new(symbol, cancel, vec![task]))
    }
}

fn symbols(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_churn_stops_removed_and_starts_added() {
    let factory = StubFactory::default();
    let registry = FixedRegistry { symbols: vec![] };
    let mut supervisor = Supervisor::new(registry, factory.clone(), Duration::from_secs(2));

    supervisor.reconcile(&symbols(&["BTCUSDT", "ETHUSDT"]));
    assert_eq!(supervisor.live_symbols(), symbols(&["BTCUSDT", "ETHUSDT"]));

    // {A, B} → {B, C}: A stopped, C started, B untouched.
    supervisor.reconcile(&symbols(&["ETHUSDT", "SOLUSDT"]));
    assert_eq!(supervisor.live_symbols(), symbols(&["ETHUSDT", "SOLUSDT"]));

    assert!(factory.is_stopped("BTCUSDT"));
    assert!(!factory.is_stopped("ETHUSDT"));
    assert_eq!(factory.spawn_count("ETHUSDT"), 1);
    assert_eq!(factory.spawn_count("SOLUSDT"), 1);
}

#[tokio::test]
async fn test_reconcile_is_idempotent() {
    let factory = StubFactory::default();
    let registry = FixedRegistry { symbols: vec![] };
    let mut supervisor = Supervisor::new(registry, factory.clone(), Duration::from_secs(2));

    let wanted = symbols(&["BTCUSDT", "ETHUSDT"]);
    supervisor.reconcile(&wanted);
    supervisor.reconcile(&wanted);
    supervisor.reconcile(&wanted);

    assert_eq!(supervisor.live_symbols(), wanted);
    assert_eq!(factory.spawn_count("BTCUSDT"), 1);
    assert_eq!(factory.spawn_count("ETHUSDT"), 1);
    assert!(!factory.is_stopped("BTCUSDT"));
    assert!(!factory.is_stopped("ETHUSDT"));
}

#[tokio::test]
async fn test_dead_tracker_recreated() {
    let factory = StubFactory {
        spawn_dead: true,
        ..Default::default()
    };
    let registry = FixedRegistry { symbols: vec![] };
    let mut supervisor = Supervisor::new(registry, factory.clone(), Duration::from_secs(2));

    let wanted = symbols(&["BTCUSDT"]);
    supervisor.reconcile(&wanted);
    assert_eq!(factory.spawn_count("BTCUSDT"), 1);

    // Let the inert task actually finish.
    tokio::time::sleep(Duration::from_millis(20)).await;

    // The symbol is still wanted, so the dead tracker is replaced.
    supervisor.reconcile(&wanted);
    assert_eq!(factory.spawn_count("BTCUSDT"), 2);
    assert_eq!(supervisor.live_symbols(), wanted);
}

#[tokio::test]
async fn test_registry_failure_keeps_live_set() {
    let factory = StubFactory::default();
    let registry = ScriptedRegistry {
        responses: Mutex::new(VecDeque::from([
            Ok(symbols(&["BTCUSDT"])),
            Err(WebhookError::UnexpectedStatus {
                endpoint: "symbols",
                status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
            }),
        ])),
    };
    let mut supervisor = Supervisor::new(registry, factory.clone(), Duration::from_secs(2));

    supervisor.poll_once().await;
    assert_eq!(supervisor.live_symbols(), symbols(&["BTCUSDT"]));

    // The failed poll mutates nothing.
    supervisor.poll_once().await;
    assert_eq!(supervisor.live_symbols(), symbols(&["BTCUSDT"]));
    assert!(!factory.is_stopped("BTCUSDT"));
    assert_eq!(factory.spawn_count("BTCUSDT"), 1);
}

#[tokio::test]
async fn test_run_stops_trackers_on_shutdown() {
    let factory = StubFactory::default();
    let registry = FixedRegistry {
        symbols: symbols(&["BTCUSDT"]),
    };
    let supervisor = Supervisor::new(registry, factory.clone(), Duration::from_millis(10));

    let cancel = CancellationToken::new();
    let task = tokio::spawn(supervisor.run(cancel.clone()));

    // Give the loop a few polls, then shut down.
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();
    task.await.expect("supervisor join");

    assert_eq!(factory.spawn_count("BTCUSDT"), 1);
    assert!(factory.is_stopped("BTCUSDT"));
}
