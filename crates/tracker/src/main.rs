//! oflow tracker binary.
//!
//! Entry point for the OFI indicator service. Loads configuration,
//! initializes tracing, builds the mutual-TLS webhook client, and runs either
//! the supervisor (default) or a single-symbol tracker (legacy mode, one
//! positional argument).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use oflow_core::config::AppConfig;
use oflow_market_data::ratelimiter::RateLimiter;
use oflow_tracker::publisher::run_publisher;
use oflow_tracker::supervisor::{Supervisor, TrackerFactory};
use oflow_tracker::tracker::BinanceTrackerFactory;
use oflow_webhook::WebhookClient;

/// Capacity of the shared notification queue.
const NOTIFICATION_QUEUE_CAPACITY: usize = 256;

/// oflow OFI indicator service
#[derive(Parser, Debug)]
#[command(name = "oflow-tracker", about = "Binance futures order-flow imbalance tracker")]
struct Args {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Human-readable logs instead of JSON.
    #[arg(long)]
    pretty: bool,

    /// Track a single symbol instead of polling the registry.
    symbol: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Arc::new(AppConfig::load(args.config)?);

    oflow_core::logging::init_tracing(!args.pretty);

    tracing::info!(
        webhook = %config.webhook.base_url,
        update_period_ms = config.binance.update_period_ms,
        tick_size = config.book.tick_size,
        "starting oflow-tracker"
    );

    // Missing or invalid TLS material aborts startup here.
    let client =
        WebhookClient::new(&config.webhook).context("failed to build webhook client")?;

    let limiter = Arc::new(RateLimiter::new(
        config.rate_limit.max_requests,
        config.rate_limit.window(),
    ));
    let (note_tx, note_rx) = mpsc::channel(NOTIFICATION_QUEUE_CAPACITY);
    let cancel = CancellationToken::new();

    let publisher_cancel = cancel.clone();
    let publisher = tokio::spawn(run_publisher(client.clone(), note_rx, publisher_cancel));

    let factory = BinanceTrackerFactory::new(config.clone(), limiter, note_tx.clone());

    if let Some(symbol) = args.symbol {
        // Legacy single-symbol mode: no registry polling.
        let handle = factory.spawn(&symbol)?;

        signal::ctrl_c().await?;
        tracing::info!("received SIGINT, shutting down");
        handle.stop();
    } else {
        let supervisor = Supervisor::new(client, factory, config.supervisor.poll_interval());
        let supervisor_cancel = cancel.clone();
        let supervisor_task = tokio::spawn(supervisor.run(supervisor_cancel));

        signal::ctrl_c().await?;
        tracing::info!("received SIGINT, shutting down");
        cancel.cancel();
        let _ = supervisor_task.await;
    }

    cancel.cancel();
    drop(note_tx);
    let _ = publisher.await;

    tracing::info!("oflow-tracker stopped");
    Ok(())
}
