//! Layered configuration for the oflow indicator service.
//!
//! Configuration is loaded in layers with increasing priority:
//! 1. Compiled-in defaults (Binance futures endpoints, 100 ms stream cadence,
//!    the documented REST weight budget)
//! 2. TOML configuration file (if provided)
//! 3. Environment variable overrides (prefix `OFLOW_`, nested with `__`)
//!
//! The TLS material paths under `[webhook]` are resolved relative to the
//! working directory; the files themselves are only opened when the webhook
//! client is built.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

// ── Default value functions ────────────────────────────────────────────

/// Default depth stream cadence: 100 ms.
fn default_update_period_ms() -> u64 {
    100
}

/// Default snapshot depth: 1000 levels per side.
fn default_snapshot_depth() -> u32 {
    1_000
}

/// Default REST weight of a `depth?limit=1000` request: 20.
fn default_snapshot_weight() -> u32 {
    20
}

/// Default OFI price bucket width.
fn default_tick_size() -> f64 {
    10.0
}

/// Default diff queue capacity: 150 events.
fn default_queue_capacity() -> usize {
    150
}

/// Default reconnect backoff after a bad frame: 2 000 ms.
fn default_reconnect_backoff_ms() -> u64 {
    2_000
}

/// Default websocket write deadline: 5 000 ms.
fn default_write_deadline_ms() -> u64 {
    5_000
}

/// Default REST budget: 2 400 weight units per window.
fn default_max_requests() -> u32 {
    2_400
}

/// Default rate-limit window: 60 s.
fn default_window_secs() -> u64 {
    60
}

/// Default webhook request timeout: 60 s.
fn default_timeout_secs() -> u64 {
    60
}

/// Default registry polling interval: 2 s.
fn default_poll_interval_secs() -> u64 {
    2
}

/// Default OFI sampling interval: 1 s.
fn default_sample_interval_secs() -> u64 {
    1
}

// ── Configuration structs ──────────────────────────────────────────────

/// Top-level application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Binance futures endpoints and stream cadence.
    pub binance: BinanceConfig,
    /// Order book parameters.
    pub book: BookConfig,
    /// Depth stream transport settings.
    pub stream: StreamConfig,
    /// REST request-weight budget.
    pub rate_limit: RateLimitConfig,
    /// Mutual-TLS notification sink.
    pub webhook: WebhookConfig,
    /// Symbol registry polling.
    pub supervisor: SupervisorConfig,
    /// OFI sampling cadence.
    pub sampler: SamplerConfig,
}

/// Binance futures connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct BinanceConfig {
    /// Websocket base URL (single-stream endpoint).
    pub ws_base: String,
    /// REST base URL.
    pub rest_base: String,
    /// Depth stream cadence in milliseconds.
    #[serde(default = "default_update_period_ms")]
    pub update_period_ms: u64,
    /// Depth levels requested per snapshot side.
    #[serde(default = "default_snapshot_depth")]
    pub snapshot_depth: u32,
    /// Request weight charged for one snapshot fetch.
    #[serde(default = "default_snapshot_weight")]
    pub snapshot_weight: u32,
}

impl BinanceConfig {
    /// Websocket URL for one symbol's incremental depth stream.
    pub fn stream_url(&self, symbol: &str) -> String {
        format!(
            "{}/{}@depth@{}ms",
            self.ws_base.trim_end_matches('/'),
            symbol.to_lowercase(),
            self.update_period_ms
        )
    }

    /// REST URL for one symbol's depth snapshot.
    pub fn snapshot_url(&self, symbol: &str) -> String {
        format!(
            "{}/fapi/v1/depth?symbol={}&limit={}",
            self.rest_base.trim_end_matches('/'),
            symbol.to_uppercase(),
            self.snapshot_depth
        )
    }

    /// Stream cadence as a [`Duration`].
    pub fn update_period(&self) -> Duration {
        Duration::from_millis(self.update_period_ms)
    }
}

/// Order book parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct BookConfig {
    /// Price bucket width used when aggregating OFI volumes.
    #[serde(default = "default_tick_size")]
    pub tick_size: f64,
}

/// Depth stream transport settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Bounded diff queue capacity between stream and book manager.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Backoff before reconnecting after a decode error or bad frame.
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,
    /// Deadline for control-frame writes (pong replies).
    #[serde(default = "default_write_deadline_ms")]
    pub write_deadline_ms: u64,
}

impl StreamConfig {
    /// Reconnect backoff as a [`Duration`].
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    /// Write deadline as a [`Duration`].
    pub fn write_deadline(&self) -> Duration {
        Duration::from_millis(self.write_deadline_ms)
    }
}

/// Sliding-window REST budget.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum request weight admitted per window.
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    /// Window length in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl RateLimitConfig {
    /// Window length as a [`Duration`].
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Mutual-TLS webhook sink settings.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    /// Base URL of the notification service.
    pub base_url: String,
    /// CA bundle used to verify the server certificate.
    pub ca_cert: PathBuf,
    /// Client certificate presented to the server.
    pub client_cert: PathBuf,
    /// Client private key.
    pub client_key: PathBuf,
    /// Total request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Symbol registry polling settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
    /// Seconds between registry polls.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl SupervisorConfig {
    /// Polling interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// OFI sampling settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SamplerConfig {
    /// Seconds between OFI samples.
    #[serde(default = "default_sample_interval_secs")]
    pub interval_secs: u64,
}

impl SamplerConfig {
    /// Sampling interval as a [`Duration`].
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl AppConfig {
    /// Load configuration using layered sources.
    ///
    /// 1. Compiled-in defaults (production Binance futures endpoints).
    /// 2. TOML file at `config_path` (if `Some`).
    /// 3. Environment variable overrides with prefix `OFLOW_` and `__` as
    ///    the nesting separator (e.g., `OFLOW_BOOK__TICK_SIZE=5.0`).
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let mut builder = Config::builder()
            // ── Layer 1: compiled-in defaults ───────────────────────
            .set_default("binance.ws_base", "wss://fstream.binance.com/ws")?
            .set_default("binance.rest_base", "https://fapi.binance.com")?
            .set_default("binance.update_period_ms", 100i64)?
            .set_default("binance.snapshot_depth", 1000i64)?
            .set_default("binance.snapshot_weight", 20i64)?
            .set_default("book.tick_size", 10.0)?
            .set_default("stream.queue_capacity", 150i64)?
            .set_default("stream.reconnect_backoff_ms", 2000i64)?
            .set_default("stream.write_deadline_ms", 5000i64)?
            .set_default("rate_limit.max_requests", 2400i64)?
            .set_default("rate_limit.window_secs", 60i64)?
            .set_default("webhook.base_url", "https://go-demo.localtest.me")?
            .set_default("webhook.ca_cert", "ca.crt")?
            .set_default("webhook.client_cert", "client.crt")?
            .set_default("webhook.client_key", "client.key")?
            .set_default("webhook.timeout_secs", 60i64)?
            .set_default("supervisor.poll_interval_secs", 2i64)?
            .set_default("sampler.interval_secs", 1i64)?;

        // ── Layer 2: TOML file ─────────────────────────────────────
        if let Some(path) = config_path {
            let path_str = path.to_str().context("config path is not valid UTF-8")?;
            builder = builder.add_source(File::with_name(path_str).required(true));
        }

        // ── Layer 3: env var overrides (OFLOW_ prefix) ─────────────
        // The prefix separator must be set explicitly to `_` because the
        // `config` crate defaults it to the nesting separator when one is
        // provided.
        builder = builder.add_source(
            Environment::with_prefix("OFLOW")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let cfg: AppConfig = builder
            .build()
            .context("failed to build configuration")?
            .try_deserialize()
            .context("failed to deserialize configuration")?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate configuration invariants.
    fn validate(&self) -> Result<()> {
        if !(self.book.tick_size > 0.0) || !self.book.tick_size.is_finite() {
            bail!(
                "book.tick_size must be a positive finite number, got {}",
                self.book.tick_size
            );
        }
        if self.binance.update_period_ms == 0 {
            bail!("binance.update_period_ms must be positive");
        }
        if self.stream.queue_capacity == 0 {
            bail!("stream.queue_capacity must be positive");
        }
        if self.rate_limit.max_requests == 0 {
            bail!("rate_limit.max_requests must be positive");
        }
        if self.binance.ws_base.is_empty()
            || self.binance.rest_base.is_empty()
            || self.webhook.base_url.is_empty()
        {
            bail!("endpoint URLs must be non-empty");
        }
        Ok(())
    }
}
