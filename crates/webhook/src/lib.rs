//! # oflow-webhook
//!
//! Mutual-TLS HTTP client for the downstream notification service: the
//! symbol registry (`GET /symbols`) and the indicator sink
//! (`POST /webhook`). The TLS material (CA bundle, client certificate and
//! key) is loaded once at startup; a missing or unreadable file aborts
//! startup.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use oflow_core::config::WebhookConfig;

/// One OFI reading for one symbol, in the sink's wire format.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    /// Free-form message line.
    pub message: String,
    /// Order flow imbalance for the sample period.
    pub ofi: f64,
    /// Human-readable sample time.
    pub time: String,
    /// Upper-case symbol the reading belongs to.
    pub ticker: String,
}

/// Errors from the webhook channel.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// A TLS file could not be read.
    #[error("failed to read TLS material from {}", path.display())]
    TlsMaterial {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Network, TLS handshake, or body decode failure.
    #[error("webhook transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// The service answered with a non-200 status.
    #[error("{endpoint} returned status {status}")]
    UnexpectedStatus {
        endpoint: &'static str,
        status: reqwest::StatusCode,
    },
}

/// Mutual-TLS client for the notification service.
///
/// Cheap to clone; the inner `reqwest::Client` is reference-counted.
#[derive(Clone)]
pub struct WebhookClient {
    base_url: String,
    http: reqwest::Client,
}

impl WebhookClient {
    /// Build the client from configured TLS material.
    ///
    /// Reads the CA bundle, client certificate, and private key from disk and
    /// constructs a rustls-backed client with the configured total timeout.
    pub fn new(config: &WebhookConfig) -> Result<Self, WebhookError> {
        let ca_pem = read_tls_file(&config.ca_cert)?;
        let ca = reqwest::Certificate::from_pem(&ca_pem)?;

        // rustls wants certificate and key in one PEM bundle.
        let mut identity_pem = read_tls_file(&config.client_cert)?;
        identity_pem.extend_from_slice(&read_tls_file(&config.client_key)?);
        let identity = reqwest::Identity::from_pem(&identity_pem)?;

        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .add_root_certificate(ca)
            .identity(identity)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    /// Fetch the current symbol set from the registry.
    pub async fn get_symbols(&self) -> Result<Vec<String>, WebhookError> {
        let url = format!("{}/symbols", self.base_url);
        let resp = self.http.get(&url).send().await?;

        if resp.status() != reqwest::StatusCode::OK {
            return Err(WebhookError::UnexpectedStatus {
                endpoint: "symbols",
                status: resp.status(),
            });
        }

        let symbols: Vec<String> = resp.json().await?;
        tracing::debug!(count = symbols.len(), "fetched symbol registry");
        Ok(symbols)
    }

    /// Deliver one notification to the sink.
    pub async fn send_notification(&self, note: &Notification) -> Result<(), WebhookError> {
        let url = format!("{}/webhook", self.base_url);
        let resp = self.http.post(&url).json(note).send().await?;

        if resp.status() != reqwest::StatusCode::OK {
            return Err(WebhookError::UnexpectedStatus {
                endpoint: "webhook",
                status: resp.status(),
            });
        }

        tracing::debug!(ticker = %note.ticker, ofi = note.ofi, "notification delivered");
        Ok(())
    }
}

fn read_tls_file(path: &Path) -> Result<Vec<u8>, WebhookError> {
    fs::read(path).map_err(|source| WebhookError::TlsMaterial {
        path: path.to_path_buf(),
        source,
    })
}
