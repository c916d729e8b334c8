use crate::config::ScraperConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{debug, warn};

use super::PageFetcher;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Renderer error (status {status}): {message}")]
    Api { status: u16, message: String },
}

impl FetchError {
    /// Network failures, rate limiting and server-side errors are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Network(_) => true,
            FetchError::Api { status, .. } => *status == 429 || *status >= 500,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Network(err.to_string())
    }
}

/// Renders pages through a Browserless `/content` endpoint.
pub struct BrowserlessFetcher {
    inner: reqwest::Client,
    endpoint: String,
    settle_delay_ms: u64,
    max_retries: usize,
    retry_base_ms: u64,
}

impl BrowserlessFetcher {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        let mut endpoint = format!("{}/content", config.browserless_url.trim_end_matches('/'));
        if let Some(token) = config.browserless_token.as_deref().filter(|t| !t.is_empty()) {
            endpoint.push_str(&format!("?token={token}"));
        }

        Ok(Self {
            inner,
            endpoint,
            settle_delay_ms: config.settle_delay_ms,
            max_retries: config.max_retries,
            retry_base_ms: config.retry_base_ms,
        })
    }

    /// One render attempt.
    async fn content(&self, url: &str) -> std::result::Result<String, FetchError> {
        let body = serde_json::json!({
            "url": url,
            "waitForTimeout": self.settle_delay_ms,
        });

        let resp = self.inner.post(&self.endpoint).json(&body).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(FetchError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(resp.text().await?)
    }
}

#[async_trait]
impl PageFetcher for BrowserlessFetcher {
    async fn render(&self, url: &str) -> std::result::Result<String, FetchError> {
        // 2^n * base/2 → base, 2·base, 4·base …
        let strategy = ExponentialBackoff::from_millis(2)
            .factor((self.retry_base_ms / 2).max(1))
            .max_delay(Duration::from_secs(30))
            .map(jitter)
            .take(self.max_retries);

        let mut attempt = 0u32;
        RetryIf::start(
            strategy,
            || {
                attempt += 1;
                debug!("Render {} (attempt {})", url, attempt);
                self.content(url)
            },
            |e: &FetchError| {
                let retry = e.is_transient();
                if retry {
                    warn!("Render failed, retrying: {}", e);
                }
                retry
            },
        )
        .await
    }
}
