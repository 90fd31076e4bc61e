//! HTTP retrieval of feed bodies.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use reqwest::Client;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use crate::error::FetchError;
use crate::source::Source;
use crate::utils::format_bytes;

/// Default wall-clock budget for one feed, retries included.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 20;

const RETRY_DELAY_MS: u64 = 500;

/// Maximum size per feed (10 MB)
pub const MAX_FEED_SIZE: usize = 10 * 1024 * 1024;

/// Retrieves raw feed text. Implementations never panic on remote failure.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    /// Fetch `url`, giving up once `timeout` has elapsed.
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<String, FetchError>;
}

/// Backoff before retry number `attempt` (1-based), doubling from `RETRY_DELAY_MS`.
fn retry_delay_ms(attempt: u32) -> u64 {
    let factor = 1u64
        .checked_shl(attempt.saturating_sub(1))
        .unwrap_or(u64::MAX);
    RETRY_DELAY_MS.saturating_mul(factor)
}

/// reqwest-backed fetcher with bounded retries.
pub struct HttpFetcher {
    client: Client,
    attempts: u32,
    max_size: usize,
    /// Bytes downloaded over the fetcher's lifetime
    total_downloaded: AtomicUsize,
}

impl HttpFetcher {
    /// Create a fetcher making up to `attempts` tries per feed.
    pub fn new(attempts: u32) -> Result<Self> {
        let client = Client::builder()
            .user_agent(format!("blocklist-compiler/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            attempts: attempts.max(1),
            max_size: MAX_FEED_SIZE,
            total_downloaded: AtomicUsize::new(0),
        })
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn total_downloaded(&self) -> usize {
        self.total_downloaded.load(Ordering::Relaxed)
    }

    async fn fetch_with_retry(&self, url: &str) -> Result<String, FetchError> {
        let mut last_error = None;

        for attempt in 0..self.attempts {
            if attempt > 0 {
                let delay = retry_delay_ms(attempt);
                debug!("Retry {} after {}ms for {}", attempt, delay, url);
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            match self.fetch_once(url).await {
                Ok(body) => return Ok(body),
                // oversize bodies will not shrink on retry
                Err(e @ FetchError::TooLarge { .. }) => return Err(e),
                Err(e) => {
                    debug!("Attempt {} for {} failed: {}", attempt + 1, url, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| FetchError::Network("no attempt made".to_string())))
    }

    async fn fetch_once(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        if let Some(content_length) = response.content_length() {
            if content_length as usize > self.max_size {
                return Err(FetchError::TooLarge {
                    size: content_length as usize,
                    max: self.max_size,
                });
            }
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Network(format!("Failed to read response body: {}", e)))?;

        // Content-Length may be absent or wrong
        if body.len() > self.max_size {
            return Err(FetchError::TooLarge {
                size: body.len(),
                max: self.max_size,
            });
        }

        self.total_downloaded.fetch_add(body.len(), Ordering::Relaxed);
        Ok(body)
    }
}

#[async_trait]
impl FeedFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<String, FetchError> {
        tokio::time::timeout(timeout, self.fetch_with_retry(url))
            .await
            .unwrap_or(Err(FetchError::Timeout(timeout)))
    }
}

/// Result of fetching one source, tagged with its position in the source list.
#[derive(Debug)]
pub struct SourceFetch {
    pub index: usize,
    pub body: Result<String, FetchError>,
}

async fn fetch_one<'a>(
    fetcher: &'a dyn FeedFetcher,
    index: usize,
    source: &'a Source,
    timeout: Duration,
) -> SourceFetch {
    debug!("Fetching {} ({})", source.name, source.url);
    let body = fetcher.fetch(&source.url, timeout).await;
    match &body {
        Ok(text) => info!("Fetched {} - {}", source.name, format_bytes(text.len() as u64)),
        Err(e) => warn!("Failed to fetch {} ({}): {}", source.name, source.url, e),
    }
    SourceFetch { index, body }
}

/// Fetch every source concurrently, at most `max_concurrent` at a time.
///
/// Results come back sorted by source position, never by completion order.
pub async fn fetch_all(
    fetcher: &dyn FeedFetcher,
    sources: &[Source],
    timeout: Duration,
    max_concurrent: usize,
) -> Vec<SourceFetch> {
    let futures: Vec<_> = sources
        .iter()
        .enumerate()
        .map(|(index, source)| fetch_one(fetcher, index, source, timeout).boxed())
        .collect();
    let mut results: Vec<SourceFetch> = stream::iter(futures)
    .buffer_unordered(max_concurrent.max(1))
    .collect()
    .await;

    results.sort_by_key(|r| r.index);
    results
}
