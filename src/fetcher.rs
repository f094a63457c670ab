use crate::sources;
use crate::types::{AggregatorError, FetchConfig, RawPayload, Result, SourceConfig, SourceKind};
use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use chrono::Utc;
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, info, warn};
use url::Url;

/// Network front-end of the pipeline. Bounds in-flight requests with a shared
/// semaphore, spaces requests per host, and retries transient failures with
/// capped exponential backoff. Holds no pipeline state.
pub struct Fetcher {
    client: Client,
    config: FetchConfig,
    limiter: Arc<Semaphore>,
    host_last_request: Arc<RwLock<HashMap<String, Instant>>>,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .build()?;

        let limiter = Arc::new(Semaphore::new(config.max_concurrent_fetches.max(1)));

        Ok(Self {
            client,
            config,
            limiter,
            host_last_request: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Fetches one source's raw payload. Transient failures (network errors,
    /// 5xx, 429) are retried up to `max_retries`; other 4xx responses and
    /// oversized payloads are permanent for this cycle and reported at once.
    pub async fn fetch_source(&self, source: &SourceConfig) -> Result<RawPayload> {
        let url = match source.kind {
            SourceKind::RssAtom => source.endpoint.clone(),
            SourceKind::ArxivQuery => sources::arxiv::request_url(&source.endpoint)?,
        };

        self.apply_host_interval(&url).await?;

        // The permit is taken after the politeness wait so a sleeping fetch
        // never occupies an in-flight slot.
        let _permit = self.limiter.acquire().await.map_err(|_| {
            AggregatorError::FetchTransient {
                source_name: source.name.clone(),
                detail: "fetch limiter closed".to_string(),
            }
        })?;

        debug!("Fetching source {} from {}", source.name, url);

        let mut backoff: ExponentialBackoff<backoff::SystemClock> = ExponentialBackoff {
            current_interval: Duration::from_millis(self.config.retry_delay_ms),
            initial_interval: Duration::from_millis(self.config.retry_delay_ms),
            max_interval: Duration::from_millis(self.config.retry_delay_ms * 32),
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        };

        let mut last_error = AggregatorError::FetchTransient {
            source_name: source.name.clone(),
            detail: "no fetch attempt completed".to_string(),
        };

        for attempt in 0..=self.config.max_retries {
            match self.attempt(source, &url).await {
                Ok(payload) => {
                    info!(
                        "Fetched {} ({} bytes) on attempt {}",
                        source.name,
                        payload.body.len(),
                        attempt + 1
                    );
                    return Ok(payload);
                }
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    let delay = backoff.next_backoff().unwrap_or_else(|| {
                        Duration::from_millis(self.config.retry_delay_ms)
                    });
                    warn!(
                        "Attempt {} for {} failed ({}), retrying in {:?}",
                        attempt + 1,
                        source.name,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    last_error = e;
                }
                Err(e) if e.is_transient() => {
                    last_error = e;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error)
    }

    async fn attempt(&self, source: &SourceConfig, url: &str) -> Result<RawPayload> {
        let fetched_at = Utc::now();

        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                // reqwest errors at this stage are connect/timeout problems.
                return Err(AggregatorError::FetchTransient {
                    source_name: source.name.clone(),
                    detail: e.to_string(),
                });
            }
        };

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(AggregatorError::FetchTransient {
                source_name: source.name.clone(),
                detail: format!("HTTP {}", status),
            });
        }
        if !status.is_success() {
            return Err(AggregatorError::FetchPermanent {
                source_name: source.name.clone(),
                detail: format!("HTTP {}", status),
            });
        }

        if let Some(length) = response.content_length() {
            if length as usize > self.config.max_payload_bytes {
                return Err(AggregatorError::FetchPermanent {
                    source_name: source.name.clone(),
                    detail: format!("payload of {} bytes exceeds limit", length),
                });
            }
        }

        let body = response.text().await.map_err(|e| AggregatorError::FetchTransient {
            source_name: source.name.clone(),
            detail: e.to_string(),
        })?;

        if body.len() > self.config.max_payload_bytes {
            return Err(AggregatorError::FetchPermanent {
                source_name: source.name.clone(),
                detail: format!("payload of {} bytes exceeds limit", body.len()),
            });
        }

        Ok(RawPayload {
            source_name: source.name.clone(),
            body,
            fetched_at,
        })
    }

    /// Enforces the minimum spacing between requests to one host. The wait is
    /// computed under the lock but slept outside it, so slow hosts do not
    /// serialize unrelated fetches.
    async fn apply_host_interval(&self, url: &str) -> Result<()> {
        if self.config.min_host_interval_ms == 0 {
            return Ok(());
        }

        let parsed = Url::parse(url)?;
        let host = match parsed.host_str() {
            Some(host) => host.to_string(),
            None => return Ok(()),
        };

        let min_interval = Duration::from_millis(self.config.min_host_interval_ms);
        let wait = {
            let mut last_request = self.host_last_request.write().await;
            let now = Instant::now();
            let wait = last_request
                .get(&host)
                .map(|last| min_interval.saturating_sub(now.duration_since(*last)))
                .unwrap_or(Duration::ZERO);
            // Reserve the slot up front so concurrent fetches to the same
            // host queue behind each other instead of racing.
            last_request.insert(host.clone(), now + wait);
            wait
        };

        if !wait.is_zero() {
            debug!("Rate limiting {}: waiting {:?}", host, wait);
            tokio::time::sleep(wait).await;
        }

        Ok(())
    }
}
