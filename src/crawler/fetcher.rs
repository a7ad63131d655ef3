//! HTTP fetching with status-driven retries
//!
//! This module provides:
//! - [`FetchRetryPolicy`]: wraps one network operation with bounded retries,
//!   rate-limiter admission before every attempt and 429/Retry-After handling
//! - [`HttpFetcher`]: a reqwest client with browser-like headers and
//!   User-Agent rotation that runs every GET through the policy
//!
//! # Retry rules
//!
//! | Outcome | Action |
//! |---------|--------|
//! | 200 | return the body |
//! | 404 | give up immediately |
//! | 429 with numeric `Retry-After` | sleep exactly that many seconds |
//! | 429 with unusable `Retry-After` | sleep 60s |
//! | 429 without it | sleep `min(2^attempt * 10, 300)` seconds |
//! | anything else, transport errors | sleep `min(2^attempt, 60)` seconds |
//!
//! No sleep follows the final attempt. Exhausting the attempts is not an
//! error for the cycle: [`FetchRetryPolicy::fetch`] returns `None` and the
//! caller skips that unit of work.

use async_trait::async_trait;
use bytes::Bytes;
use rand::seq::SliceRandom;
use reqwest::{
    header::{
        HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, REFERER, RETRY_AFTER,
        USER_AGENT,
    },
    Client,
};
use std::future::Future;
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Config;
use crate::crawler::rate_limiter::{RequestType, SharedRateLimiter};
use crate::error::{Classify, ErrorKind};
use crate::metrics;
use crate::scheduler::resources::Resource;
use crate::utils::clock::{SharedClock, TokioClock};
use crate::utils::error::FetchError;
use crate::utils::format_bytes;

/// Pool of realistic User-Agent strings for rotation
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
];

/// Cap for the 429 backoff without `Retry-After`
pub const MAX_RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(300);

/// Cap for the backoff after other failures
pub const MAX_TRANSIENT_BACKOFF: Duration = Duration::from_secs(60);

/// Delay after a 429 that carried no usable `Retry-After`
pub fn rate_limit_backoff(attempt: u32) -> Duration {
    let secs = 2_u64.saturating_pow(attempt).saturating_mul(10);
    Duration::from_secs(secs).min(MAX_RATE_LIMIT_BACKOFF)
}

/// Delay after a transport error or an unexpected status
pub fn transient_backoff(attempt: u32) -> Duration {
    Duration::from_secs(2_u64.saturating_pow(attempt)).min(MAX_TRANSIENT_BACKOFF)
}

/// Delay after a 429 whose `Retry-After` is present but not a number
pub const UNPARSEABLE_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Parse a delay-seconds `Retry-After` value
///
/// Fractional seconds are honored. A header that is present but not a
/// usable number (HTTP dates included) maps to [`UNPARSEABLE_RETRY_AFTER`].
pub fn parse_retry_after(header_value: Option<&str>) -> Option<Duration> {
    let value = header_value?.trim();
    let delay = value
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .unwrap_or(UNPARSEABLE_RETRY_AFTER);
    Some(delay)
}

/// Result of a single network call
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl FetchResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Attach a header, ignoring values that are not valid header text
    pub fn with_header(mut self, name: reqwest::header::HeaderName, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Delay requested by `Retry-After`, if the response carried one
    pub fn retry_after(&self) -> Option<Duration> {
        parse_retry_after(self.headers.get(RETRY_AFTER).and_then(|v| v.to_str().ok()))
    }
}

/// Bounded retry around one network operation
///
/// Every attempt, including retries, is admitted by the source's rate
/// limiter first. Backoff sleeps only suspend the calling task.
#[derive(Debug, Clone)]
pub struct FetchRetryPolicy {
    source: String,
    limiter: SharedRateLimiter,
    clock: SharedClock,
    max_retries: u32,
}

impl FetchRetryPolicy {
    /// Create a policy that sleeps on the tokio timer
    pub fn new(source: impl Into<String>, limiter: SharedRateLimiter, max_retries: u32) -> Self {
        Self::with_clock(source, limiter, max_retries, TokioClock::shared())
    }

    /// Create a policy with an injected clock
    pub fn with_clock(
        source: impl Into<String>,
        limiter: SharedRateLimiter,
        max_retries: u32,
        clock: SharedClock,
    ) -> Self {
        Self {
            source: source.into(),
            limiter,
            clock,
            max_retries: max_retries.max(1),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Run `operation` with the configured attempt budget
    ///
    /// Returns `None` when the resource is absent or every attempt failed.
    pub async fn fetch<F, Fut>(&self, request_type: RequestType, operation: F) -> Option<Bytes>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<FetchResponse, FetchError>>,
    {
        self.fetch_with(self.max_retries, request_type, operation)
            .await
    }

    /// Like [`fetch`](Self::fetch) with an explicit attempt budget
    pub async fn fetch_with<F, Fut>(
        &self,
        max_retries: u32,
        request_type: RequestType,
        operation: F,
    ) -> Option<Bytes>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<FetchResponse, FetchError>>,
    {
        match self.execute_with(max_retries, request_type, operation).await {
            Ok(body) => Some(body),
            Err(FetchError::NotFound) => None,
            Err(e) => {
                warn!(
                    source = %self.source,
                    request_type = %request_type,
                    error = %e,
                    "Fetch abandoned, skipping unit of work"
                );
                None
            }
        }
    }

    /// Run `operation` and report why it failed, if it did
    pub async fn execute<F, Fut>(
        &self,
        request_type: RequestType,
        operation: F,
    ) -> Result<Bytes, FetchError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<FetchResponse, FetchError>>,
    {
        self.execute_with(self.max_retries, request_type, operation)
            .await
    }

    /// Core retry loop; `attempt` passed to `operation` is 0-based
    pub async fn execute_with<F, Fut>(
        &self,
        max_retries: u32,
        request_type: RequestType,
        mut operation: F,
    ) -> Result<Bytes, FetchError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<FetchResponse, FetchError>>,
    {
        let attempts = max_retries.max(1);
        let mut last = ErrorKind::Transient;

        for attempt in 0..attempts {
            self.limiter.acquire(&self.source, request_type).await;

            let error = match operation(attempt).await {
                Ok(response) if response.status == 200 => {
                    debug!(
                        source = %self.source,
                        request_type = %request_type,
                        attempt = attempt,
                        size = %format_bytes(response.body.len() as u64),
                        "Fetch succeeded"
                    );
                    metrics::record_fetch_attempt(&self.source, "success");
                    return Ok(response.body);
                }
                Ok(response) => FetchError::from_status(response.status, response.retry_after()),
                Err(e) => e,
            };

            last = error.kind();
            metrics::record_fetch_attempt(&self.source, last.as_str());

            let delay = match &error {
                FetchError::NotFound => {
                    warn!(
                        source = %self.source,
                        request_type = %request_type,
                        "Resource not found, not retrying"
                    );
                    return Err(error);
                }
                FetchError::RateLimited { retry_after } => {
                    retry_after.unwrap_or_else(|| rate_limit_backoff(attempt))
                }
                e if e.kind() == ErrorKind::Transient => transient_backoff(attempt),
                _ => {
                    warn!(
                        source = %self.source,
                        error = %error,
                        "Non-retryable fetch error"
                    );
                    return Err(error);
                }
            };

            if attempt + 1 >= attempts {
                warn!(
                    source = %self.source,
                    request_type = %request_type,
                    attempts = attempts,
                    error = %error,
                    "Fetch failed on final attempt"
                );
                break;
            }

            warn!(
                source = %self.source,
                request_type = %request_type,
                attempt = attempt + 1,
                max_attempts = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Fetch attempt failed, backing off"
            );
            metrics::record_backoff(&self.source, delay.as_secs_f64());
            self.clock.sleep(delay).await;
        }

        Err(FetchError::RetriesExhausted { attempts, last })
    }
}

/// HTTP client for one source
///
/// The underlying connection pool is released by [`Resource::close`];
/// requests issued afterwards fail with [`FetchError::Closed`].
pub struct HttpFetcher {
    client: RwLock<Option<Client>>,
    policy: FetchRetryPolicy,
    user_agent: Option<String>,

    /// Optional base URL override for testing with mock servers
    base_url: Option<String>,
}

impl HttpFetcher {
    /// Create a fetcher from worker configuration
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Http` if the HTTP client cannot be created
    pub fn from_config(config: &Config, limiter: SharedRateLimiter) -> Result<Self, FetchError> {
        let policy = FetchRetryPolicy::new(&config.source.name, limiter, config.fetch.max_retries);
        Self::with_policy(
            policy,
            config.request_timeout(),
            config.connect_timeout(),
            config.fetch.user_agent.clone(),
        )
    }

    /// Create a fetcher around an existing policy
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Http` if the HTTP client cannot be created
    pub fn with_policy(
        policy: FetchRetryPolicy,
        timeout: Duration,
        connect_timeout: Duration,
        user_agent: Option<String>,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .gzip(true)
            .cookie_store(true)
            .build()?;

        Ok(Self {
            client: RwLock::new(Some(client)),
            policy,
            user_agent,
            base_url: None,
        })
    }

    /// Prepend `base_url` to every requested path (for mock servers)
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = Some(base_url.trim_end_matches('/').to_string());
        self
    }

    pub fn policy(&self) -> &FetchRetryPolicy {
        &self.policy
    }

    /// GET `url`; `None` means skip this unit of work
    pub async fn get(&self, url: &str, request_type: RequestType) -> Option<Bytes> {
        let full_url = self.resolve(url);
        let target = full_url.as_str();
        self.policy
            .fetch(request_type, move |_attempt| self.send_once(target))
            .await
    }

    /// GET `url`, reporting the failure reason
    pub async fn get_detailed(
        &self,
        url: &str,
        request_type: RequestType,
    ) -> Result<Bytes, FetchError> {
        let full_url = self.resolve(url);
        let target = full_url.as_str();
        self.policy
            .execute(request_type, move |_attempt| self.send_once(target))
            .await
    }

    fn resolve(&self, url: &str) -> String {
        match &self.base_url {
            Some(base) if !url.starts_with("http://") && !url.starts_with("https://") => {
                format!("{base}{url}")
            }
            _ => url.to_string(),
        }
    }

    fn client(&self) -> Result<Client, FetchError> {
        self.client
            .read()
            .map_err(|_| FetchError::Closed)?
            .clone()
            .ok_or(FetchError::Closed)
    }

    /// One GET without retries
    async fn send_once(&self, url: &str) -> Result<FetchResponse, FetchError> {
        let client = self.client()?;
        let response = client
            .get(url)
            .headers(self.build_headers(url))
            .send()
            .await
            .map_err(Self::classify_transport)?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = if status == 200 {
            response.bytes().await.map_err(Self::classify_transport)?
        } else {
            Bytes::new()
        };

        Ok(FetchResponse {
            status,
            headers,
            body,
        })
    }

    fn classify_transport(err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Http(err)
        }
    }

    /// Browser-like headers with a referer pointing at the site root
    fn build_headers(&self, url: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();

        let agent = self
            .user_agent
            .as_deref()
            .and_then(|ua| HeaderValue::from_str(ua).ok())
            .unwrap_or_else(|| HeaderValue::from_static(Self::random_user_agent()));
        headers.insert(USER_AGENT, agent);

        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        if let Ok(parsed) = url::Url::parse(url) {
            let origin = parsed.origin().ascii_serialization();
            if let Ok(referer) = HeaderValue::from_str(&format!("{origin}/")) {
                headers.insert(REFERER, referer);
            }
        }

        headers
    }

    /// Get a random user agent from the pool
    fn random_user_agent() -> &'static str {
        let mut rng = rand::thread_rng();
        USER_AGENTS.choose(&mut rng).unwrap_or(&USER_AGENTS[0])
    }
}

#[async_trait]
impl Resource for HttpFetcher {
    fn name(&self) -> &str {
        "http-client"
    }

    async fn close(&self) -> anyhow::Result<()> {
        let released = self
            .client
            .write()
            .map_err(|_| anyhow::anyhow!("HTTP client lock poisoned"))?
            .take();

        if released.is_some() {
            debug!(source = %self.policy.source(), "HTTP client released");
        }
        Ok(())
    }
}
