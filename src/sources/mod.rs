//! Built-in sources
//!
//! Source-specific parsing lives outside this crate. The only built-in
//! source fetches a fixed list of URLs and stores each payload verbatim,
//! keyed by its canonical URL.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::crawler::fetcher::HttpFetcher;
use crate::crawler::rate_limiter::RequestType;
use crate::crawler::source::{CycleContext, CycleReport, Source};
use crate::models::{CandidateItem, NewsRecord};
use crate::utils::error::PipelineError;

/// Fetches every configured URL once per cycle
pub struct UrlListSource {
    name: String,
    urls: Vec<String>,
    fetcher: Arc<HttpFetcher>,
}

impl UrlListSource {
    pub fn new(name: impl Into<String>, urls: Vec<String>, fetcher: Arc<HttpFetcher>) -> Self {
        Self {
            name: name.into(),
            urls,
            fetcher,
        }
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }
}

#[async_trait]
impl Source for UrlListSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_cycle(&self, ctx: &CycleContext) -> anyhow::Result<CycleReport> {
        let mut report = CycleReport::default();

        if self.urls.is_empty() {
            info!(source = %self.name, "No URLs configured, nothing to fetch");
            return Ok(report);
        }

        for url in &self.urls {
            if ctx.shutdown.is_shutdown() {
                info!(source = %self.name, "Shutdown requested, ending cycle early");
                break;
            }

            let item = match CandidateItem::from_url(&self.name, url) {
                Ok(item) => item,
                Err(e) => {
                    warn!(source = %self.name, url = %url, error = %e, "Skipping invalid URL");
                    report.record_unfetched();
                    continue;
                }
            };

            let fetcher = &self.fetcher;
            ctx.process_with(&mut report, item, |item| async move {
                let body = fetcher.get_detailed(url, RequestType::Page).await?;
                let title = item.external_id.clone();
                let item = item
                    .with_title(title)
                    .with_body(String::from_utf8_lossy(&body).into_owned());
                Ok::<_, PipelineError>(NewsRecord::from_candidate(&item))
            })
            .await;
        }

        Ok(report)
    }
}

/// Source for the configured worker
pub fn build_source(config: &Config, fetcher: Arc<HttpFetcher>) -> Arc<dyn Source> {
    Arc::new(UrlListSource::new(
        &config.source.name,
        config.source.urls.clone(),
        fetcher,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::fetcher::FetchRetryPolicy;
    use crate::crawler::pipeline::IdempotentPipeline;
    use crate::crawler::rate_limiter::{RateLimitConfig, RateLimiter};
    use crate::scheduler::shutdown::ShutdownHandle;
    use crate::storage::{MemoryRecordStore, RecordStore};
    use std::time::Duration;

    fn fetcher() -> Arc<HttpFetcher> {
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig::new(100, Duration::ZERO)));
        let policy = FetchRetryPolicy::new("test", limiter, 1);
        Arc::new(
            HttpFetcher::with_policy(policy, Duration::from_secs(5), Duration::from_secs(2), None)
                .unwrap(),
        )
    }

    fn context(store: Arc<MemoryRecordStore>, shutdown: &ShutdownHandle) -> CycleContext {
        CycleContext::new(
            "test",
            Arc::new(IdempotentPipeline::new(store)),
            shutdown.signal(),
        )
    }

    #[tokio::test]
    async fn test_empty_url_list() {
        let store = Arc::new(MemoryRecordStore::new());
        let source = UrlListSource::new("test", Vec::new(), fetcher());

        let report = source
            .fetch_cycle(&context(store, &ShutdownHandle::new()))
            .await
            .unwrap();
        assert_eq!(report, CycleReport::default());
    }

    #[tokio::test]
    async fn test_invalid_url_is_counted() {
        let store = Arc::new(MemoryRecordStore::new());
        let source = UrlListSource::new("test", vec!["not a url".to_string()], fetcher());

        let report = source
            .fetch_cycle(&context(store.clone(), &ShutdownHandle::new()))
            .await
            .unwrap();
        assert_eq!(report.attempted, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stops_when_shutdown_requested() {
        let store = Arc::new(MemoryRecordStore::new());
        let shutdown = ShutdownHandle::new();
        shutdown.shutdown();

        let source = UrlListSource::new(
            "test",
            vec!["http://127.0.0.1:9/a".to_string()],
            fetcher(),
        );
        let report = source
            .fetch_cycle(&context(store, &shutdown))
            .await
            .unwrap();
        assert_eq!(report.attempted, 0);
    }

    #[tokio::test]
    async fn test_build_source_uses_config() {
        let mut config = Config::for_source("tasnim");
        config.source.urls = vec!["https://www.tasnimnews.com/en".to_string()];

        let source = build_source(&config, fetcher());
        assert_eq!(source.name(), "tasnim");
    }
}
