//! Common test utilities

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use newsdesk::config::Config;
use newsdesk::crawler::rate_limiter::{RateLimitConfig, RateLimiter};
use newsdesk::models::CandidateItem;
use newsdesk::utils::clock::ManualClock;

/// Limiter driven by a manual clock, plus the clock itself
#[allow(dead_code)]
pub fn manual_limiter(max: u32, delay: Duration) -> (Arc<RateLimiter>, Arc<ManualClock>) {
    let clock = ManualClock::shared();
    let limiter = Arc::new(RateLimiter::with_clock(
        RateLimitConfig::new(max, delay),
        clock.clone(),
    ));
    (limiter, clock)
}

/// Create a candidate with a title and body
#[allow(dead_code)]
pub fn create_candidate(source: &str, external_id: &str) -> CandidateItem {
    CandidateItem::new(source, external_id)
        .with_title(format!("Article {external_id}"))
        .with_body("Test content")
}

/// Worker config whose storage lives under `dir`
#[allow(dead_code)]
pub fn temp_config(source: &str, dir: &Path) -> Config {
    let mut config = Config::for_source(source);
    config.storage.database_path = dir.join("newsdesk.db");
    config.storage.media_dir = dir.join("media");
    config
}
