//! Tests for config loading from the environment and from TOML

use newsdesk::config::{Config, ConfigError};
use serial_test::serial;
use std::path::Path;
use std::time::Duration;

const VARS: &[&str] = &[
    "WORKER_SOURCE",
    "SOURCE_NAME",
    "POLL_INTERVAL",
    "MAX_REQUESTS_PER_MINUTE",
    "DELAY_BETWEEN_REQUESTS",
    "SOURCE_URLS",
    "MAX_RETRIES",
    "DATABASE_PATH",
    "METRICS_PATH",
];

fn clear_env() {
    for var in VARS {
        std::env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_from_env_reads_worker_settings() {
    clear_env();
    std::env::set_var("WORKER_SOURCE", "irna");
    std::env::set_var("POLL_INTERVAL", "120");
    std::env::set_var("MAX_REQUESTS_PER_MINUTE", "20");
    std::env::set_var("DELAY_BETWEEN_REQUESTS", "2.5");
    std::env::set_var(
        "SOURCE_URLS",
        "https://en.irna.ir/rss, ,https://en.irna.ir/news",
    );
    std::env::set_var("METRICS_PATH", "/tmp/newsdesk.prom");

    let config = Config::from_env().unwrap();
    clear_env();

    assert_eq!(config.source.name, "irna");
    assert_eq!(config.poll_interval(), Duration::from_secs(120));
    assert_eq!(config.rate_limit.max_requests_per_minute, 20);
    assert_eq!(config.delay_between_requests(), Duration::from_millis(2500));
    assert_eq!(
        config.source.urls,
        vec!["https://en.irna.ir/rss", "https://en.irna.ir/news"]
    );
    assert_eq!(
        config.logging.metrics_path.as_deref(),
        Some(Path::new("/tmp/newsdesk.prom"))
    );
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn test_from_env_defaults() {
    clear_env();
    std::env::set_var("SOURCE_NAME", "tasnim");

    let config = Config::from_env().unwrap();
    clear_env();

    assert_eq!(config.source.name, "tasnim");
    assert_eq!(config.poll_interval(), Duration::from_secs(300));
    assert_eq!(config.fetch.max_retries, 3);
    assert!(config.source.urls.is_empty());
    assert!(config.logging.metrics_path.is_none());
}

#[test]
#[serial]
fn test_from_env_requires_source() {
    clear_env();

    let result = Config::from_env();
    assert!(matches!(result, Err(ConfigError::MissingEnvVar(var)) if var == "WORKER_SOURCE"));
}

#[test]
#[serial]
fn test_from_env_rejects_unparseable_values() {
    clear_env();
    std::env::set_var("WORKER_SOURCE", "tasnim");
    std::env::set_var("MAX_RETRIES", "three");

    let result = Config::from_env();
    clear_env();

    match result {
        Err(ConfigError::InvalidValue { field, .. }) => assert_eq!(field, "MAX_RETRIES"),
        other => panic!("expected InvalidValue, got {other:?}"),
    }
}

/// A delay too large for a Duration is a startup error, not a panic
#[test]
#[serial]
fn test_out_of_range_delay_is_rejected() {
    clear_env();
    std::env::set_var("WORKER_SOURCE", "tasnim");
    std::env::set_var("DELAY_BETWEEN_REQUESTS", "1e20");

    let config = Config::from_env().unwrap();
    clear_env();

    match config.validate() {
        Err(ConfigError::InvalidValue { field, .. }) => {
            assert_eq!(field, "rate_limit.delay_between_requests_secs")
        }
        other => panic!("expected InvalidValue, got {other:?}"),
    }
    assert_eq!(config.delay_between_requests(), Duration::ZERO);
}

#[test]
fn test_example_config_is_valid() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("newsdesk.example.toml");
    let config = Config::from_file(&path).unwrap();

    assert!(config.validate().is_ok());
    assert_eq!(config.source.name, "tasnim");
    assert_eq!(config.storage.media_prefix, "news-images");
    assert_eq!(config.close_timeout(), Duration::from_secs(5));
}
