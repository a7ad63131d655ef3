pub mod run;
pub mod stats;

// Re-export command functions for convenience
pub use run::{check_config, run};
pub use stats::stats;

use anyhow::{Context, Result};
use std::path::Path;

use newsdesk::config::Config;

/// Load configuration from `path` if given, otherwise from the environment
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::from_env().context("Failed to load config from environment")?,
    };

    config.validate().context("Invalid configuration")?;
    Ok(config)
}
