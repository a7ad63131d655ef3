use anyhow::Result;
use clap::{Parser, Subcommand};
use newsdesk::config::{Config, LoggingConfig};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(
    name = "newsdesk",
    version,
    about = "Polling news ingestion worker with per-source rate limiting",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides LOG_FORMAT and the config file
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the worker until SIGTERM/SIGINT
    Run {
        /// TOML config file (environment variables are used otherwise)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Validate and print the configuration
    CheckConfig {
        /// TOML config file (environment variables are used otherwise)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Show record counts per source
    Stats {
        /// TOML config file (environment variables are used otherwise)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

impl Commands {
    fn config_path(&self) -> Option<&Path> {
        match self {
            Commands::Run { config }
            | Commands::CheckConfig { config }
            | Commands::Stats { config, .. } => config.as_deref(),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // The config carries the logging section, so it loads before tracing
    let config = commands::load_config(cli.command.config_path());
    let logging = config
        .as_ref()
        .map(|c| c.logging.clone())
        .unwrap_or_default();
    setup_tracing(&logging, cli.log_format.as_deref(), cli.verbose);

    let result = match config {
        Ok(config) => dispatch(cli.command, config).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        tracing::error!(error = %format!("{e:#}"), "newsdesk failed");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn dispatch(command: Commands, config: Config) -> Result<()> {
    match command {
        Commands::Run { .. } => {
            tracing::info!(source = %config.source.name, "Starting run command");
            commands::run(config).await
        }

        Commands::CheckConfig { .. } => commands::check_config(&config),

        Commands::Stats { format, .. } => commands::stats(&config, &format).await,
    }
}

fn setup_tracing(logging: &LoggingConfig, cli_format: Option<&str>, verbose: bool) {
    let (level, format) = logging.effective(
        cli_format,
        std::env::var("LOG_LEVEL").ok(),
        std::env::var("LOG_FORMAT").ok(),
    );
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            tracing_subscriber::EnvFilter::new("newsdesk=debug,info")
        } else {
            tracing_subscriber::EnvFilter::new(format!(
                "newsdesk={},warn",
                level.to_ascii_lowercase()
            ))
        }
    });

    match format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }
}
