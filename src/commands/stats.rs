use anyhow::{Context, Result};
use serde::Serialize;

use newsdesk::config::Config;
use newsdesk::storage::{RecordStore, SourceCount, SqliteRecordStore};

#[derive(Serialize)]
struct StatsReport {
    database: String,
    total_records: u64,
    sources: Vec<SourceCount>,
}

pub async fn stats(config: &Config, format: &str) -> Result<()> {
    let database = &config.storage.database_path;
    if !database.exists() {
        println!("Database not found: {}", database.display());
        println!("Run a worker first to create the database.");
        return Ok(());
    }

    let store = SqliteRecordStore::new(database)
        .with_context(|| format!("Failed to open {}", database.display()))?;
    let report = StatsReport {
        database: database.display().to_string(),
        total_records: store.count().await?,
        sources: store.source_counts().await?,
    };

    if format == "json" {
        let json = serde_json::to_string_pretty(&report).context("Failed to encode stats")?;
        println!("{json}");
        return Ok(());
    }

    println!("Ingestion Statistics");
    println!("====================");
    println!("Database: {}", report.database);
    println!();
    println!("Total records: {}", report.total_records);

    if report.sources.is_empty() {
        return Ok(());
    }

    println!();
    println!("{:<24} {:>10}  {}", "Source", "Records", "Last run");
    println!("{:-<60}", "");
    for entry in &report.sources {
        let last_run = entry
            .last_run_at
            .map(|at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!("{:<24} {:>10}  {}", entry.source, entry.records, last_run);
    }

    Ok(())
}
