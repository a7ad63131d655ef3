use anyhow::Result;

use newsdesk::config::Config;
use newsdesk::crawler::Worker;
use newsdesk::metrics;
use newsdesk::scheduler::listen_for_os_signals;

pub async fn run(config: Config) -> Result<()> {
    if let Err(e) = metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics initialization failed, continuing without metrics");
    }

    let worker = Worker::new(config.clone()).await?;
    let signals = listen_for_os_signals(worker.shutdown_handle());

    let result = worker.run().await;
    signals.abort();

    if let Some(path) = &config.logging.metrics_path {
        match metrics::write_textfile(path) {
            Ok(()) => tracing::info!(path = %path.display(), "Metrics written"),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to write metrics"),
        }
    }

    let snapshot = result?;

    println!("Worker Summary");
    println!("==============");
    println!("Source:          {}", config.source.name);
    println!("Cycles:          {}", snapshot.cycles);
    println!("  Failed:        {}", snapshot.failed_cycles);
    println!("  Overruns:      {}", snapshot.overruns);
    println!("  Cancelled:     {}", snapshot.cancelled_cycles);
    println!("Items saved:     {}", snapshot.items_saved);
    println!("Items skipped:   {}", snapshot.items_skipped);
    println!("Items failed:    {}", snapshot.items_failed);

    Ok(())
}

pub fn check_config(config: &Config) -> Result<()> {
    println!("{}", config.display());
    println!("Configuration is valid.");
    Ok(())
}
