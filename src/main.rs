use anyhow::Context;
use clap::Parser;
use paper_aggregator::{AppConfig, Fetcher, Scheduler, SourceRegistry, Store, Taxonomy};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "paper-aggregator", about = "Physics research feed aggregator")]
struct Args {
    /// Path to the TOML configuration (sources, taxonomy, tuning).
    #[arg(long, default_value = "aggregator.toml")]
    config: PathBuf,

    /// Run a single refresh cycle and exit.
    #[arg(long)]
    once: bool,

    /// Store snapshot file for warm restarts.
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let config = AppConfig::load(&args.config)
        .with_context(|| format!("loading config from {}", args.config.display()))?;

    let taxonomy = Arc::new(Taxonomy::from_config(&config.taxonomy)?);
    let fetcher = Arc::new(Fetcher::new(config.fetch.clone())?);
    let registry = Arc::new(SourceRegistry::new(config.sources.clone()));

    let store = match &args.snapshot {
        Some(path) => Arc::new(Store::load_snapshot(path).await?),
        None => Arc::new(Store::new()),
    };

    let scheduler = Arc::new(Scheduler::new(
        fetcher,
        registry,
        store.clone(),
        taxonomy,
        config.scheduler.clone(),
        args.snapshot.clone(),
    ));

    if args.once {
        let summary = scheduler.run_cycle().await;
        info!(
            "Single cycle finished: {} committed, {} store entries",
            summary.entries_committed,
            store.len().await
        );
        return Ok(());
    }

    info!("Starting refresh loop (ctrl-c to stop)");
    tokio::select! {
        _ = scheduler.clone().run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    if let Some(path) = &args.snapshot {
        store.save_snapshot(path).await?;
    }

    Ok(())
}
