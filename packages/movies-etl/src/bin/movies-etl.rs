//! movies-etl - keep the movies search index in sync with PostgreSQL
//!
//! # Usage
//!
//! ```bash
//! # Defaults + environment (.env honoured)
//! movies-etl
//!
//! # YAML config, single pass
//! movies-etl --config etl.yaml --once
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use movies_etl::{
    ElasticsearchIndex, EtlConfig, PostgresSource, RetryPolicy, SyncScheduler,
};
use movies_etl_state::RedisStateStore;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "movies-etl")]
#[command(about = "Incremental PostgreSQL to Elasticsearch synchronizer", long_about = None)]
struct Cli {
    /// YAML configuration file (must declare `version: 1`)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run a single tick and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("movies_etl=info,movies_etl_state=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = EtlConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let retry = config.retry.clone();

    let scheduler = build_scheduler(&config, &retry).await?;

    if cli.once {
        let report = scheduler.tick().await?;
        info!("Single tick complete: {:?}", report);
        return Ok(());
    }

    info!(
        "Starting sync loop every {:?} over {} tables",
        config.sync.tick_interval(),
        scheduler.tables().len()
    );
    scheduler.run_until(shutdown_signal()).await?;
    Ok(())
}

async fn build_scheduler(config: &EtlConfig, retry: &RetryPolicy) -> anyhow::Result<SyncScheduler> {
    let redis_url = config.redis.url();
    let store = retry
        .run("connect redis", || RedisStateStore::connect(&redis_url))
        .await
        .context("Failed to connect to Redis")?;

    let root = config
        .sync
        .root_table()
        .context("No root table configured")?
        .name
        .clone();
    let source = retry
        .run("connect postgres", || PostgresSource::connect(&config.postgres, &root))
        .await
        .context("Failed to connect to PostgreSQL")?;

    let index = ElasticsearchIndex::new(&config.elasticsearch)?;
    if config.elasticsearch.create_index {
        retry
            .run("ensure index", || index.ensure_index())
            .await
            .context("Failed to prepare Elasticsearch index")?;
    }

    let scheduler = SyncScheduler::new(
        &config.sync,
        retry.clone(),
        Arc::new(store),
        Arc::new(source),
        Arc::new(index),
    )?;
    Ok(scheduler)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for ctrl-c, running until killed: {}", e);
        std::future::pending::<()>().await;
    }
}
