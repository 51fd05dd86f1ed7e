//! pingme - on-demand latency probes
//!
//! Pings the caller's own address in the background and serves the results.

mod config;
mod db;
mod probe;
mod scheduler;
mod web;

use config::{ServerConfig, StoreKind};
use db::{FileStore, JobStore, SqliteStore};
use probe::ProbeRunner;
use scheduler::JobManager;
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("pingme=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!(
        "Starting pingme on {} ({} output, {} concurrent probes)",
        cfg.bind,
        cfg.runner.platform,
        cfg.runner.max_concurrent
    );

    // Initialize job storage
    let store: Arc<dyn JobStore> = match cfg.store {
        StoreKind::File => {
            tracing::info!("Caching results to {}", cfg.cache_dir);
            Arc::new(FileStore::new(&cfg.cache_dir)?)
        }
        StoreKind::Sqlite => {
            tracing::info!("Using database at {}", cfg.db_path);
            let store = SqliteStore::new(&cfg.db_path)?;
            let stale = store.count_in_state("pending")?;
            if stale > 0 {
                tracing::warn!("{} jobs from a previous run never finished", stale);
            }
            Arc::new(store)
        }
    };

    let runner = Arc::new(ProbeRunner::new(cfg.runner.clone()));
    let jobs = JobManager::new(store, runner);

    // Start web server
    let server = Server::new(cfg, jobs);
    server.start().await?;

    Ok(())
}
