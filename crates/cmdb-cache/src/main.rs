//! CMDB Cache - Host and topology cache synchronization daemon

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;

use cmdb_core::{EngineConfig, HostTopoCacheManager};
use cmdb_inventory::{HttpInventoryClient, InventoryClientConfig, InventorySource};
use cmdb_store::MemoryStore;
use config::Config;

/// CMDB Cache - keeps the host/topology cache in sync with the inventory source
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    /// Run a single refresh pass and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)?;
    init_logging(&config.logging.level);

    info!("Starting CMDB Cache v{}", env!("CARGO_PKG_VERSION"));
    info!("Upstream: {}", config.upstream.base_url);

    let store = Arc::new(MemoryStore::new());
    let inventory = Arc::new(HttpInventoryClient::new(InventoryClientConfig {
        base_url: config.upstream.base_url.clone(),
        auth_token: config.upstream.auth_token.clone(),
    })?);

    let engine_config = EngineConfig {
        key_prefix: config.cache.key_prefix.clone(),
        expire: Duration::from_secs(config.cache.expire_secs),
        concurrent_limit: config.cache.concurrent_limit,
        fetch_timeout: Duration::from_secs(config.cache.fetch_timeout_secs),
        store_timeout: Duration::from_secs(config.cache.store_timeout_secs),
        page_size: config.cache.page_size,
    };
    let manager = HostTopoCacheManager::new(engine_config, inventory.clone(), store)?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            shutdown.cancel();
        }
    });

    let interval = Duration::from_secs(config.cache.refresh_interval_secs);
    loop {
        if let Err(e) = run_refresh_pass(&manager, inventory.as_ref(), &cancel).await {
            error!("Refresh pass failed: {}", e);
        }
        if args.once || cancel.is_cancelled() {
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    info!("CMDB Cache stopped");
    Ok(())
}

/// One cold refresh pass over every business unit
async fn run_refresh_pass(
    manager: &HostTopoCacheManager,
    inventory: &dyn InventorySource,
    cancel: &CancellationToken,
) -> Result<()> {
    manager.reset().await;

    let units = inventory.list_business_units().await?;
    info!("Refreshing cache for {} business units", units.len());

    let unit_ids: Vec<i64> = units.iter().map(|u| u.id).collect();
    manager.refresh_units(cancel, &unit_ids).await;

    manager.publish_global_index(cancel).await?;
    manager.reconcile_deleted(cancel).await?;

    info!("Refresh pass complete");
    Ok(())
}

/// Initialize logging
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}
