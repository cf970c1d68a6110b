//! relaymq - message broker ingestion core
//!
//! Accepts framed connections, enqueues transfers inside local transactions
//! and flows uncommitted content to disk past a per-transaction ceiling.

use relaymq_core::TracingEventLogger;
use relaymq_server::{Broker, Config, Server, ServerConfig};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if RELAYMQ_CONFIG is set, then env overrides)
    let config_path = std::env::var("RELAYMQ_CONFIG").ok();
    let config = match Config::load() {
        Ok(c) => {
            if let Some(path) = &config_path {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // If a config file was explicitly specified, fail on error
            if config_path.is_some() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            Config::from_env()
        }
    };

    if let Err(e) = config.validate() {
        tracing::error!("Invalid configuration: {}", e);
        return Err(e.into());
    }

    tracing::info!("Starting relaymq broker");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  Data directory: {}", config.storage.data_dir.display());
    tracing::info!(
        "  Max uncommitted in memory: {} bytes",
        config.transactions.max_uncommitted_in_memory_bytes
    );
    tracing::info!("  Key stores: {}", config.keystores.stores.len());

    let server_config = ServerConfig::from_config(&config);
    let broker = Broker::open(config, Arc::new(TracingEventLogger))?;
    broker.start()?;

    let server = Arc::new(Server::new(server_config, broker.clone()));

    // Spawn shutdown signal handler
    let shutdown_server = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping server...");
        shutdown_server.shutdown();
    });

    // Run server (blocks until shutdown)
    let result = server.run().await;

    if let Err(e) = broker.stop() {
        tracing::error!("Failed to stop broker cleanly: {}", e);
    }
    result?;

    tracing::info!("Server stopped");
    Ok(())
}
