//! wialon-gateway - Wialon IPS ingestion gateway
//!
//! Accepts device connections over TCP, acknowledges every packet, and writes
//! accepted telemetry as JSON lines.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;
use wialon_server::config::CONFIG_ENV;
use wialon_server::{
    run_metrics_server, spawn_json_writer, ChannelSink, Config, Metrics, Server, ServerConfig,
};

/// How long to wait for buffered telemetry to be written on shutdown.
const SINK_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if WIALON_CONFIG is set, then env overrides)
    let config_path = std::env::var(CONFIG_ENV).ok();
    let config = match Config::load() {
        Ok(c) => {
            if let Some(ref path) = config_path {
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
            Config::default()
        }
    };

    tracing::info!("Starting wialon gateway");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  Idle timeout: {}s", config.network.idle_timeout_secs);
    tracing::info!("  Max connections: {}", config.network.max_connections);
    tracing::info!("  Max frame size: {} bytes", config.network.max_frame_size);

    // Telemetry sink
    let (sink, rx) = ChannelSink::new(config.sink.buffer_size);
    let writer = spawn_json_writer(rx, config.sink.output.as_deref()).await?;

    // Metrics
    let (metrics_shutdown, _) = broadcast::channel(1);
    let mut server_config = ServerConfig::from(&config.network);
    let metrics_handle = if config.metrics.enabled {
        let metrics = Arc::new(Metrics::new()?);
        server_config = server_config.with_metrics(metrics.clone());
        tracing::info!("  Metrics: http://{}/metrics", config.metrics.bind_addr);

        let addr = config.metrics.bind_addr;
        let shutdown_rx = metrics_shutdown.subscribe();
        Some(tokio::spawn(async move {
            if let Err(e) = run_metrics_server(addr, metrics, shutdown_rx).await {
                tracing::error!("Metrics server error: {}", e);
            }
        }))
    } else {
        tracing::info!("  Metrics: disabled");
        None
    };

    let server = Arc::new(Server::new(server_config, Arc::new(sink)));

    // Spawn shutdown signal handler
    let shutdown_server = server.clone();
    let shutdown_metrics = metrics_shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping gateway...");
        shutdown_server.shutdown();
        let _ = shutdown_metrics.send(());
    });

    // Run server (blocks until shutdown)
    server.run().await?;

    if let Some(handle) = metrics_handle {
        let _ = handle.await;
    }

    // The writer finishes once every sink clone is dropped.
    drop(server);
    match tokio::time::timeout(SINK_DRAIN_TIMEOUT, writer).await {
        Ok(Ok(Ok(written))) => tracing::info!("Telemetry writer stopped ({} events)", written),
        Ok(Ok(Err(e))) => tracing::error!("Telemetry writer failed: {}", e),
        Ok(Err(e)) => tracing::error!("Telemetry writer panicked: {}", e),
        Err(_) => tracing::warn!("Timed out draining telemetry"),
    }

    tracing::info!("Gateway stopped");
    Ok(())
}
