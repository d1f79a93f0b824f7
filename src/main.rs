//! incidentcast - streams live incident events to WebSocket clients.

use anyhow::Result;
use clap::Parser;
use incidentcast::{app::App, cli::Cli, config::Config};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration by layering sources: defaults, file, environment, and CLI args.
    let config = match Config::load(&cli) {
        Ok(config) => config,
        Err(err) => {
            tracing_subscriber::fmt().init();
            error!("Failed to load configuration: {:#}", err);
            std::process::exit(1);
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("incidentcast starting up...");
    info!("-------------------- Configuration --------------------");
    info!("Log Level: {}", config.log_level);
    info!("Listen Address: {}", config.server.listen_address);
    info!("Endpoint Path: {}", config.server.endpoint_path);
    info!("Snapshot Limit: {}", config.sessions.snapshot_limit);
    info!("Outbound Queue Capacity: {}", config.sessions.outbound_queue_capacity);
    info!("Write Timeout: {}ms", config.sessions.write_timeout_ms);
    info!("Handshake Timeout: {}ms", config.server.handshake_timeout_ms);
    info!("Site Timezone: {}", config.time.site_timezone);
    info!("Configured Tokens: {}", config.auth.tokens.len());
    info!(
        "Metrics: {}",
        if config.metrics.enabled {
            config.metrics.listen_address.to_string()
        } else {
            "Disabled".to_string()
        }
    );
    info!("-------------------------------------------------------");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    // Stand-alone, the in-memory stores start empty; embedders supply their
    // own through `AppBuilder`.
    let app = App::builder(config).build(shutdown_rx).await?;

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received. Shutting down gracefully..."),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        let _ = shutdown_tx.send(true);
    });

    app.run().await
}
