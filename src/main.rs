mod adapters;
mod application;
mod config;
mod domain;
mod interface;
mod ports;

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use adapters::DockerCli;
use application::MonitoringService;
use config::Config;
use interface::http::create_router;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("statstream={},tower_http=info", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting statstream v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration: {:?}", config);

    let runtime = Arc::new(DockerCli::new(config.docker_bin.clone()));
    let monitoring_service = Arc::new(MonitoringService::new(runtime, config.default_cadence()));
    let registry = monitoring_service.registry().clone();

    let app = create_router(monitoring_service, &config.static_dir);
    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Container stats viewer listening on {}", addr);
    info!("  → Dashboard: http://localhost:{}", config.port);
    info!("  → Stream: ws://localhost:{}/ws", config.port);
    info!("Make sure {} is available and containers are running", config.docker_bin);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down, stopping all stats streams");
            // closes every subscriber outbox so open sockets wind down
            registry.shutdown();
        })
        .await?;

    Ok(())
}
