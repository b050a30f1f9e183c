//! SD Sync Agent - Main entry point

use anyhow::Result;
use clap::Parser;
use sdsync_agent::{api, config::Config, daemon::shutdown::ShutdownCoordinator, utils};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::info!("Starting sdsync-agent v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Device store: {}", config.devices_path().display());
    tracing::info!("Rename cache: {}", config.renames_path().display());

    let addr = config.listen_addr();
    let app_state = api::AppState::new(config);
    let jobs = app_state.jobs.clone();
    let app = api::create_router(app_state);

    let coordinator = ShutdownCoordinator::new();
    let mut server_shutdown = coordinator.subscribe();

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{}", addr);

    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        server_shutdown.recv().await.ok();
    });
    let server_handle = tokio::spawn(async move { server.await });

    coordinator.wait_for_signal().await;

    // Stop the transfer before the server stops answering status polls
    coordinator.shutdown(&jobs).await;

    match tokio::time::timeout(Duration::from_secs(5), server_handle).await {
        Ok(Ok(Ok(()))) => tracing::info!("Server shutdown complete"),
        Ok(Ok(Err(e))) => tracing::error!("Server error during shutdown: {}", e),
        Ok(Err(e)) => tracing::error!("Server task panicked: {}", e),
        Err(_) => tracing::warn!("Server shutdown timeout, forcing exit"),
    }

    Ok(())
}
