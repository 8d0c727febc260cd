//! OTA Agent - Main entry point

use anyhow::{Context, Result};
use clap::Parser;
use ota_agent::{
    api,
    backup::BackupStore,
    command::CommandQueue,
    config::Config,
    daemon::shutdown::ShutdownCoordinator,
    notify::BroadcastSink,
    orchestrator::{OrchestratorSettings, UpdateOrchestrator},
    scheduler::{TaskHandler, TaskScheduler},
    state_store::StateStore,
    transport::OtaClient,
    utils,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Port for the local API (overrides config)
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
        config.api.port = port;
    }

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level, &config.log.output)?;

    let device_id = match config.device.id.clone() {
        Some(id) => id,
        None => utils::device_id::load_or_create(&config.device_id_file()),
    };

    tracing::info!(
        "Starting ota-agent v{} (device: {}, product: {})",
        env!("CARGO_PKG_VERSION"),
        device_id,
        config.device.product_type
    );

    std::fs::create_dir_all(&config.device.data_dir)
        .with_context(|| format!("creating {}", config.device.data_dir.display()))?;

    let client = OtaClient::new(
        &config.server.url,
        &config.device.product_type,
        &device_id,
        &config.network,
    )?;
    let scheduler = Arc::new(TaskScheduler::new(
        config.schedule.poll_interval(),
        config.schedule.error_backoff(),
    ));
    let events = BroadcastSink::new();

    let orchestrator = Arc::new(UpdateOrchestrator::new(
        OrchestratorSettings::from_config(&config)?,
        client,
        Arc::new(BackupStore::new(&config.backup, &device_id)),
        scheduler.clone(),
        StateStore::open(&config.state_file()),
        Arc::new(events.clone()),
        Arc::new(CommandQueue::new()),
    ));
    tracing::info!("Installed version: {}", orchestrator.current_version());

    orchestrator.register_tasks(&config.schedule.check_times);
    let handler: Arc<dyn TaskHandler> = orchestrator.clone();
    scheduler.start(handler);

    let shutdown = ShutdownCoordinator::new(Duration::from_secs(30));

    let server_handle = if config.api.enabled {
        let addr = config.api_addr()?;
        let app = api::create_router(api::AppState::new(orchestrator.clone(), events));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding {}", addr))?;

        tracing::info!("Listening on http://{}", addr);
        tracing::info!("WebSocket endpoint: ws://{}/ws", addr);

        let signalled = shutdown.signalled();
        Some(tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(signalled)
                .await
        }))
    } else {
        tracing::info!("Local API disabled");
        None
    };

    // Wait for shutdown signal
    shutdown.wait_for_signal().await;
    shutdown.shutdown(&scheduler).await;

    if let Some(handle) = server_handle {
        match tokio::time::timeout(Duration::from_secs(5), handle).await {
            Ok(Ok(Ok(()))) => tracing::info!("Server shutdown complete"),
            Ok(Ok(Err(e))) => tracing::error!("Server error during shutdown: {}", e),
            Ok(Err(e)) => tracing::error!("Server task panicked: {}", e),
            Err(_) => tracing::warn!("Server shutdown timeout, forcing exit"),
        }
    }

    Ok(())
}
