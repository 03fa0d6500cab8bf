use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use resigner_core::{
    build_notifier, config_path, load_config, validate_config, CommandTransport, DeviceTransport,
    EntryStore, Installer, RefreshEvent, RefreshOrchestrator, SqliteEntryStore, ToolInstaller,
};
use resigner_server::api::{create_router, WsBroadcaster};
use resigner_server::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("resigner {} starting", VERSION);

    let config_path = config_path();
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    validate_config(&config).context("Configuration validation failed")?;
    info!("Database path: {:?}", config.database.path);
    info!("Data directory: {:?}", config.data.dir);
    info!("Signing tool: {:?}", config.tool.tool_path);

    std::fs::create_dir_all(&config.data.dir)
        .with_context(|| format!("Failed to create data directory {:?}", config.data.dir))?;

    let store: Arc<dyn EntryStore> = Arc::new(
        SqliteEntryStore::new(&config.database.path).context("Failed to open entry store")?,
    );
    info!("Entry store initialized");

    let transport: Arc<dyn DeviceTransport> =
        Arc::new(CommandTransport::new(config.transport.clone()));
    let installer = Arc::new(ToolInstaller::new(
        config.tool.clone(),
        config.data.dir.clone(),
        Arc::clone(&transport),
    ));

    let notifier =
        build_notifier(&config.notification).context("Failed to create notifier")?;
    info!("Notifier: {}", notifier.name());

    // Created before the orchestrator so worker events reach WebSocket clients
    let ws_broadcaster = WsBroadcaster::default();
    let broadcaster_for_callback = ws_broadcaster.clone();

    let orchestrator = Arc::new(
        RefreshOrchestrator::new(
            config.orchestrator(),
            store,
            Arc::clone(&installer) as Arc<dyn Installer>,
            transport,
            notifier,
        )
        .with_update_callback(Arc::new(move |event: RefreshEvent| {
            broadcaster_for_callback.refresh_event(event);
        })),
    );
    orchestrator
        .start()
        .context("Failed to start refresh orchestrator")?;
    ws_broadcaster.orchestrator_status(true);
    info!("Refresh orchestrator started");

    let state = Arc::new(AppState::new(
        config.clone(),
        Arc::clone(&orchestrator),
        installer,
        ws_broadcaster,
    ));
    let app = create_router(state);

    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Stopping orchestrator...");
    orchestrator.stop();
    info!("Server shut down");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
