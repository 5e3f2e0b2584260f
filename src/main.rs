//! Mesh Hub - Main Entry Point
//!
//! Starts the listener, dials configured peers and runs until interrupted.

use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mesh_hub::config::Settings;
use mesh_hub::metrics::{init_metrics, render};
use mesh_hub::services::Hub;

/// Grace period for sessions to close after shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

fn main() -> anyhow::Result<()> {
    // Initialize logging with RUST_LOG environment variable support
    // Default: info level for mesh_hub, warn for everything else
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,mesh_hub=info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true))
        .init();

    // Load configuration
    let settings = Settings::load().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config: {}, using defaults", e);
        Settings::defaults()
    });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(settings.server.workers.max(1))
        .enable_all()
        .build()?;

    runtime.block_on(run(settings))
}

async fn run(settings: Settings) -> anyhow::Result<()> {
    info!(
        "Starting Mesh Hub v{} ({})",
        env!("CARGO_PKG_VERSION"),
        settings.node.description
    );
    info!("Client services: {:?}", settings.node.client_services);
    info!("Server services: {:?}", settings.node.server_services);

    init_metrics();

    let hub = Hub::from_settings(&settings)?;
    info!("Link id: {}", hub.link().id());

    if settings.server.listen {
        hub.listen(&settings.server.host, settings.server.port).await?;
    }

    for peer in &settings.peers {
        // Outcome is only logged; link-up follows on success
        let _ = hub.connect(peer.host.clone(), peer.port);
    }

    shutdown_signal().await;

    hub.shutdown();
    hub.wait_for_sessions(SHUTDOWN_GRACE).await;

    debug!("Final metrics:\n{}", render());
    info!("Mesh Hub stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received interrupt"),
        _ = terminate => info!("Received terminate"),
    }
}
