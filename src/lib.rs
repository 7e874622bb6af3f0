pub mod broadcast;
pub mod config;
pub mod context;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod registry;
pub mod routes;
pub mod security;
pub mod stats;
pub mod storage;
pub mod store;

use anyhow::Result;
use std::time::Duration;

use config::Config;
use context::AppContext;

/// In-flight requests get this long to finish after a shutdown signal.
const DRAIN_DEADLINE_SECS: u64 = 10;

pub async fn run() -> Result<()> {
    let config = Config::from_env()?;
    let bind_addr = config.bind_addr.clone();

    let ctx = AppContext::new(config).await?;
    tracing::info!(instance_id = %ctx.instance_id, "Connected to Redis, security systems initialized");

    // One subscriber per instance fans broadcasts out to local sockets
    ctx.bus.spawn_subscriber(ctx.registry.clone());

    let app = routes::create_router(ctx);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server listening on {}", bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server stopped cleanly");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM, then arms the drain deadline: connections
/// that outlive it are cut when the process exits.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!(
        drain_deadline_secs = DRAIN_DEADLINE_SECS,
        "Shutdown signal received, draining in-flight requests"
    );

    tokio::spawn(async {
        tokio::time::sleep(Duration::from_secs(DRAIN_DEADLINE_SECS)).await;
        tracing::warn!("Drain deadline exceeded, forcing exit");
        std::process::exit(0);
    });
}
