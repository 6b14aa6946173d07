//! shade-registry — registry daemon.
//!
//! Opens the database, starts the watchdog and plan-expiry sweepers, and
//! serves the worker-facing HTTP surface until SIGINT/SIGTERM/SIGQUIT.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;

use shade_registry::{RegistryConfig, Store, db, http, watchdog};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,shade_registry=info")),
        )
        .init();

    let config = RegistryConfig::from_env()?;
    let pool = db::connect(&config.database_url).await?;
    let store = Store::new(pool);

    let (shutdown_tx, _) = broadcast::channel(1);
    let watchdog_handle = tokio::spawn(watchdog::run_watchdog(
        store.clone(),
        config.watchdog_check_every,
        config.watchdog_timeout,
        shutdown_tx.subscribe(),
    ));
    let plan_handle = tokio::spawn(watchdog::run_plan_expiry(
        store.clone(),
        config.plan_check_every,
        shutdown_tx.subscribe(),
    ));

    let app = http::router(store, config.stale_lease);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!(addr = %config.bind_addr, "registry listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(());
    let _ = watchdog_handle.await;
    let _ = plan_handle.await;
    info!("registry shutdown complete");
    Ok(())
}

/// Resolves on SIGINT, SIGTERM, or SIGQUIT.
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(_) => return,
    };
    let mut sigquit = match signal(SignalKind::quit()) {
        Ok(s) => s,
        Err(_) => return,
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    info!("shutdown signal received");
}
