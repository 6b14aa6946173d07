//! shade-worker — one worker process of the reply-bot fleet.
//!
//! Claims user leases from the registry and runs a client session per
//! claimed user until SIGINT/SIGTERM/SIGQUIT. Exits non-zero only on a
//! configuration error, before any claim is attempted.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use shade_core::{ChatConnector, RegistryClient};
use shade_telegram::TelegramConnector;
use shade_worker::{HttpRegistry, Supervisor, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,shade_worker=info")),
        )
        .init();

    let config = WorkerConfig::from_env()?;

    let registry: Arc<dyn RegistryClient> = Arc::new(HttpRegistry::new(&config.backend_url));
    let connector: Arc<dyn ChatConnector> =
        Arc::new(TelegramConnector::new(config.api_id, config.api_hash.clone()));

    let supervisor = Supervisor::new(config, registry, connector);
    let shutdown = supervisor.shutdown_handle();

    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown.send(());
    });

    supervisor.run().await;
    info!("worker exited");
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
