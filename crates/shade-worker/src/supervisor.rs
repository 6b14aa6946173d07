//! Worker supervisor: claim, spawn, respect capacity, shut down.
//!
//! Sole owner of the `active` map — no other task mutates it. The loop
//! claims leases while below capacity, spawns a session task per claimed
//! user, and backs off on idle or error. On shutdown it cancels every
//! session and waits a bounded grace period; it deliberately does NOT
//! release its leases — the watchdog reclaims them, so a crash and a
//! clean exit look identical to the registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use shade_core::{ChatConnector, ExternalId, RegistryClient};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::ClientCache;
use crate::config::WorkerConfig;
use crate::session::{self, ExitReason, SessionContext};
use crate::trigger::TriggerEngine;

/// How long shutdown waits for sessions before aborting them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// One worker process's supervisor.
pub struct Supervisor {
    config: WorkerConfig,
    ctx: Arc<SessionContext>,
    active: HashMap<ExternalId, JoinHandle<ExitReason>>,
    shutdown: broadcast::Sender<()>,
}

impl Supervisor {
    /// Assemble a supervisor from its collaborators.
    #[must_use]
    pub fn new(
        config: WorkerConfig,
        registry: Arc<dyn RegistryClient>,
        connector: Arc<dyn ChatConnector>,
    ) -> Self {
        let (shutdown, _) = broadcast::channel(4);
        let engine = Arc::new(TriggerEngine::new(
            Arc::clone(&registry),
            config.trigger_cache_ttl,
            config.reply_delay_min,
            config.reply_delay_max,
        ));
        let ctx = Arc::new(SessionContext {
            registry,
            connector,
            clients: Arc::new(ClientCache::new()),
            engine,
            heartbeat_interval: config.heartbeat_interval,
            probe_interval: config.probe_interval,
            shutdown: shutdown.clone(),
        });
        Self {
            config,
            ctx,
            active: HashMap::new(),
            shutdown,
        }
    }

    /// Sender that triggers a graceful shutdown when fired.
    #[must_use]
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown.clone()
    }

    /// Run the claim loop until shutdown, then drain the sessions.
    pub async fn run(mut self) {
        info!(worker_id = %self.config.worker_id, max_active = self.config.max_active, "worker started");
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            self.active.retain(|_, handle| !handle.is_finished());

            if self.active.len() >= self.config.max_active {
                if wait_or_shutdown(&mut shutdown_rx, self.config.idle_sleep).await {
                    break;
                }
                continue;
            }

            let limit = self.config.max_active.saturating_sub(self.active.len());
            let batch = match self.ctx.registry.claim(&self.config.worker_id, limit).await {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(error = %e, "claim cycle failed");
                    if wait_or_shutdown(&mut shutdown_rx, self.config.error_sleep).await {
                        break;
                    }
                    continue;
                },
            };

            if batch.is_empty() {
                if wait_or_shutdown(&mut shutdown_rx, self.config.idle_sleep).await {
                    break;
                }
                continue;
            }

            for claimed in batch {
                if self.active.len() >= self.config.max_active {
                    break;
                }
                let external_id = claimed.external_id;
                if self.active.contains_key(&external_id) {
                    debug!(external_id = %external_id, "already running, skipping claim");
                    continue;
                }
                info!(external_id = %external_id, "user claimed");
                let handle = tokio::spawn(session::run_session(Arc::clone(&self.ctx), claimed));
                self.active.insert(external_id, handle);
            }

            if wait_or_shutdown(&mut shutdown_rx, self.config.poll_interval).await {
                break;
            }
        }

        self.drain().await;
    }

    /// Cancel every session and wait out the grace period.
    async fn drain(mut self) {
        info!(active = self.active.len(), "shutting down worker");
        let _ = self.shutdown.send(());

        let handles: Vec<JoinHandle<ExitReason>> =
            self.active.drain().map(|(_, handle)| handle).collect();
        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();

        if tokio::time::timeout(SHUTDOWN_GRACE, futures::future::join_all(handles))
            .await
            .is_err()
        {
            warn!("grace period elapsed, aborting remaining sessions");
            for abort in aborts {
                abort.abort();
            }
        }
        info!("worker shutdown complete");
    }
}

/// Sleep for `duration`, returning `true` if shutdown fired first.
async fn wait_or_shutdown(shutdown: &mut broadcast::Receiver<()>, duration: Duration) -> bool {
    tokio::select! {
        biased;
        _ = shutdown.recv() => true,
        () = tokio::time::sleep(duration) => false,
    }
}
