//! Heartbeat loop: periodic lease self-report.
//!
//! Beats immediately, then every interval. A failed beat is logged and
//! swallowed — the watchdog reclaims the lease if enough beats miss, so
//! one flaky call must not kill a healthy session.

use std::sync::Arc;
use std::time::Duration;

use shade_core::{ExternalId, RegistryClient};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Run the heartbeat loop for one owned user until shutdown.
pub async fn run_heartbeat(
    registry: Arc<dyn RegistryClient>,
    external_id: ExternalId,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    debug!(external_id = %external_id, interval_s = interval.as_secs(), "heartbeat loop started");
    loop {
        if let Err(e) = registry.heartbeat(external_id).await {
            warn!(external_id = %external_id, error = %e, "heartbeat failed");
        }

        tokio::select! {
            biased;
            _ = shutdown.recv() => {
                debug!(external_id = %external_id, "heartbeat loop shutting down");
                return;
            }
            () = tokio::time::sleep(interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shade_test::MockRegistry;

    #[tokio::test]
    async fn beats_repeatedly_until_shutdown() {
        let registry = Arc::new(MockRegistry::new());
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn(run_heartbeat(
            Arc::clone(&registry) as Arc<dyn RegistryClient>,
            ExternalId(5),
            Duration::from_millis(10),
            rx,
        ));

        for _ in 0..200 {
            if registry.heartbeats().len() >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(registry.heartbeats().len() >= 3);

        tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn failed_beats_do_not_stop_the_loop() {
        let registry = Arc::new(MockRegistry::new().with_failing_heartbeats());
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn(run_heartbeat(
            Arc::clone(&registry) as Arc<dyn RegistryClient>,
            ExternalId(5),
            Duration::from_millis(10),
            rx,
        ));

        for _ in 0..200 {
            if registry.heartbeat_attempts() >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(registry.heartbeat_attempts() >= 3);

        tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
