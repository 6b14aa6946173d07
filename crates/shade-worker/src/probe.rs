//! Liveness probe: out-of-band authorization check.
//!
//! Asks the platform "who am I" every interval. Either revocation kind is
//! decisive: clear the session at the registry, disconnect the client,
//! and signal the session task to exit. Anything else is retried on the
//! next tick.

use std::sync::Arc;
use std::time::Duration;

use shade_core::{ChatClient, ExternalId, RegistryClient};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, warn};

use crate::session::report_revocation;

/// Run the liveness probe for one owned user until shutdown or
/// revocation. Fires `revoked_tx` on revocation.
pub async fn run_probe(
    client: Arc<dyn ChatClient>,
    registry: Arc<dyn RegistryClient>,
    external_id: ExternalId,
    interval: Duration,
    revoked_tx: oneshot::Sender<()>,
    mut shutdown: broadcast::Receiver<()>,
) {
    debug!(external_id = %external_id, interval_s = interval.as_secs(), "liveness probe started");
    let mut revoked_tx = Some(revoked_tx);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => {
                debug!(external_id = %external_id, "liveness probe shutting down");
                return;
            }
            () = tokio::time::sleep(interval) => {}
        }

        let revoked = match client.is_authorized().await {
            Ok(true) => false,
            Ok(false) => true,
            Err(e) if e.is_revocation() => true,
            Err(e) => {
                warn!(external_id = %external_id, error = %e, "authorization probe failed");
                false
            },
        };

        if revoked {
            warn!(external_id = %external_id, "session revoked (probe)");
            report_revocation(registry.as_ref(), external_id).await;
            client.disconnect().await;
            if let Some(tx) = revoked_tx.take() {
                let _ = tx.send(());
            }
            return;
        }
    }
}
