//! Background sweepers: stale-lease watchdog and plan expiry.
//!
//! Both run as independent scheduled tasks with their own tick, decoupled
//! from the HTTP surface and from any worker's lifecycle. A worker crash
//! and a clean exit look identical here: either way the heartbeat stops
//! and the lease is freed once it ages past the timeout.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::store::Store;

/// Default sweep interval for the stale-lease watchdog.
pub const CHECK_EVERY: Duration = Duration::from_secs(60);
/// Heartbeat age beyond which a lease is considered dead.
pub const TIMEOUT: Duration = Duration::from_secs(90);
/// Default sweep interval for plan expiry.
pub const PLAN_CHECK_EVERY: Duration = Duration::from_secs(300);

/// Free leases whose heartbeat is older than `timeout`, every
/// `check_every`, until shutdown.
pub async fn run_watchdog(
    store: Store,
    check_every: Duration,
    timeout: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    debug!(
        check_every_s = check_every.as_secs(),
        timeout_s = timeout.as_secs(),
        "watchdog started"
    );
    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => {
                debug!("watchdog shutting down");
                return;
            }
            () = tokio::time::sleep(check_every) => {}
        }

        let stale = chrono::Duration::from_std(timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(90));
        let now = Utc::now();
        let cutoff = now.checked_sub_signed(stale).unwrap_or(now);

        match store.release_stale(cutoff).await {
            Ok(0) => {},
            Ok(released) => info!(released, "watchdog released stale leases"),
            Err(e) => warn!(error = %e, "watchdog sweep failed"),
        }
    }
}

/// Downgrade expired paid plans to free, every `check_every`, until
/// shutdown. Functionally separate from the watchdog; co-scheduled only.
pub async fn run_plan_expiry(
    store: Store,
    check_every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => {
                debug!("plan expiry sweeper shutting down");
                return;
            }
            () = tokio::time::sleep(check_every) => {}
        }

        match store.expire_plans(Utc::now()).await {
            Ok(0) => {},
            Ok(downgraded) => info!(downgraded, "expired plans downgraded to free"),
            Err(e) => warn!(error = %e, "plan expiry sweep failed"),
        }
    }
}
