//! Client session lifecycle: open, attach, run, close.
//!
//! One task per owned user. The task builds (or reuses) the chat client,
//! verifies authorization, starts the heartbeat and liveness-probe loops,
//! then blocks on the message stream until disconnect, revocation, or
//! shutdown. Message handling is strictly serialized: the next message is
//! read only after the trigger engine returns, humanization delay
//! included.

use std::sync::Arc;
use std::time::Duration;

use shade_core::{
    ChatConnector, ClaimedSession, ExternalId, RegistryClient,
};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use crate::cache::ClientCache;
use crate::heartbeat::run_heartbeat;
use crate::probe::run_probe;
use crate::trigger::{EngineOutcome, TriggerEngine};

/// Shared dependencies of every session task, owned by the supervisor.
pub struct SessionContext {
    /// Registry surface.
    pub registry: Arc<dyn RegistryClient>,
    /// Chat-client factory.
    pub connector: Arc<dyn ChatConnector>,
    /// Process-wide cache of live clients.
    pub clients: Arc<ClientCache>,
    /// Shared trigger engine.
    pub engine: Arc<TriggerEngine>,
    /// Lease self-report interval.
    pub heartbeat_interval: Duration,
    /// Authorization probe interval.
    pub probe_interval: Duration,
    /// Worker-wide shutdown broadcast.
    pub shutdown: broadcast::Sender<()>,
}

/// Why a session task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Worker-wide shutdown; the lease is left for the watchdog so a
    /// clean exit looks like a crash.
    Shutdown,
    /// The platform connection closed; the lease was released cleanly.
    Disconnected,
    /// The session token was revoked server-side; token deleted, lease
    /// released.
    Revoked,
    /// The client could not be built or connected.
    StartupFailed,
}

/// Post the revocation sequence: delete the token, release the lease.
/// Failures are logged; the registry's watchdog covers a missed release.
pub(crate) async fn report_revocation(registry: &dyn RegistryClient, external_id: ExternalId) {
    if let Err(e) = registry.session_revoked(external_id).await {
        warn!(external_id = %external_id, error = %e, "session-revoked report failed");
    }
    if let Err(e) = registry.worker_disconnected(external_id).await {
        warn!(external_id = %external_id, error = %e, "worker-disconnected report failed");
    }
}

/// Run one client session to completion.
pub async fn run_session(ctx: Arc<SessionContext>, claimed: ClaimedSession) -> ExitReason {
    let external_id = claimed.external_id;
    info!(external_id = %external_id, "starting client session");

    // Open: build (or rotate) the client and verify authorization.
    let client = match ctx
        .clients
        .get_or_create(ctx.connector.as_ref(), external_id, claimed.session_token)
        .await
    {
        Ok(client) => client,
        Err(e) if e.is_revocation() => {
            warn!(external_id = %external_id, "session invalid at startup");
            let _ = ctx.registry.session_revoked(external_id).await;
            return ExitReason::Revoked;
        },
        Err(e) => {
            warn!(external_id = %external_id, error = %e, "client construction failed");
            let _ = ctx.registry.worker_disconnected(external_id).await;
            return ExitReason::StartupFailed;
        },
    };

    if let Err(e) = client.connect().await {
        let reason = if e.is_revocation() {
            warn!(external_id = %external_id, "session invalid at startup");
            let _ = ctx.registry.session_revoked(external_id).await;
            ExitReason::Revoked
        } else {
            warn!(external_id = %external_id, error = %e, "connect failed");
            let _ = ctx.registry.worker_disconnected(external_id).await;
            ExitReason::StartupFailed
        };
        ctx.clients.remove(external_id).await;
        return reason;
    }

    match client.is_authorized().await {
        Ok(true) => {},
        Ok(false) => {
            // Revoked before we ever got going: clear the session and
            // stop here, with no heartbeat advertising this user alive.
            warn!(external_id = %external_id, "session invalid at startup");
            let _ = ctx.registry.session_revoked(external_id).await;
            client.disconnect().await;
            ctx.clients.remove(external_id).await;
            return ExitReason::Revoked;
        },
        Err(e) if e.is_revocation() => {
            warn!(external_id = %external_id, "session invalid at startup");
            let _ = ctx.registry.session_revoked(external_id).await;
            client.disconnect().await;
            ctx.clients.remove(external_id).await;
            return ExitReason::Revoked;
        },
        Err(e) => {
            warn!(external_id = %external_id, error = %e, "authorization check failed");
            let _ = ctx.registry.worker_disconnected(external_id).await;
            client.disconnect().await;
            ctx.clients.remove(external_id).await;
            return ExitReason::StartupFailed;
        },
    }
    debug!(external_id = %external_id, "chat session alive");

    // Run: heartbeat only starts after the successful authorization
    // check, so a revoked session never advertises itself as alive.
    let heartbeat_handle = tokio::spawn(run_heartbeat(
        Arc::clone(&ctx.registry),
        external_id,
        ctx.heartbeat_interval,
        ctx.shutdown.subscribe(),
    ));
    let (revoked_tx, mut revoked_rx) = oneshot::channel();
    let probe_handle = tokio::spawn(run_probe(
        Arc::clone(&client),
        Arc::clone(&ctx.registry),
        external_id,
        ctx.probe_interval,
        revoked_tx,
        ctx.shutdown.subscribe(),
    ));

    let mut shutdown_rx = ctx.shutdown.subscribe();
    let mut engine_shutdown = ctx.shutdown.subscribe();
    let mut probe_alive = true;

    let exit = loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break ExitReason::Shutdown,
            result = &mut revoked_rx, if probe_alive => {
                if result.is_ok() {
                    break ExitReason::Revoked;
                }
                // Probe ended without revoking (shutdown race); stop
                // polling the closed channel.
                probe_alive = false;
            }
            next = client.next_message() => match next {
                Ok(Some(message)) => {
                    let outcome = ctx
                        .engine
                        .handle_message(client.as_ref(), external_id, &message, &mut engine_shutdown)
                        .await;
                    match outcome {
                        EngineOutcome::Revoked => break ExitReason::Revoked,
                        EngineOutcome::Cancelled => break ExitReason::Shutdown,
                        _ => {},
                    }
                }
                Ok(None) => break ExitReason::Disconnected,
                Err(e) if e.is_revocation() => {
                    warn!(external_id = %external_id, "session revoked (message stream)");
                    report_revocation(ctx.registry.as_ref(), external_id).await;
                    break ExitReason::Revoked;
                }
                Err(e) => {
                    // One bad message must not tear the session down.
                    warn!(external_id = %external_id, error = %e, "message stream error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    };

    // Close: stop the auxiliary loops, settle the registry, drop the
    // client.
    heartbeat_handle.abort();
    probe_handle.abort();

    match exit {
        ExitReason::Revoked => {
            // Revocation sequence already posted at the detection site.
            // The token is dead, so the cached client goes with it.
            ctx.clients.remove(external_id).await;
        },
        ExitReason::Shutdown => {
            // Leave the lease untouched; the watchdog reclaims it so a
            // crash and a clean exit look identical to the registry.
        },
        ExitReason::Disconnected | ExitReason::StartupFailed => {
            if let Err(e) = ctx.registry.worker_disconnected(external_id).await {
                warn!(external_id = %external_id, error = %e, "worker-disconnected report failed");
            }
        },
    }

    // The client stays cached on a plain disconnect: a re-claim with the
    // same token reconnects it, and a re-claim with a rotated token drops
    // and rebuilds it.
    client.disconnect().await;
    info!(external_id = %external_id, reason = ?exit, "client session closed");
    exit
}

#[cfg(test)]
mod tests {
    use super::*;
    use shade_core::{PlatformError, SessionToken};
    use shade_test::fixtures::{claimed, direct_message, trigger};
    use shade_test::{MockChatClient, MockConnector, MockRegistry};
    use std::time::Instant;

    fn context(
        registry: Arc<MockRegistry>,
        connector: Arc<MockConnector>,
    ) -> (Arc<SessionContext>, broadcast::Sender<()>) {
        let (shutdown, _) = broadcast::channel(4);
        let engine = Arc::new(TriggerEngine::new(
            Arc::clone(&registry) as Arc<dyn RegistryClient>,
            Duration::from_secs(10),
            Duration::from_millis(20),
            Duration::from_millis(30),
        ));
        let ctx = Arc::new(SessionContext {
            registry,
            connector,
            clients: Arc::new(ClientCache::new()),
            engine,
            heartbeat_interval: Duration::from_millis(20),
            probe_interval: Duration::from_millis(25),
            shutdown: shutdown.clone(),
        });
        (ctx, shutdown)
    }

    #[tokio::test]
    async fn startup_revocation_clears_session_and_skips_heartbeat() {
        let registry = Arc::new(MockRegistry::new());
        let connector = Arc::new(MockConnector::new());
        let client = MockChatClient::new(SessionToken::new("t"));
        client.set_authorized(false);
        connector.preload(ExternalId(1), client);
        let (ctx, _shutdown) = context(Arc::clone(&registry), connector);

        let exit = run_session(ctx.clone(), claimed(1, "t")).await;

        assert_eq!(exit, ExitReason::Revoked);
        assert_eq!(registry.revoked(), vec![ExternalId(1)]);
        // Heartbeat never started for the dead session.
        assert!(registry.heartbeats().is_empty());
        assert!(ctx.clients.is_empty().await);
    }

    #[tokio::test]
    async fn disconnect_releases_the_lease_cleanly() {
        let registry = Arc::new(
            MockRegistry::new().with_triggers(ExternalId(1), vec![trigger(1, "hi", "hello")]),
        );
        let connector = Arc::new(MockConnector::new());
        let client = MockChatClient::new(SessionToken::new("t"));
        client.push_message(direct_message(1, "hi"));
        connector.preload(ExternalId(1), client.clone());
        let (ctx, _shutdown) = context(Arc::clone(&registry), connector);

        let task = tokio::spawn(run_session(Arc::clone(&ctx), claimed(1, "t")));

        // Wait for the reply, then close the stream from the far side.
        for _ in 0..200 {
            if !client.replies().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(client.replies().len(), 1);
        client.close_stream();

        let exit = task.await.unwrap();
        assert_eq!(exit, ExitReason::Disconnected);
        assert_eq!(registry.disconnected(), vec![ExternalId(1)]);
        assert!(registry.revoked().is_empty());
        assert!(!registry.heartbeats().is_empty());
        // The client stays cached for a future re-claim or rotation.
        assert_eq!(ctx.clients.len().await, 1);
    }

    #[tokio::test]
    async fn probe_revocation_ends_the_session() {
        let registry = Arc::new(MockRegistry::new());
        let connector = Arc::new(MockConnector::new());
        let client = MockChatClient::new(SessionToken::new("t"));
        // Startup check passes, the next probe observes the revocation.
        client.queue_auth_result(Ok(true));
        client.queue_auth_result(Ok(false));
        connector.preload(ExternalId(1), client);
        let (ctx, _shutdown) = context(Arc::clone(&registry), connector);

        let exit = tokio::time::timeout(
            Duration::from_secs(5),
            run_session(ctx, claimed(1, "t")),
        )
        .await
        .unwrap();

        assert_eq!(exit, ExitReason::Revoked);
        assert_eq!(registry.revoked(), vec![ExternalId(1)]);
        assert_eq!(registry.disconnected(), vec![ExternalId(1)]);
    }

    #[tokio::test]
    async fn shutdown_leaves_the_lease_for_the_watchdog() {
        let registry = Arc::new(MockRegistry::new());
        let connector = Arc::new(MockConnector::new());
        let client = MockChatClient::new(SessionToken::new("t"));
        connector.preload(ExternalId(1), client.clone());
        let (ctx, shutdown) = context(Arc::clone(&registry), connector);

        let task = tokio::spawn(run_session(ctx, claimed(1, "t")));
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.send(()).unwrap();

        let exit = task.await.unwrap();
        assert_eq!(exit, ExitReason::Shutdown);
        assert!(registry.disconnected().is_empty());
        assert!(registry.revoked().is_empty());
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn revocation_on_the_stream_is_reported_once() {
        let registry = Arc::new(MockRegistry::new());
        let connector = Arc::new(MockConnector::new());
        let client = MockChatClient::new(SessionToken::new("t"));
        client.fail_next_message(PlatformError::AuthKeyUnknown);
        connector.preload(ExternalId(1), client);
        let (ctx, _shutdown) = context(Arc::clone(&registry), connector);

        let exit = run_session(ctx, claimed(1, "t")).await;

        assert_eq!(exit, ExitReason::Revoked);
        assert_eq!(registry.revoked(), vec![ExternalId(1)]);
        assert_eq!(registry.disconnected(), vec![ExternalId(1)]);
    }

    // Messages for one user are handled strictly one after another; the
    // total wall time is at least the sum of the minimum delays.
    #[tokio::test]
    async fn message_burst_is_serialized() {
        let registry = Arc::new(
            MockRegistry::new().with_triggers(ExternalId(1), vec![trigger(1, "hi", "hello")]),
        );
        let connector = Arc::new(MockConnector::new());
        let client = MockChatClient::new(SessionToken::new("t"));
        for n in 0..3 {
            client.push_message(direct_message(n, "hi"));
        }
        connector.preload(ExternalId(1), client.clone());
        let (ctx, _shutdown) = context(Arc::clone(&registry), connector);

        let started = Instant::now();
        let task = tokio::spawn(run_session(ctx, claimed(1, "t")));

        for _ in 0..400 {
            if client.replies().len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let replies = client.replies();
        assert_eq!(replies.len(), 3);
        let reply_targets: Vec<i64> = replies.iter().map(|(id, _)| *id).collect();
        assert_eq!(reply_targets, [0, 1, 2]);
        assert!(started.elapsed() >= Duration::from_millis(60));

        client.close_stream();
        task.await.unwrap();
    }
}
