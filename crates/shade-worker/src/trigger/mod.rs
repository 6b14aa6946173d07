//! Trigger engine: per-message match and humanized reply.
//!
//! Runs inline in the session's event loop, so messages for one user are
//! strictly serialized — the next message waits for this one's reply
//! (delay included) to finish. A revocation observed while sending runs
//! the same sequence as the liveness probe and ends the session; any
//! other failure is logged and the session survives.

pub mod matcher;

use std::sync::Arc;
use std::time::Duration;

use shade_core::{ChatClient, ExternalId, IncomingMessage, RegistryClient, TriggerRule};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::cache::TtlCache;
use crate::session::report_revocation;

/// What happened to one incoming message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineOutcome {
    /// No rule fired (or the rule fetch failed transiently).
    NoMatch,
    /// The reply was delivered.
    Replied,
    /// Shutdown arrived during the humanization delay; reply abandoned.
    Cancelled,
    /// A revocation was observed; the session must exit.
    Revoked,
    /// The reply send failed non-decisively.
    Failed,
}

/// Per-worker trigger engine, shared by all sessions.
pub struct TriggerEngine {
    registry: Arc<dyn RegistryClient>,
    triggers: TtlCache<ExternalId, Vec<TriggerRule>>,
    delay_min: Duration,
    delay_max: Duration,
}

impl TriggerEngine {
    /// Build an engine fetching rules through `registry`, caching them
    /// for `cache_ttl`, and pacing replies inside `[delay_min, delay_max]`.
    #[must_use]
    pub fn new(
        registry: Arc<dyn RegistryClient>,
        cache_ttl: Duration,
        delay_min: Duration,
        delay_max: Duration,
    ) -> Self {
        Self {
            registry,
            triggers: TtlCache::new(cache_ttl),
            delay_min,
            delay_max,
        }
    }

    /// Handle one incoming message for `external_id`.
    ///
    /// `shutdown` aborts the humanization delay; an abandoned reply is
    /// never sent.
    pub async fn handle_message(
        &self,
        client: &dyn ChatClient,
        external_id: ExternalId,
        message: &IncomingMessage,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> EngineOutcome {
        if !message.is_direct() || message.text.trim().is_empty() {
            return EngineOutcome::NoMatch;
        }

        let Some(rules) = self.load_triggers(external_id).await else {
            return EngineOutcome::NoMatch;
        };
        let Some(rule) = matcher::first_match(&rules, &message.text) else {
            return EngineOutcome::NoMatch;
        };
        if rule.reply_body.trim().is_empty() {
            debug!(external_id = %external_id, rule = rule.id, "matched rule has no reply body");
            return EngineOutcome::NoMatch;
        }
        info!(external_id = %external_id, phrase = %rule.phrase, "trigger matched");

        // Read acknowledgement and typing indicator, then the paced reply.
        if let Err(e) = client.mark_read(message).await {
            if e.is_revocation() {
                return self.revoke(client, external_id).await;
            }
            warn!(external_id = %external_id, error = %e, "read acknowledgement failed");
        }
        if let Err(e) = client.send_typing(message.chat_id).await {
            if e.is_revocation() {
                return self.revoke(client, external_id).await;
            }
            warn!(external_id = %external_id, error = %e, "typing indicator failed");
        }

        let delay = humanized_delay(self.delay_min, self.delay_max);
        tokio::select! {
            biased;
            _ = shutdown.recv() => {
                debug!(external_id = %external_id, "reply abandoned during humanization delay");
                return EngineOutcome::Cancelled;
            }
            () = tokio::time::sleep(delay) => {}
        }

        match client.send_reply(message, &rule.reply_body).await {
            Ok(()) => {
                info!(external_id = %external_id, rule = rule.id, "reply sent");
                EngineOutcome::Replied
            },
            Err(e) if e.is_revocation() => {
                warn!(external_id = %external_id, "session revoked while replying");
                self.revoke(client, external_id).await
            },
            Err(e) => {
                warn!(external_id = %external_id, error = %e, "reply send failed");
                EngineOutcome::Failed
            },
        }
    }

    /// Rules for `external_id`, through the bounded TTL cache. A fetch
    /// failure is transient: log, skip this message.
    async fn load_triggers(&self, external_id: ExternalId) -> Option<Vec<TriggerRule>> {
        if let Some(rules) = self.triggers.get(&external_id) {
            return Some(rules);
        }
        match self.registry.fetch_triggers(external_id).await {
            Ok(rules) => {
                self.triggers.insert(external_id, rules.clone());
                Some(rules)
            },
            Err(e) => {
                warn!(external_id = %external_id, error = %e, "trigger fetch failed");
                None
            },
        }
    }

    async fn revoke(&self, client: &dyn ChatClient, external_id: ExternalId) -> EngineOutcome {
        report_revocation(self.registry.as_ref(), external_id).await;
        client.disconnect().await;
        EngineOutcome::Revoked
    }
}

/// A uniform delay in `[min, max]`.
pub(crate) fn humanized_delay(min: Duration, max: Duration) -> Duration {
    let span = max.saturating_sub(min);
    let span_ms = u64::try_from(span.as_millis()).unwrap_or(u64::MAX);
    min.saturating_add(Duration::from_millis(fastrand::u64(0..=span_ms)))
}
