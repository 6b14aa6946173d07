//! HTTP client for the registry's worker-facing surface.
//!
//! Every call carries an explicit deadline. Any non-success status maps
//! to [`RegistryError::Status`]; the callers decide what survives — the
//! supervisor backs off, the heartbeat shrugs, the probe retries.

use std::time::Duration;

use async_trait::async_trait;
use shade_core::{
    ClaimedSession, ExternalId, RegistryClient, RegistryError, RegistryResult, TriggerRule,
    WorkerId,
};
use tracing::debug;

/// Deadline for claim calls.
const CLAIM_TIMEOUT: Duration = Duration::from_secs(10);
/// Deadline for every other call.
const CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Reqwest-backed [`RegistryClient`].
pub struct HttpRegistry {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRegistry {
    /// Build a client for the registry at `base_url`.
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn post_status(&self, path: &str) -> RegistryResult<()> {
        let response = self
            .client
            .post(self.url(path))
            .timeout(CALL_TIMEOUT)
            .send()
            .await
            .map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(RegistryError::Status(status.as_u16()));
        }
        Ok(())
    }
}

fn transport(err: reqwest::Error) -> RegistryError {
    RegistryError::Transport(err.to_string())
}

#[async_trait]
impl RegistryClient for HttpRegistry {
    async fn claim(
        &self,
        worker_id: &WorkerId,
        limit: usize,
    ) -> RegistryResult<Vec<ClaimedSession>> {
        let response = self
            .client
            .post(self.url("/users/claim"))
            .query(&[("limit", limit)])
            .header("X-Worker-ID", worker_id.as_str())
            .timeout(CLAIM_TIMEOUT)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(RegistryError::Status(status.as_u16()));
        }

        let batch: Vec<ClaimedSession> = response
            .json()
            .await
            .map_err(|e| RegistryError::InvalidResponse(e.to_string()))?;
        if !batch.is_empty() {
            debug!(count = batch.len(), "claimed leases from registry");
        }
        Ok(batch)
    }

    async fn heartbeat(&self, external_id: ExternalId) -> RegistryResult<()> {
        self.post_status(&format!("/users/heartbeat/{external_id}"))
            .await
    }

    async fn session_revoked(&self, external_id: ExternalId) -> RegistryResult<()> {
        self.post_status(&format!("/users/session-revoked/{external_id}"))
            .await
    }

    async fn worker_disconnected(&self, external_id: ExternalId) -> RegistryResult<()> {
        self.post_status(&format!("/users/worker-disconnected/{external_id}"))
            .await
    }

    async fn fetch_triggers(&self, external_id: ExternalId) -> RegistryResult<Vec<TriggerRule>> {
        let response = self
            .client
            .get(self.url("/triggers/"))
            .query(&[("user_telegram_id", external_id.0)])
            .timeout(CALL_TIMEOUT)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(RegistryError::Status(status.as_u16()));
        }

        response
            .json()
            .await
            .map_err(|e| RegistryError::InvalidResponse(e.to_string()))
    }
}

impl std::fmt::Debug for HttpRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRegistry")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
