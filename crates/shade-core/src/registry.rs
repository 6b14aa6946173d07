//! Worker-side view of the registry.
//!
//! The trait mirrors the registry's worker-facing HTTP surface. Transport
//! failures surface as [`RegistryError`] so the supervisor can back off;
//! the registry's own claim transaction never propagates an error — a
//! failed transaction is an empty batch.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ids::{ExternalId, SessionToken, WorkerId};
use crate::plan::Plan;
use crate::trigger::TriggerRule;

/// One claimed lease: a user handed to a worker together with its token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimedSession {
    /// Chat-platform id of the user.
    pub external_id: ExternalId,
    /// Session token to build the client from.
    pub session_token: SessionToken,
}

/// Effective registry state of a user.
///
/// `is_registered` and `worker_active` are effective values: both read as
/// `false` while no session token exists, whatever the stored flags say —
/// the token is authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserView {
    /// Chat-platform id.
    pub external_id: ExternalId,
    /// Whether initial auth ever succeeded AND a token is present.
    pub is_registered: bool,
    /// Whether a worker currently runs this session AND a token is present.
    pub worker_active: bool,
    /// Subscription tier.
    pub plan: Plan,
    /// Number of triggers the user keeps.
    pub trigger_count: u32,
}

/// Errors talking to the registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Could not reach the registry at all.
    #[error("registry transport error: {0}")]
    Transport(String),

    /// Registry answered with a non-success status.
    #[error("registry returned status {0}")]
    Status(u16),

    /// Body did not parse as the expected shape.
    #[error("invalid registry response: {0}")]
    InvalidResponse(String),
}

/// Convenience alias.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Client for the registry's worker-facing surface.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Atomically acquire up to `limit` eligible leases for `worker_id`.
    ///
    /// An empty batch is a normal answer (nothing eligible, or the
    /// registry's claim transaction rolled back). `Err` means the
    /// registry could not be reached; the caller backs off and retries.
    async fn claim(
        &self,
        worker_id: &WorkerId,
        limit: usize,
    ) -> RegistryResult<Vec<ClaimedSession>>;

    /// Extend the lease on `external_id` (self-report "still alive").
    async fn heartbeat(&self, external_id: ExternalId) -> RegistryResult<()>;

    /// Report a confirmed server-side revocation; deletes the token.
    async fn session_revoked(&self, external_id: ExternalId) -> RegistryResult<()>;

    /// Release the lease cleanly, preserving the token.
    async fn worker_disconnected(&self, external_id: ExternalId) -> RegistryResult<()>;

    /// Fetch the user's trigger rules in insertion order.
    async fn fetch_triggers(&self, external_id: ExternalId) -> RegistryResult<Vec<TriggerRule>>;
}
