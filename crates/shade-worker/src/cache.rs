//! Process-wide caches: live chat clients and trigger lists.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use shade_core::{ChatClient, ChatConnector, ExternalId, PlatformResult, SessionToken};
use tokio::sync::Mutex;
use tracing::info;

/// Cache of live clients keyed by user.
///
/// Owned by the supervisor, shared read-mostly with the session tasks.
/// A cached client is reused as long as its token matches; a differing
/// token means the user re-linked, so the old client is dropped and a
/// fresh one is built. Rotation is silent — no revocation signal.
#[derive(Default)]
pub struct ClientCache {
    inner: Mutex<HashMap<ExternalId, Arc<dyn ChatClient>>>,
}

impl ClientCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the cached client for `external_id`, rebuilding it when the
    /// token rotated.
    ///
    /// # Errors
    ///
    /// Propagates the connector's [`shade_core::PlatformError`] when a
    /// fresh client cannot be built.
    pub async fn get_or_create(
        &self,
        connector: &dyn ChatConnector,
        external_id: ExternalId,
        token: SessionToken,
    ) -> PlatformResult<Arc<dyn ChatClient>> {
        let mut guard = self.inner.lock().await;

        if let Some(existing) = guard.get(&external_id) {
            if existing.session_token() == &token {
                return Ok(Arc::clone(existing));
            }
            // Token rotated: tear down the stale client before rebuilding.
            info!(external_id = %external_id, "session token rotated, rebuilding client");
            existing.disconnect().await;
            guard.remove(&external_id);
        }

        let client = connector.create(external_id, token).await?;
        guard.insert(external_id, Arc::clone(&client));
        Ok(client)
    }

    /// Drop the cached client for `external_id`, returning it if present.
    pub async fn remove(&self, external_id: ExternalId) -> Option<Arc<dyn ChatClient>> {
        self.inner.lock().await.remove(&external_id)
    }

    /// Number of cached clients.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Whether the cache is empty.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

/// Bounded-lifetime cache for values fetched from the registry.
///
/// Entries older than the TTL read as absent and are dropped on access.
pub struct TtlCache<K, V> {
    ttl: Duration,
    inner: std::sync::Mutex<HashMap<K, (V, Instant)>>,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    /// Create a cache whose entries live for `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// The value for `key`, unless absent or expired.
    pub fn get(&self, key: &K) -> Option<V> {
        let Ok(mut guard) = self.inner.lock() else {
            return None;
        };
        match guard.get(key) {
            Some((value, stored)) if stored.elapsed() <= self.ttl => Some(value.clone()),
            Some(_) => {
                guard.remove(key);
                None
            },
            None => None,
        }
    }

    /// Store a value for `key`, resetting its lifetime.
    pub fn insert(&self, key: K, value: V) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.insert(key, (value, Instant::now()));
        }
    }

    /// Forget `key` immediately.
    pub fn invalidate(&self, key: &K) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.remove(key);
        }
    }
}
