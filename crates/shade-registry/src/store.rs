//! Durable per-user state: identity, session token, lease, triggers.
//!
//! All writes commit atomically; reads run without locks. Mutations are
//! single-row last-write-wins, except the claim transaction in
//! [`crate::claim`].

use chrono::{DateTime, Utc};
use shade_core::{ExternalId, SessionToken, TriggerRule, UserView};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::model::{TriggerRow, UserRow};

const USER_COLUMNS: &str =
    "id, external_id, plan, plan_expires_at, is_registered, worker_active, trigger_count";

/// Handle on the registry database.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Wrap an open, migrated pool.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// The underlying pool, for callers that need raw queries (tests,
    /// the claim transaction).
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Effective state of a user, or `None` for an unknown id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn lookup(&self, external_id: ExternalId) -> StoreResult<Option<UserView>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE external_id = ?1"
        ))
        .bind(external_id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let has_token: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM sessions WHERE user_id = ?1)")
                .bind(row.id)
                .fetch_one(&self.pool)
                .await?;

        row.into_view(has_token).map(Some)
    }

    /// Insert a user identity if it does not exist yet. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn register_user(
        &self,
        external_id: ExternalId,
        name: Option<&str>,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO users (external_id, name, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT (external_id) DO NOTHING",
        )
        .bind(external_id.0)
        .bind(name)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Attach (or replace) the session token for a user and mark the
    /// account registered. Replacement is a rotation, not a revocation:
    /// the old token is simply overwritten.
    ///
    /// # Errors
    ///
    /// [`StoreError::UserNotFound`] if the identity was never registered.
    pub async fn link_session(
        &self,
        external_id: ExternalId,
        token: &SessionToken,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        let user_id: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE external_id = ?1")
            .bind(external_id.0)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(user_id) = user_id else {
            return Err(StoreError::UserNotFound(external_id));
        };

        sqlx::query(
            "INSERT INTO sessions (user_id, external_id, token, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT (user_id) DO UPDATE SET token = excluded.token,
                                                 updated_at = excluded.updated_at",
        )
        .bind(user_id)
        .bind(external_id.0)
        .bind(token.expose())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE users SET is_registered = 1, registered_at = ?2 WHERE id = ?1",
        )
        .bind(user_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(external_id = %external_id, "session linked");
        Ok(())
    }

    /// Delete the session token and release the lease. `is_registered`
    /// survives: the user may re-link later through the login flow.
    ///
    /// Idempotent for unknown users.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn clear_session(&self, external_id: ExternalId) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM sessions WHERE external_id = ?1")
            .bind(external_id.0)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "UPDATE users SET worker_active = 0, worker_id = NULL, last_seen_at = NULL
             WHERE external_id = ?1",
        )
        .bind(external_id.0)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(external_id = %external_id, "session cleared");
        Ok(())
    }

    /// Release the lease cleanly, preserving the session token.
    ///
    /// # Errors
    ///
    /// [`StoreError::UserNotFound`] for an unknown id.
    pub async fn mark_disconnected(&self, external_id: ExternalId) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE users SET worker_active = 0, worker_id = NULL, last_seen_at = NULL
             WHERE external_id = ?1",
        )
        .bind(external_id.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::UserNotFound(external_id));
        }
        Ok(())
    }

    /// Record a worker self-report: the lease on `external_id` is alive.
    ///
    /// # Errors
    ///
    /// [`StoreError::UserNotFound`] for an unknown id.
    pub async fn heartbeat(&self, external_id: ExternalId) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE users SET worker_active = 1, last_seen_at = ?2 WHERE external_id = ?1",
        )
        .bind(external_id.0)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::UserNotFound(external_id));
        }
        Ok(())
    }

    /// Create a trigger for a user, enforcing normalization, per-user
    /// uniqueness, and the plan-derived cap.
    ///
    /// # Errors
    ///
    /// [`StoreError::PhraseTooShort`], [`StoreError::DuplicateTrigger`],
    /// [`StoreError::TriggerLimitReached`], or [`StoreError::UserNotFound`].
    pub async fn create_trigger(
        &self,
        external_id: ExternalId,
        phrase: &str,
        reply_body: &str,
    ) -> StoreResult<TriggerRule> {
        let phrase = phrase.trim().to_lowercase();
        if phrase.chars().count() < 2 {
            return Err(StoreError::PhraseTooShort);
        }

        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        let user = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE external_id = ?1"
        ))
        .bind(external_id.0)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::UserNotFound(external_id))?;

        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM triggers WHERE user_id = ?1 AND phrase = ?2)",
        )
        .bind(user.id)
        .bind(&phrase)
        .fetch_one(&mut *tx)
        .await?;
        if exists {
            return Err(StoreError::DuplicateTrigger);
        }

        let plan = user.plan()?;
        let limit = plan.trigger_limit(user.plan_active(now));
        if user.trigger_count >= i64::from(limit) {
            return Err(StoreError::TriggerLimitReached { plan, limit });
        }

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO triggers (user_id, phrase, reply_body, active, created_at)
             VALUES (?1, ?2, ?3, 1, ?4)
             RETURNING id",
        )
        .bind(user.id)
        .bind(&phrase)
        .bind(reply_body)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE users SET trigger_count = trigger_count + 1 WHERE id = ?1")
            .bind(user.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(TriggerRule {
            id,
            phrase,
            reply_body: reply_body.to_owned(),
            active: true,
            created_at: now,
        })
    }

    /// Delete a trigger and decrement its owner's counter.
    ///
    /// # Errors
    ///
    /// [`StoreError::TriggerNotFound`] for an unknown id.
    pub async fn delete_trigger(&self, trigger_id: i64) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        let user_id: Option<i64> =
            sqlx::query_scalar("SELECT user_id FROM triggers WHERE id = ?1")
                .bind(trigger_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(user_id) = user_id else {
            return Err(StoreError::TriggerNotFound(trigger_id));
        };

        sqlx::query("DELETE FROM triggers WHERE id = ?1")
            .bind(trigger_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "UPDATE users SET trigger_count = MAX(trigger_count - 1, 0) WHERE id = ?1",
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// The user's triggers in insertion order.
    ///
    /// # Errors
    ///
    /// [`StoreError::UserNotFound`] for an unknown id.
    pub async fn list_triggers(&self, external_id: ExternalId) -> StoreResult<Vec<TriggerRule>> {
        let user_id: Option<i64> =
            sqlx::query_scalar("SELECT id FROM users WHERE external_id = ?1")
                .bind(external_id.0)
                .fetch_optional(&self.pool)
                .await?;
        let Some(user_id) = user_id else {
            return Err(StoreError::UserNotFound(external_id));
        };

        let rows = sqlx::query_as::<_, TriggerRow>(
            "SELECT id, phrase, reply_body, active, created_at
             FROM triggers WHERE user_id = ?1
             ORDER BY created_at ASC, id ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(TriggerRule::from).collect())
    }

    /// Delete a user and everything hanging off it (sessions, triggers,
    /// payments cascade).
    ///
    /// # Errors
    ///
    /// [`StoreError::UserNotFound`] for an unknown id.
    pub async fn delete_user(&self, external_id: ExternalId) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM users WHERE external_id = ?1")
            .bind(external_id.0)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::UserNotFound(external_id));
        }
        Ok(())
    }

    /// Free every lease whose heartbeat predates `cutoff`. Returns the
    /// number of users released.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn release_stale(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE users SET worker_active = 0, worker_id = NULL, last_seen_at = NULL
             WHERE worker_active = 1
               AND last_seen_at IS NOT NULL
               AND last_seen_at < ?1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Downgrade every non-free plan whose expiry has passed. Returns the
    /// number of users downgraded.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn expire_plans(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE users SET plan = 'free', plan_expires_at = NULL
             WHERE plan != 'free'
               AND plan_expires_at IS NOT NULL
               AND plan_expires_at <= ?1",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use chrono::Duration;
    use shade_core::Plan;

    async fn store() -> Store {
        Store::new(db::connect_memory().await.unwrap())
    }

    async fn linked_user(store: &Store, id: i64) -> ExternalId {
        let external_id = ExternalId(id);
        store.register_user(external_id, Some("user")).await.unwrap();
        store
            .link_session(external_id, &SessionToken::new(format!("tok-{id}")))
            .await
            .unwrap();
        external_id
    }

    #[tokio::test]
    async fn lookup_unknown_user_is_none() {
        let store = store().await;
        assert!(store.lookup(ExternalId(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn register_is_idempotent() {
        let store = store().await;
        store.register_user(ExternalId(1), Some("a")).await.unwrap();
        store.register_user(ExternalId(1), Some("b")).await.unwrap();

        let view = store.lookup(ExternalId(1)).await.unwrap().unwrap();
        assert_eq!(view.external_id, ExternalId(1));
        // No token yet, so the effective flags read false.
        assert!(!view.is_registered);
        assert!(!view.worker_active);
    }

    #[tokio::test]
    async fn link_session_marks_registered() {
        let store = store().await;
        let id = linked_user(&store, 5).await;

        let view = store.lookup(id).await.unwrap().unwrap();
        assert!(view.is_registered);
        assert!(!view.worker_active);
        assert_eq!(view.plan, Plan::Free);
    }

    #[tokio::test]
    async fn link_session_requires_identity() {
        let store = store().await;
        let err = store
            .link_session(ExternalId(404), &SessionToken::new("t"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UserNotFound(_)));
    }

    #[tokio::test]
    async fn relink_replaces_token_wholesale() {
        let store = store().await;
        let id = linked_user(&store, 5).await;
        store
            .link_session(id, &SessionToken::new("tok-rotated"))
            .await
            .unwrap();

        let token: String = sqlx::query_scalar("SELECT token FROM sessions WHERE external_id = 5")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(token, "tok-rotated");
    }

    // Round-trip law: clear_session then lookup -> registered flag kept,
    // worker inactive, no token.
    #[tokio::test]
    async fn clear_session_preserves_is_registered() {
        let store = store().await;
        let id = linked_user(&store, 7).await;
        store.heartbeat(id).await.unwrap();

        store.clear_session(id).await.unwrap();

        let view = store.lookup(id).await.unwrap().unwrap();
        assert!(!view.is_registered); // effective: no token
        assert!(!view.worker_active);

        let stored: bool = sqlx::query_scalar("SELECT is_registered FROM users WHERE external_id = 7")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert!(stored); // stored flag survives for re-linking

        let tokens: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions WHERE external_id = 7")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(tokens, 0);
    }

    // Round-trip law: mark_disconnected then heartbeat -> active again.
    #[tokio::test]
    async fn disconnect_then_heartbeat_reactivates() {
        let store = store().await;
        let id = linked_user(&store, 8).await;

        store.mark_disconnected(id).await.unwrap();
        let view = store.lookup(id).await.unwrap().unwrap();
        assert!(!view.worker_active);

        store.heartbeat(id).await.unwrap();
        let view = store.lookup(id).await.unwrap().unwrap();
        assert!(view.worker_active);
    }

    #[tokio::test]
    async fn mark_disconnected_keeps_token() {
        let store = store().await;
        let id = linked_user(&store, 9).await;

        store.mark_disconnected(id).await.unwrap();

        let tokens: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions WHERE external_id = 9")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(tokens, 1);
    }

    #[tokio::test]
    async fn heartbeat_unknown_user_is_not_found() {
        let store = store().await;
        let err = store.heartbeat(ExternalId(404)).await.unwrap_err();
        assert!(matches!(err, StoreError::UserNotFound(_)));
    }

    #[tokio::test]
    async fn trigger_cap_enforced_per_plan() {
        let store = store().await;
        let id = linked_user(&store, 10).await;

        for i in 0..3 {
            store
                .create_trigger(id, &format!("phrase {i}"), "reply")
                .await
                .unwrap();
        }
        let err = store.create_trigger(id, "one more", "reply").await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::TriggerLimitReached {
                plan: Plan::Free,
                limit: 3
            }
        ));
    }

    #[tokio::test]
    async fn expired_plan_caps_triggers_at_zero() {
        let store = store().await;
        let id = linked_user(&store, 11).await;
        sqlx::query(
            "UPDATE users SET plan = 'pro', plan_expires_at = ?1 WHERE external_id = 11",
        )
        .bind(Utc::now() - Duration::days(1))
        .execute(store.pool())
        .await
        .unwrap();

        let err = store.create_trigger(id, "hello", "hi").await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::TriggerLimitReached { limit: 0, .. }
        ));
    }

    #[tokio::test]
    async fn trigger_phrase_normalized_and_unique_case_insensitively() {
        let store = store().await;
        let id = linked_user(&store, 12).await;

        let rule = store.create_trigger(id, "  Hi Bro ", "hey").await.unwrap();
        assert_eq!(rule.phrase, "hi bro");

        let err = store.create_trigger(id, "HI BRO", "hey").await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateTrigger));
    }

    #[tokio::test]
    async fn trigger_phrase_too_short_rejected() {
        let store = store().await;
        let id = linked_user(&store, 13).await;
        let err = store.create_trigger(id, " h ", "reply").await.unwrap_err();
        assert!(matches!(err, StoreError::PhraseTooShort));
    }

    #[tokio::test]
    async fn delete_trigger_decrements_count() {
        let store = store().await;
        let id = linked_user(&store, 14).await;
        let rule = store.create_trigger(id, "hello", "hi").await.unwrap();

        let view = store.lookup(id).await.unwrap().unwrap();
        assert_eq!(view.trigger_count, 1);

        store.delete_trigger(rule.id).await.unwrap();
        let view = store.lookup(id).await.unwrap().unwrap();
        assert_eq!(view.trigger_count, 0);

        let err = store.delete_trigger(rule.id).await.unwrap_err();
        assert!(matches!(err, StoreError::TriggerNotFound(_)));
    }

    #[tokio::test]
    async fn list_triggers_in_insertion_order() {
        let store = store().await;
        let id = linked_user(&store, 15).await;
        store.create_trigger(id, "hi", "hello").await.unwrap();
        store.create_trigger(id, "hi bro", "hey bro").await.unwrap();

        let rules = store.list_triggers(id).await.unwrap();
        let phrases: Vec<&str> = rules.iter().map(|r| r.phrase.as_str()).collect();
        assert_eq!(phrases, ["hi", "hi bro"]);
    }

    #[tokio::test]
    async fn delete_user_cascades() {
        let store = store().await;
        let id = linked_user(&store, 16).await;
        store.create_trigger(id, "hello", "hi").await.unwrap();

        store.delete_user(id).await.unwrap();

        for table in ["users", "sessions", "triggers"] {
            let count: i64 =
                sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
                    .fetch_one(store.pool())
                    .await
                    .unwrap();
            assert_eq!(count, 0, "{table} not emptied");
        }
    }

    #[tokio::test]
    async fn release_stale_frees_only_old_leases() {
        let store = store().await;
        let fresh = linked_user(&store, 20).await;
        let stale = linked_user(&store, 21).await;
        store.heartbeat(fresh).await.unwrap();
        store.heartbeat(stale).await.unwrap();

        sqlx::query("UPDATE users SET last_seen_at = ?1 WHERE external_id = 21")
            .bind(Utc::now() - Duration::seconds(300))
            .execute(store.pool())
            .await
            .unwrap();

        let released = store
            .release_stale(Utc::now() - Duration::seconds(90))
            .await
            .unwrap();
        assert_eq!(released, 1);

        assert!(store.lookup(fresh).await.unwrap().unwrap().worker_active);
        assert!(!store.lookup(stale).await.unwrap().unwrap().worker_active);
    }

    #[tokio::test]
    async fn expire_plans_downgrades_to_free() {
        let store = store().await;
        linked_user(&store, 30).await;
        linked_user(&store, 31).await;
        sqlx::query("UPDATE users SET plan = 'pro', plan_expires_at = ?1 WHERE external_id = 30")
            .bind(Utc::now() - Duration::hours(1))
            .execute(store.pool())
            .await
            .unwrap();
        sqlx::query("UPDATE users SET plan = 'premium', plan_expires_at = ?1 WHERE external_id = 31")
            .bind(Utc::now() + Duration::hours(1))
            .execute(store.pool())
            .await
            .unwrap();

        let downgraded = store.expire_plans(Utc::now()).await.unwrap();
        assert_eq!(downgraded, 1);

        let plan: String = sqlx::query_scalar("SELECT plan FROM users WHERE external_id = 30")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(plan, "free");
        let plan: String = sqlx::query_scalar("SELECT plan FROM users WHERE external_id = 31")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(plan, "premium");
    }
}
