//! Atomic hand-off of eligible users to a requesting worker.
//!
//! The claim transaction is the fleet's only coordination point. A user is
//! eligible when registered with a token on file and either unowned or
//! holding a lease whose heartbeat went stale. Longest-idle users are
//! handed out first. Any failure aborts the transaction and yields an
//! empty batch: a spurious error must never stop the next claim attempt.

use std::time::Duration;

use chrono::Utc;
use shade_core::{ClaimedSession, ExternalId, SessionToken, WorkerId};
use sqlx::SqlitePool;
use tracing::{debug, warn};

/// Lease age beyond which another worker may steal the user.
pub const STALE_LEASE: Duration = Duration::from_secs(45);

#[derive(sqlx::FromRow)]
struct EligibleRow {
    user_id: i64,
    external_id: i64,
    token: String,
}

/// Claim up to `limit` eligible users for `worker_id`.
///
/// Returns the `(external_id, token)` pairs now owned by the caller.
/// Infallible by contract: errors are logged and map to an empty batch.
pub async fn claim(
    pool: &SqlitePool,
    worker_id: &WorkerId,
    limit: usize,
    stale_lease: Duration,
) -> Vec<ClaimedSession> {
    match claim_inner(pool, worker_id, limit, stale_lease).await {
        Ok(batch) => batch,
        Err(e) => {
            warn!(worker_id = %worker_id, error = %e, "claim transaction failed");
            Vec::new()
        },
    }
}

async fn claim_inner(
    pool: &SqlitePool,
    worker_id: &WorkerId,
    limit: usize,
    stale_lease: Duration,
) -> Result<Vec<ClaimedSession>, sqlx::Error> {
    let now = Utc::now();
    let stale = chrono::Duration::from_std(stale_lease)
        .unwrap_or_else(|_| chrono::Duration::seconds(45));
    let cutoff = now.checked_sub_signed(stale).unwrap_or(now);

    let mut tx = pool.begin().await?;

    // Postgres would append FOR UPDATE SKIP LOCKED here; SQLite's single
    // writer gives the same at-most-one guarantee.
    let rows = sqlx::query_as::<_, EligibleRow>(
        "SELECT u.id AS user_id, u.external_id AS external_id, s.token AS token
         FROM users u
         JOIN sessions s ON s.user_id = u.id
         WHERE u.is_registered = 1
           AND (u.worker_id IS NULL
                OR (u.last_seen_at IS NOT NULL AND u.last_seen_at < ?1))
           AND (u.worker_active = 0 OR u.worker_id IS NULL)
         ORDER BY u.last_seen_at ASC NULLS FIRST
         LIMIT ?2",
    )
    .bind(cutoff)
    .bind(i64::try_from(limit).unwrap_or(i64::MAX))
    .fetch_all(&mut *tx)
    .await?;

    for row in &rows {
        sqlx::query("UPDATE users SET worker_id = ?1, worker_active = 1 WHERE id = ?2")
            .bind(worker_id.as_str())
            .bind(row.user_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    if !rows.is_empty() {
        debug!(worker_id = %worker_id, count = rows.len(), "leases claimed");
    }

    Ok(rows
        .into_iter()
        .map(|row| ClaimedSession {
            external_id: ExternalId(row.external_id),
            session_token: SessionToken::new(row.token),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::store::Store;

    async fn store() -> Store {
        Store::new(db::connect_memory().await.unwrap())
    }

    async fn linked_user(store: &Store, id: i64) -> ExternalId {
        let external_id = ExternalId(id);
        store.register_user(external_id, None).await.unwrap();
        store
            .link_session(external_id, &SessionToken::new(format!("tok-{id}")))
            .await
            .unwrap();
        external_id
    }

    #[tokio::test]
    async fn claims_eligible_users_up_to_limit() {
        let store = store().await;
        for id in 1..=3 {
            linked_user(&store, id).await;
        }

        let w = WorkerId::new("w-1");
        let batch = claim(store.pool(), &w, 2, STALE_LEASE).await;
        assert_eq!(batch.len(), 2);

        let batch = claim(store.pool(), &w, 10, STALE_LEASE).await;
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn claimed_users_carry_their_token() {
        let store = store().await;
        linked_user(&store, 42).await;

        let batch = claim(store.pool(), &WorkerId::new("w-1"), 10, STALE_LEASE).await;
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].external_id, ExternalId(42));
        assert_eq!(batch[0].session_token, SessionToken::new("tok-42"));
    }

    #[tokio::test]
    async fn unregistered_or_tokenless_users_are_skipped() {
        let store = store().await;
        // Identity only, never linked.
        store.register_user(ExternalId(1), None).await.unwrap();
        // Linked, then cleared (token gone, is_registered kept).
        let cleared = linked_user(&store, 2).await;
        store.clear_session(cleared).await.unwrap();

        let batch = claim(store.pool(), &WorkerId::new("w-1"), 10, STALE_LEASE).await;
        assert!(batch.is_empty());
    }

    // Round-trip law: two workers claiming over disjoint eligible sets
    // never overlap.
    #[tokio::test]
    async fn second_worker_cannot_steal_fresh_leases() {
        let store = store().await;
        for id in 1..=4 {
            linked_user(&store, id).await;
        }

        let a = claim(store.pool(), &WorkerId::new("w-a"), 2, STALE_LEASE).await;
        let b = claim(store.pool(), &WorkerId::new("w-b"), 10, STALE_LEASE).await;

        assert_eq!(a.len(), 2);
        assert_eq!(b.len(), 2);
        let ids_a: Vec<i64> = a.iter().map(|c| c.external_id.0).collect();
        for c in &b {
            assert!(!ids_a.contains(&c.external_id.0), "lease claimed twice");
        }

        // Everyone owned now; nothing left.
        let c = claim(store.pool(), &WorkerId::new("w-c"), 10, STALE_LEASE).await;
        assert!(c.is_empty());
    }

    #[tokio::test]
    async fn active_stale_lease_waits_for_the_watchdog() {
        let store = store().await;
        let id = linked_user(&store, 1).await;

        let first = claim(store.pool(), &WorkerId::new("w-a"), 1, STALE_LEASE).await;
        assert_eq!(first.len(), 1);
        store.heartbeat(id).await.unwrap();

        // Backdate the heartbeat past the stale window. The lease is old
        // but still marked active, so claim leaves it alone.
        sqlx::query("UPDATE users SET last_seen_at = ?1 WHERE external_id = 1")
            .bind(Utc::now().checked_sub_signed(chrono::Duration::seconds(120)).unwrap())
            .execute(store.pool())
            .await
            .unwrap();
        assert!(
            claim(store.pool(), &WorkerId::new("w-b"), 1, STALE_LEASE)
                .await
                .is_empty()
        );

        // Once the watchdog releases it, the next claim cycle picks it up.
        store
            .release_stale(Utc::now().checked_sub_signed(chrono::Duration::seconds(90)).unwrap())
            .await
            .unwrap();
        let stolen = claim(store.pool(), &WorkerId::new("w-b"), 1, STALE_LEASE).await;
        assert_eq!(stolen.len(), 1);

        let owner: String = sqlx::query_scalar("SELECT worker_id FROM users WHERE external_id = 1")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(owner, "w-b");
    }

    #[tokio::test]
    async fn inactive_stale_lease_is_stolen_directly() {
        let store = store().await;
        let id = linked_user(&store, 1).await;
        claim(store.pool(), &WorkerId::new("w-a"), 1, STALE_LEASE).await;
        store.heartbeat(id).await.unwrap();

        // Lease gone inactive without a clean release: worker_id still
        // recorded, heartbeat stale.
        sqlx::query(
            "UPDATE users SET worker_active = 0, last_seen_at = ?1 WHERE external_id = 1",
        )
        .bind(Utc::now().checked_sub_signed(chrono::Duration::seconds(120)).unwrap())
        .execute(store.pool())
        .await
        .unwrap();

        let stolen = claim(store.pool(), &WorkerId::new("w-b"), 1, STALE_LEASE).await;
        assert_eq!(stolen.len(), 1);
        assert_eq!(stolen[0].external_id, ExternalId(1));
    }

    #[tokio::test]
    async fn longest_idle_users_first() {
        let store = store().await;
        // User 1 was disconnected long ago, user 2 recently; user 3 never
        // seen (NULL sorts first).
        for id in 1..=3 {
            linked_user(&store, id).await;
        }
        sqlx::query("UPDATE users SET last_seen_at = ?1 WHERE external_id = 1")
            .bind(Utc::now().checked_sub_signed(chrono::Duration::seconds(600)).unwrap())
            .execute(store.pool())
            .await
            .unwrap();
        sqlx::query("UPDATE users SET last_seen_at = ?1 WHERE external_id = 2")
            .bind(Utc::now().checked_sub_signed(chrono::Duration::seconds(60)).unwrap())
            .execute(store.pool())
            .await
            .unwrap();

        let batch = claim(store.pool(), &WorkerId::new("w-1"), 3, STALE_LEASE).await;
        let order: Vec<i64> = batch.iter().map(|c| c.external_id.0).collect();
        assert_eq!(order, [3, 1, 2]);
    }

    #[tokio::test]
    async fn zero_limit_claims_nothing() {
        let store = store().await;
        linked_user(&store, 1).await;
        let batch = claim(store.pool(), &WorkerId::new("w-1"), 0, STALE_LEASE).await;
        assert!(batch.is_empty());
    }
}
