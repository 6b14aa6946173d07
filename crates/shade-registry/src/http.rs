//! Worker-facing HTTP surface.
//!
//! The only interface the worker fleet depends on. Claim authenticates the
//! caller by its `X-Worker-ID` header; a missing header is a 400. Store
//! failures surface as 500 so the worker treats them as retry-later.

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use shade_core::{ClaimedSession, ExternalId, TriggerRule, WorkerId};
use tracing::warn;

use crate::claim;
use crate::error::StoreError;
use crate::store::Store;

/// Shared state behind the router.
#[derive(Clone)]
pub struct AppState {
    store: Store,
    stale_lease: Duration,
}

/// Build the worker-facing router.
#[must_use]
pub fn router(store: Store, stale_lease: Duration) -> Router {
    let state = AppState { store, stale_lease };
    Router::new()
        .route("/health", get(health))
        .route("/users/claim", post(claim_users))
        .route("/users/heartbeat/:external_id", post(heartbeat))
        .route("/users/session-revoked/:external_id", post(session_revoked))
        .route(
            "/users/worker-disconnected/:external_id",
            post(worker_disconnected),
        )
        .route("/triggers/", get(list_triggers))
        .with_state(state)
}

/// Handler-level errors and their status mapping.
enum ApiError {
    MissingWorkerId,
    NotFound,
    Store(StoreError),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UserNotFound(_) | StoreError::TriggerNotFound(_) => Self::NotFound,
            other => Self::Store(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::MissingWorkerId => (
                StatusCode::BAD_REQUEST,
                Json(json!({"detail": "missing X-Worker-ID header"})),
            )
                .into_response(),
            Self::NotFound => (
                StatusCode::NOT_FOUND,
                Json(json!({"detail": "not found"})),
            )
                .into_response(),
            Self::Store(err) => {
                warn!(error = %err, "store operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"detail": "internal error"})),
                )
                    .into_response()
            },
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

#[derive(Deserialize)]
struct ClaimQuery {
    limit: Option<usize>,
}

async fn claim_users(
    State(state): State<AppState>,
    Query(query): Query<ClaimQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<ClaimedSession>>, ApiError> {
    let worker_id = headers
        .get("x-worker-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or(ApiError::MissingWorkerId)?;

    let limit = query.limit.unwrap_or(50);
    let batch = claim::claim(
        state.store.pool(),
        &WorkerId::new(worker_id),
        limit,
        state.stale_lease,
    )
    .await;
    Ok(Json(batch))
}

async fn heartbeat(
    State(state): State<AppState>,
    Path(external_id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.store.heartbeat(ExternalId(external_id)).await?;
    Ok(Json(json!({"status": "ok"})))
}

async fn session_revoked(
    State(state): State<AppState>,
    Path(external_id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    // Idempotent: revoking an unknown or already-cleared user is fine.
    state.store.clear_session(ExternalId(external_id)).await?;
    Ok(Json(json!({"status": "revoked"})))
}

async fn worker_disconnected(
    State(state): State<AppState>,
    Path(external_id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .store
        .mark_disconnected(ExternalId(external_id))
        .await?;
    Ok(Json(json!({"status": "disconnected"})))
}

#[derive(Deserialize)]
struct TriggersQuery {
    user_telegram_id: i64,
}

async fn list_triggers(
    State(state): State<AppState>,
    Query(query): Query<TriggersQuery>,
) -> Result<Json<Vec<TriggerRule>>, ApiError> {
    let rules = state
        .store
        .list_triggers(ExternalId(query.user_telegram_id))
        .await?;
    Ok(Json(rules))
}
