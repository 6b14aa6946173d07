//! Row types decoded from the store.

use chrono::{DateTime, Utc};
use shade_core::{ExternalId, Plan, TriggerRule, UserView};

use crate::error::{StoreError, StoreResult};

/// Full user row, as persisted.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct UserRow {
    pub(crate) id: i64,
    pub(crate) external_id: i64,
    pub(crate) plan: String,
    pub(crate) plan_expires_at: Option<DateTime<Utc>>,
    pub(crate) is_registered: bool,
    pub(crate) worker_active: bool,
    pub(crate) trigger_count: i64,
}

impl UserRow {
    pub(crate) fn plan(&self) -> StoreResult<Plan> {
        self.plan
            .parse()
            .map_err(|_| StoreError::InvalidPlan(self.plan.clone()))
    }

    /// Whether the plan cap applies at full value right now.
    pub(crate) fn plan_active(&self, now: DateTime<Utc>) -> bool {
        self.plan_expires_at.is_none_or(|expires| expires > now)
    }

    /// Project onto the worker-visible view. The token's presence is
    /// authoritative: without it both flags read false.
    pub(crate) fn into_view(self, has_token: bool) -> StoreResult<UserView> {
        let plan = self.plan()?;
        Ok(UserView {
            external_id: ExternalId(self.external_id),
            is_registered: self.is_registered && has_token,
            worker_active: self.worker_active && has_token,
            plan,
            trigger_count: u32::try_from(self.trigger_count).unwrap_or(0),
        })
    }
}

/// Trigger row, as persisted.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct TriggerRow {
    pub(crate) id: i64,
    pub(crate) phrase: String,
    pub(crate) reply_body: String,
    pub(crate) active: bool,
    pub(crate) created_at: DateTime<Utc>,
}

impl From<TriggerRow> for TriggerRule {
    fn from(row: TriggerRow) -> Self {
        Self {
            id: row.id,
            phrase: row.phrase,
            reply_body: row.reply_body,
            active: row.active,
            created_at: row.created_at,
        }
    }
}
