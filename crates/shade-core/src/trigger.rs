//! Trigger rules: per-user (phrase, reply) pairs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One auto-reply rule, as served by the registry.
///
/// `phrase` is stored normalized (lowercase, trimmed). Rules are matched
/// in insertion order, so `created_at` drives iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRule {
    /// Registry id of the rule.
    pub id: i64,
    /// Normalized phrase the rule fires on.
    pub phrase: String,
    /// Reply text sent when the phrase matches.
    pub reply_body: String,
    /// Inactive rules are kept but never fire.
    pub active: bool,
    /// Insertion timestamp; also the iteration order.
    pub created_at: DateTime<Utc>,
}
