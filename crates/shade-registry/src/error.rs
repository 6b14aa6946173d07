//! Error types for the registry store.

use shade_core::{ExternalId, Plan};

/// Errors produced by registry store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failure at startup.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// No user row for the given external id.
    #[error("user {0} not found")]
    UserNotFound(ExternalId),

    /// No trigger row with the given id.
    #[error("trigger {0} not found")]
    TriggerNotFound(i64),

    /// Normalized trigger phrase shorter than two characters.
    #[error("trigger phrase must be at least 2 characters")]
    PhraseTooShort,

    /// The user already keeps a trigger with this phrase.
    #[error("trigger already exists for this user")]
    DuplicateTrigger,

    /// The user's plan cap is exhausted.
    #[error("trigger limit reached for plan {plan} (limit {limit})")]
    TriggerLimitReached {
        /// Plan the cap derives from.
        plan: Plan,
        /// Effective cap (zero for an expired plan).
        limit: u32,
    },

    /// A stored plan value outside the known set.
    #[error("stored plan value is invalid: {0}")]
    InvalidPlan(String),
}

/// Convenience alias.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = StoreError::UserNotFound(ExternalId(9));
        assert_eq!(err.to_string(), "user 9 not found");

        let err = StoreError::TriggerLimitReached {
            plan: Plan::Free,
            limit: 3,
        };
        assert!(err.to_string().contains("free"));
        assert!(err.to_string().contains('3'));

        let err = StoreError::InvalidPlan("platinum".into());
        assert!(err.to_string().contains("platinum"));
    }
}
