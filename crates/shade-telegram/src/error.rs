//! Mapping from `teloxide` failures onto the platform error taxonomy.
//!
//! The dispatch must stay tag-based for the callers, so every transport
//! failure collapses into one of the four [`PlatformError`] variants.
//! The two revocation kinds are recognized by the server's own error
//! descriptions; Telegram does not version those strings, so the match
//! is on stable substrings.

use shade_core::PlatformError;
use teloxide::{ApiError, RequestError};

/// Classify a request failure.
pub(crate) fn classify(err: RequestError) -> PlatformError {
    match err {
        RequestError::Api(api) => classify_api(&api),
        RequestError::Network(e) => PlatformError::TransientIo(e.to_string()),
        RequestError::RetryAfter(after) => {
            PlatformError::TransientIo(format!("rate limited, retry after {after:?}"))
        },
        other => PlatformError::Other(other.to_string()),
    }
}

fn classify_api(api: &ApiError) -> PlatformError {
    let description = api.to_string();
    let lowered = description.to_lowercase();
    if lowered.contains("unauthorized") || lowered.contains("invalid token") {
        // The server no longer recognizes the token at all.
        PlatformError::AuthKeyUnknown
    } else if lowered.contains("terminated")
        || lowered.contains("deactivated")
        || lowered.contains("revoked")
    {
        // The account side explicitly ended the session.
        PlatformError::SessionRevoked
    } else {
        PlatformError::Other(description)
    }
}
