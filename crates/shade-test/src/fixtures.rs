//! Small builders for common test values.

use chrono::Utc;
use shade_core::{ChatKind, ClaimedSession, ExternalId, IncomingMessage, SessionToken, TriggerRule};

/// An active trigger rule.
#[must_use]
pub fn trigger(id: i64, phrase: &str, reply_body: &str) -> TriggerRule {
    TriggerRule {
        id,
        phrase: phrase.to_owned(),
        reply_body: reply_body.to_owned(),
        active: true,
        created_at: Utc::now(),
    }
}

/// An incoming private message from a peer.
#[must_use]
pub fn direct_message(message_id: i64, text: &str) -> IncomingMessage {
    IncomingMessage {
        chat_id: 100,
        message_id,
        sender_id: Some(200),
        text: text.to_owned(),
        outgoing: false,
        chat_kind: ChatKind::Private,
    }
}

/// A claimed lease for `external_id` with the given raw token.
#[must_use]
pub fn claimed(external_id: i64, token: &str) -> ClaimedSession {
    ClaimedSession {
        external_id: ExternalId(external_id),
        session_token: SessionToken::new(token),
    }
}
