//! Chat-platform abstraction.
//!
//! Every platform-facing call returns [`PlatformError`], a tagged taxonomy
//! the core dispatches on — revocation is a variant, never an unwinding
//! exception. Concrete transports (Telegram, mocks) implement
//! [`ChatClient`] and are built through a [`ChatConnector`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::ids::{ExternalId, SessionToken};

/// Errors from the chat platform, grouped by handling policy.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlatformError {
    /// Network-level failure; retry on the next tick.
    #[error("transient platform I/O error: {0}")]
    TransientIo(String),

    /// The server no longer knows this auth key.
    #[error("auth key unknown to server")]
    AuthKeyUnknown,

    /// The user explicitly revoked this session.
    #[error("session revoked by user")]
    SessionRevoked,

    /// Anything else; logged, never fatal to the session.
    #[error("platform error: {0}")]
    Other(String),
}

impl PlatformError {
    /// Whether this error is one of the two decisive revocation kinds.
    #[must_use]
    pub fn is_revocation(&self) -> bool {
        matches!(self, Self::AuthKeyUnknown | Self::SessionRevoked)
    }
}

/// Convenience alias.
pub type PlatformResult<T> = Result<T, PlatformError>;

/// Kind of chat a message arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    /// One-on-one chat. The only kind the trigger engine handles.
    Private,
    /// Basic group.
    Group,
    /// Supergroup.
    Supergroup,
    /// Broadcast channel.
    Channel,
}

/// An incoming message event from the platform.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// Chat the message arrived in.
    pub chat_id: i64,
    /// Platform message id, used to reply-to.
    pub message_id: i64,
    /// Sender, when the platform reports one.
    pub sender_id: Option<i64>,
    /// Text content. Empty for non-text messages.
    pub text: String,
    /// True when the owning account itself sent the message.
    pub outgoing: bool,
    /// Kind of chat.
    pub chat_kind: ChatKind,
}

impl IncomingMessage {
    /// Whether the trigger engine should look at this message: a private
    /// chat, not originated by the session owner.
    #[must_use]
    pub fn is_direct(&self) -> bool {
        self.chat_kind == ChatKind::Private && !self.outgoing
    }
}

/// A live, long-lived connection to the chat platform for one user.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Establish the connection. Idempotent for an already-open client.
    async fn connect(&self) -> PlatformResult<()>;

    /// Out-of-band "who am I" check.
    ///
    /// Returns `Ok(false)` when the platform reports either revocation
    /// kind; transient failures surface as `Err`.
    async fn is_authorized(&self) -> PlatformResult<bool>;

    /// Next incoming message. `Ok(None)` means the connection closed.
    async fn next_message(&self) -> PlatformResult<Option<IncomingMessage>>;

    /// Acknowledge the incoming message as read.
    async fn mark_read(&self, message: &IncomingMessage) -> PlatformResult<()>;

    /// Show a typing indicator in the chat.
    async fn send_typing(&self, chat_id: i64) -> PlatformResult<()>;

    /// Send `body` as a reply to `message`.
    async fn send_reply(&self, message: &IncomingMessage, body: &str) -> PlatformResult<()>;

    /// Tear the connection down. Best-effort, never fails.
    async fn disconnect(&self);

    /// Token this client was built from; used for rotation detection.
    fn session_token(&self) -> &SessionToken;
}

/// Factory for [`ChatClient`]s.
#[async_trait]
pub trait ChatConnector: Send + Sync {
    /// Build a client for `external_id` from its session token.
    async fn create(
        &self,
        external_id: ExternalId,
        token: SessionToken,
    ) -> PlatformResult<Arc<dyn ChatClient>>;
}
