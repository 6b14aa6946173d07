//! Telegram client and connector.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use shade_core::{
    ChatClient, ChatConnector, ChatKind, ExternalId, IncomingMessage, PlatformError,
    PlatformResult, SessionToken,
};
use teloxide::Bot;
use teloxide::payloads::{GetUpdatesSetters, SendMessageSetters};
use teloxide::prelude::Requester;
use teloxide::types::{
    AllowedUpdate, ChatAction, ChatId, Message, MessageId, ReplyParameters, UpdateKind,
};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::error::classify;

/// Long-poll window for `get_updates`. Kept under the HTTP client's own
/// request deadline.
const POLL_TIMEOUT_SECS: u32 = 10;

/// Builds [`TelegramChatClient`]s from session tokens.
pub struct TelegramConnector {
    /// Application id issued by the platform.
    api_id: i64,
    /// Application hash paired with `api_id`.
    api_hash: String,
}

impl TelegramConnector {
    /// A connector operating under the given application credentials.
    #[must_use]
    pub fn new(api_id: i64, api_hash: String) -> Self {
        Self { api_id, api_hash }
    }
}

impl std::fmt::Debug for TelegramConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConnector")
            .field("api_id", &self.api_id)
            .field("api_hash", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl ChatConnector for TelegramConnector {
    async fn create(
        &self,
        external_id: ExternalId,
        token: SessionToken,
    ) -> PlatformResult<Arc<dyn ChatClient>> {
        debug!(external_id = %external_id, api_id = self.api_id, "building telegram client");
        let bot = Bot::new(token.expose());
        Ok(Arc::new(TelegramChatClient::new(bot, external_id, token)))
    }
}

/// Long-poll state guarded together: the update offset and the buffer of
/// converted-but-undelivered messages.
struct PollState {
    offset: i32,
    buffer: VecDeque<IncomingMessage>,
}

/// One user's live Telegram connection.
pub struct TelegramChatClient {
    bot: Bot,
    external_id: ExternalId,
    token: SessionToken,
    connected: AtomicBool,
    /// Own account id, learned from the first `get_me`; 0 = unknown.
    self_id: AtomicI64,
    poll: Mutex<PollState>,
}

impl TelegramChatClient {
    /// Wrap a bot built from `token`.
    #[must_use]
    pub fn new(bot: Bot, external_id: ExternalId, token: SessionToken) -> Self {
        Self {
            bot,
            external_id,
            token,
            connected: AtomicBool::new(false),
            self_id: AtomicI64::new(0),
            poll: Mutex::new(PollState {
                offset: 0,
                buffer: VecDeque::new(),
            }),
        }
    }

    /// Validate the token against the platform and learn our own id.
    async fn who_am_i(&self) -> Result<i64, teloxide::RequestError> {
        let me = self.bot.get_me().await?;
        let id = i64::try_from(me.id.0).unwrap_or(0);
        self.self_id.store(id, Ordering::SeqCst);
        Ok(id)
    }

    fn convert(&self, message: &Message) -> Option<IncomingMessage> {
        let text = message.text()?.to_owned();
        let chat_kind = if message.chat.is_private() {
            ChatKind::Private
        } else if message.chat.is_group() {
            ChatKind::Group
        } else if message.chat.is_supergroup() {
            ChatKind::Supergroup
        } else {
            ChatKind::Channel
        };
        let sender_id = message
            .from
            .as_ref()
            .map(|user| i64::try_from(user.id.0).unwrap_or(0));
        let outgoing = sender_id.is_some_and(|id| id == self.self_id.load(Ordering::SeqCst));

        Some(IncomingMessage {
            chat_id: message.chat.id.0,
            message_id: i64::from(message.id.0),
            sender_id,
            text,
            outgoing,
            chat_kind,
        })
    }
}

#[async_trait]
impl ChatClient for TelegramChatClient {
    async fn connect(&self) -> PlatformResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.who_am_i().await.map_err(classify)?;
        self.connected.store(true, Ordering::SeqCst);
        debug!(external_id = %self.external_id, "telegram client connected");
        Ok(())
    }

    async fn is_authorized(&self) -> PlatformResult<bool> {
        match self.who_am_i().await {
            Ok(_) => Ok(true),
            Err(err) => {
                let mapped = classify(err);
                if mapped.is_revocation() {
                    Ok(false)
                } else {
                    Err(mapped)
                }
            },
        }
    }

    async fn next_message(&self) -> PlatformResult<Option<IncomingMessage>> {
        loop {
            if !self.connected.load(Ordering::SeqCst) {
                return Ok(None);
            }

            let offset = {
                let mut state = self.poll.lock().await;
                if let Some(message) = state.buffer.pop_front() {
                    return Ok(Some(message));
                }
                state.offset
            };

            let updates = self
                .bot
                .get_updates()
                .offset(offset)
                .timeout(POLL_TIMEOUT_SECS)
                .allowed_updates(vec![AllowedUpdate::Message])
                .await
                .map_err(classify)?;

            let mut state = self.poll.lock().await;
            for update in updates {
                let next = i32::try_from(update.id.0)
                    .map(|id| id.saturating_add(1))
                    .unwrap_or(i32::MAX);
                state.offset = state.offset.max(next);
                if let UpdateKind::Message(message) = update.kind
                    && let Some(converted) = self.convert(&message)
                {
                    trace!(external_id = %self.external_id, chat_id = converted.chat_id, "update received");
                    state.buffer.push_back(converted);
                }
            }
        }
    }

    async fn mark_read(&self, message: &IncomingMessage) -> PlatformResult<()> {
        // The HTTP bot transport has no read receipt; consuming the
        // update through get_updates is the acknowledgement.
        trace!(external_id = %self.external_id, message_id = message.message_id, "read acknowledged");
        Ok(())
    }

    async fn send_typing(&self, chat_id: i64) -> PlatformResult<()> {
        self.bot
            .send_chat_action(ChatId(chat_id), ChatAction::Typing)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn send_reply(&self, message: &IncomingMessage, body: &str) -> PlatformResult<()> {
        let reply_to = MessageId(i32::try_from(message.message_id).unwrap_or(0));
        self.bot
            .send_message(ChatId(message.chat_id), body)
            .reply_parameters(ReplyParameters::new(reply_to))
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        debug!(external_id = %self.external_id, "telegram client disconnected");
    }

    fn session_token(&self) -> &SessionToken {
        &self.token
    }
}

impl std::fmt::Debug for TelegramChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramChatClient")
            .field("external_id", &self.external_id)
            .finish_non_exhaustive()
    }
}
