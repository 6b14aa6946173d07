//! Mock implementations of the platform and registry traits.
//!
//! `std::sync::Mutex` guards the captured state so builder methods work
//! without a runtime; the only await point is the mock message stream.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use shade_core::{
    ChatClient, ChatConnector, ClaimedSession, ExternalId, IncomingMessage, PlatformError,
    PlatformResult, RegistryClient, RegistryError, RegistryResult, SessionToken, TriggerRule,
    WorkerId,
};
use tokio::sync::mpsc;

/// Scripted [`ChatClient`] that records everything sent through it.
///
/// Clones share state, so a test can keep a handle while the session
/// owns another.
#[derive(Clone)]
pub struct MockChatClient {
    token: SessionToken,
    connected: Arc<AtomicBool>,
    incoming_tx: Arc<Mutex<Option<mpsc::UnboundedSender<IncomingMessage>>>>,
    incoming_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<IncomingMessage>>>,
    default_authorized: Arc<AtomicBool>,
    auth_queue: Arc<Mutex<VecDeque<PlatformResult<bool>>>>,
    read_acks: Arc<Mutex<Vec<i64>>>,
    typing: Arc<Mutex<Vec<i64>>>,
    replies: Arc<Mutex<Vec<(i64, String)>>>,
    next_reply_failure: Arc<Mutex<Option<PlatformError>>>,
    next_message_failure: Arc<Mutex<Option<PlatformError>>>,
}

impl MockChatClient {
    /// A connected, authorized client with an open message stream.
    #[must_use]
    pub fn new(token: SessionToken) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            token,
            connected: Arc::new(AtomicBool::new(true)),
            incoming_tx: Arc::new(Mutex::new(Some(tx))),
            incoming_rx: Arc::new(tokio::sync::Mutex::new(rx)),
            default_authorized: Arc::new(AtomicBool::new(true)),
            auth_queue: Arc::new(Mutex::new(VecDeque::new())),
            read_acks: Arc::new(Mutex::new(Vec::new())),
            typing: Arc::new(Mutex::new(Vec::new())),
            replies: Arc::new(Mutex::new(Vec::new())),
            next_reply_failure: Arc::new(Mutex::new(None)),
            next_message_failure: Arc::new(Mutex::new(None)),
        }
    }

    /// Deliver a message through the mock stream.
    pub fn push_message(&self, message: IncomingMessage) {
        if let Ok(guard) = self.incoming_tx.lock()
            && let Some(tx) = guard.as_ref()
        {
            let _ = tx.send(message);
        }
    }

    /// Close the stream from the far side; `next_message` drains what is
    /// queued, then reports disconnect.
    pub fn close_stream(&self) {
        if let Ok(mut guard) = self.incoming_tx.lock() {
            guard.take();
        }
    }

    /// Set the steady-state answer of `is_authorized`.
    pub fn set_authorized(&self, authorized: bool) {
        self.default_authorized.store(authorized, Ordering::SeqCst);
    }

    /// Queue a one-shot `is_authorized` result, consumed before the
    /// steady-state answer.
    pub fn queue_auth_result(&self, result: PlatformResult<bool>) {
        if let Ok(mut guard) = self.auth_queue.lock() {
            guard.push_back(result);
        }
    }

    /// Fail the next `send_reply` with `error`.
    pub fn fail_next_reply(&self, error: PlatformError) {
        if let Ok(mut guard) = self.next_reply_failure.lock() {
            *guard = Some(error);
        }
    }

    /// Fail the next `next_message` with `error`.
    pub fn fail_next_message(&self, error: PlatformError) {
        if let Ok(mut guard) = self.next_message_failure.lock() {
            *guard = Some(error);
        }
    }

    /// Message ids acknowledged as read.
    #[must_use]
    pub fn read_acks(&self) -> Vec<i64> {
        self.read_acks.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// Chat ids that received a typing indicator.
    #[must_use]
    pub fn typing(&self) -> Vec<i64> {
        self.typing.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// `(replied-to message id, body)` pairs, in send order.
    #[must_use]
    pub fn replies(&self) -> Vec<(i64, String)> {
        self.replies.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// Whether the client still considers itself connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatClient for MockChatClient {
    async fn connect(&self) -> PlatformResult<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn is_authorized(&self) -> PlatformResult<bool> {
        if let Ok(mut guard) = self.auth_queue.lock()
            && let Some(result) = guard.pop_front()
        {
            return result;
        }
        Ok(self.default_authorized.load(Ordering::SeqCst))
    }

    async fn next_message(&self) -> PlatformResult<Option<IncomingMessage>> {
        if let Ok(mut guard) = self.next_message_failure.lock()
            && let Some(error) = guard.take()
        {
            return Err(error);
        }
        if !self.is_connected() {
            return Ok(None);
        }
        let mut rx = self.incoming_rx.lock().await;
        Ok(rx.recv().await)
    }

    async fn mark_read(&self, message: &IncomingMessage) -> PlatformResult<()> {
        if let Ok(mut guard) = self.read_acks.lock() {
            guard.push(message.message_id);
        }
        Ok(())
    }

    async fn send_typing(&self, chat_id: i64) -> PlatformResult<()> {
        if let Ok(mut guard) = self.typing.lock() {
            guard.push(chat_id);
        }
        Ok(())
    }

    async fn send_reply(&self, message: &IncomingMessage, body: &str) -> PlatformResult<()> {
        if let Ok(mut guard) = self.next_reply_failure.lock()
            && let Some(error) = guard.take()
        {
            return Err(error);
        }
        if let Ok(mut guard) = self.replies.lock() {
            guard.push((message.message_id, body.to_owned()));
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.close_stream();
    }

    fn session_token(&self) -> &SessionToken {
        &self.token
    }
}

/// [`ChatConnector`] that records every build and can hand out preloaded
/// clients.
#[derive(Default)]
pub struct MockConnector {
    preloaded: Mutex<HashMap<ExternalId, MockChatClient>>,
    created: Mutex<Vec<(ExternalId, SessionToken)>>,
    next_create_failure: Mutex<Option<PlatformError>>,
}

impl MockConnector {
    /// An empty connector; unknown users get a fresh default client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `client` (a shared handle) for `external_id`.
    pub fn preload(&self, external_id: ExternalId, client: MockChatClient) {
        if let Ok(mut guard) = self.preloaded.lock() {
            guard.insert(external_id, client);
        }
    }

    /// Fail the next `create` with `error`.
    pub fn fail_next_create(&self, error: PlatformError) {
        if let Ok(mut guard) = self.next_create_failure.lock() {
            *guard = Some(error);
        }
    }

    /// `(external_id, token)` pairs of every build, in order.
    #[must_use]
    pub fn created(&self) -> Vec<(ExternalId, SessionToken)> {
        self.created.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ChatConnector for MockConnector {
    async fn create(
        &self,
        external_id: ExternalId,
        token: SessionToken,
    ) -> PlatformResult<Arc<dyn ChatClient>> {
        if let Ok(mut guard) = self.next_create_failure.lock()
            && let Some(error) = guard.take()
        {
            return Err(error);
        }
        if let Ok(mut guard) = self.created.lock() {
            guard.push((external_id, token.clone()));
        }
        let client = self
            .preloaded
            .lock()
            .ok()
            .and_then(|guard| guard.get(&external_id).cloned())
            .unwrap_or_else(|| MockChatClient::new(token));
        Ok(Arc::new(client))
    }
}

/// In-memory [`RegistryClient`] with scripted claim batches and captured
/// lifecycle calls.
#[derive(Default)]
pub struct MockRegistry {
    claim_batches: Mutex<VecDeque<Vec<ClaimedSession>>>,
    claim_calls: AtomicUsize,
    fail_claims: AtomicBool,
    heartbeats: Mutex<Vec<ExternalId>>,
    heartbeat_attempts: AtomicUsize,
    fail_heartbeats: AtomicBool,
    revoked: Mutex<Vec<ExternalId>>,
    disconnected: Mutex<Vec<ExternalId>>,
    triggers: Mutex<HashMap<ExternalId, Vec<TriggerRule>>>,
    trigger_fetches: AtomicUsize,
    fail_triggers: AtomicBool,
}

impl MockRegistry {
    /// An empty registry: claims return nothing, every call succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `rules` for `external_id`.
    #[must_use]
    pub fn with_triggers(self, external_id: ExternalId, rules: Vec<TriggerRule>) -> Self {
        if let Ok(mut guard) = self.triggers.lock() {
            guard.insert(external_id, rules);
        }
        self
    }

    /// Every claim fails with a 503.
    #[must_use]
    pub fn with_failing_claims(self) -> Self {
        self.fail_claims.store(true, Ordering::SeqCst);
        self
    }

    /// Every heartbeat fails with a transport error.
    #[must_use]
    pub fn with_failing_heartbeats(self) -> Self {
        self.fail_heartbeats.store(true, Ordering::SeqCst);
        self
    }

    /// Every trigger fetch fails with a transport error.
    #[must_use]
    pub fn with_failing_triggers(self) -> Self {
        self.fail_triggers.store(true, Ordering::SeqCst);
        self
    }

    /// Queue a batch for the next claim call.
    pub fn queue_claim_batch(&self, batch: Vec<ClaimedSession>) {
        if let Ok(mut guard) = self.claim_batches.lock() {
            guard.push_back(batch);
        }
    }

    /// Number of claim calls observed.
    #[must_use]
    pub fn claim_calls(&self) -> usize {
        self.claim_calls.load(Ordering::SeqCst)
    }

    /// Successful heartbeats, in order.
    #[must_use]
    pub fn heartbeats(&self) -> Vec<ExternalId> {
        self.heartbeats.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// Heartbeat attempts, including failed ones.
    #[must_use]
    pub fn heartbeat_attempts(&self) -> usize {
        self.heartbeat_attempts.load(Ordering::SeqCst)
    }

    /// Users reported revoked, in order.
    #[must_use]
    pub fn revoked(&self) -> Vec<ExternalId> {
        self.revoked.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// Users reported disconnected, in order.
    #[must_use]
    pub fn disconnected(&self) -> Vec<ExternalId> {
        self.disconnected.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// Number of trigger fetches observed.
    #[must_use]
    pub fn trigger_fetches(&self) -> usize {
        self.trigger_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RegistryClient for MockRegistry {
    async fn claim(
        &self,
        _worker_id: &WorkerId,
        limit: usize,
    ) -> RegistryResult<Vec<ClaimedSession>> {
        self.claim_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_claims.load(Ordering::SeqCst) {
            return Err(RegistryError::Status(503));
        }
        let mut batch = self
            .claim_batches
            .lock()
            .ok()
            .and_then(|mut guard| guard.pop_front())
            .unwrap_or_default();
        batch.truncate(limit);
        Ok(batch)
    }

    async fn heartbeat(&self, external_id: ExternalId) -> RegistryResult<()> {
        self.heartbeat_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_heartbeats.load(Ordering::SeqCst) {
            return Err(RegistryError::Transport("mock heartbeat failure".into()));
        }
        if let Ok(mut guard) = self.heartbeats.lock() {
            guard.push(external_id);
        }
        Ok(())
    }

    async fn session_revoked(&self, external_id: ExternalId) -> RegistryResult<()> {
        if let Ok(mut guard) = self.revoked.lock() {
            guard.push(external_id);
        }
        Ok(())
    }

    async fn worker_disconnected(&self, external_id: ExternalId) -> RegistryResult<()> {
        if let Ok(mut guard) = self.disconnected.lock() {
            guard.push(external_id);
        }
        Ok(())
    }

    async fn fetch_triggers(&self, external_id: ExternalId) -> RegistryResult<Vec<TriggerRule>> {
        self.trigger_fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_triggers.load(Ordering::SeqCst) {
            return Err(RegistryError::Transport("mock trigger failure".into()));
        }
        Ok(self
            .triggers
            .lock()
            .ok()
            .and_then(|guard| guard.get(&external_id).cloned())
            .unwrap_or_default())
    }
}
