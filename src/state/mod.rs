//! Application state container
//!
//! `AppState` owns the cached view one signed-in user sees: their
//! requests, leads, chats and messages. All mutation flows through its
//! command methods; there is no ambient global store. Three producers
//! feed the cache:
//!
//! - command methods apply optimistic patches immediately,
//! - the sync dispatcher folds pushed events in via [`AppState::apply_event`],
//! - [`AppState::refresh`] re-fetches from the store and replaces the
//!   request and lead collections wholesale.
//!
//! The refresh is authoritative: optimistic entries are overwritten,
//! never merged. Pushed events deduplicate by entity id, so the same
//! logical change arriving from a direct response and a push subscription
//! lands once.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::db::Store;
use crate::ledger::Ledger;
use crate::lifecycle::{LifecycleManager, TransitionOutcome};
use crate::model::{
    Chat, ChatMessage, CreateRequestInput, LedgerEntry, LedgerSummary, MessageKind, RequestStatus,
    ServiceRequest, SYSTEM_SENDER,
};
use crate::payments::{FeeSchedule, PaymentGateway};
use crate::realtime::{ChatPatch, MessagePatch, RealtimeBus, RealtimeEvent};
use crate::types::{Result, RoadcallError};

/// How a cached request entry got there
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Provenance {
    /// Came from an authoritative store refresh
    Authoritative,
    /// Local write awaiting confirmation by the next refresh
    Optimistic,
}

#[derive(Debug, Clone)]
struct Cached<T> {
    value: T,
    provenance: Provenance,
}

impl<T> Cached<T> {
    fn authoritative(value: T) -> Self {
        Self {
            value,
            provenance: Provenance::Authoritative,
        }
    }

    fn optimistic(value: T) -> Self {
        Self {
            value,
            provenance: Provenance::Optimistic,
        }
    }
}

/// State container for one signed-in user
pub struct AppState<S: Store, G: PaymentGateway> {
    user_id: String,
    store: Arc<S>,
    bus: Arc<dyn RealtimeBus>,
    lifecycle: LifecycleManager<S, G>,
    ledger: Ledger<S>,

    requests: RwLock<Vec<Cached<ServiceRequest>>>,
    leads: RwLock<Vec<LedgerEntry>>,
    chats: RwLock<Vec<Chat>>,
    messages: RwLock<Vec<ChatMessage>>,
}

impl<S: Store + 'static, G: PaymentGateway + 'static> AppState<S, G> {
    pub fn new(
        user_id: impl Into<String>,
        store: Arc<S>,
        gateway: Arc<G>,
        bus: Arc<dyn RealtimeBus>,
        fees: FeeSchedule,
        bypass_payments: bool,
    ) -> Self {
        let lifecycle =
            LifecycleManager::new(Arc::clone(&store), gateway, fees, bypass_payments);
        let ledger = Ledger::new(Arc::clone(&store));
        Self {
            user_id: user_id.into(),
            store,
            bus,
            lifecycle,
            ledger,
            requests: RwLock::new(Vec::new()),
            leads: RwLock::new(Vec::new()),
            chats: RwLock::new(Vec::new()),
            messages: RwLock::new(Vec::new()),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn bus(&self) -> &Arc<dyn RealtimeBus> {
        &self.bus
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Create a new request (trucker persona). No charge at creation.
    pub async fn create_request(&self, input: CreateRequestInput) -> Result<ServiceRequest> {
        let request = self.lifecycle.create_request(input).await?;
        self.patch_request(request.clone()).await;
        self.refresh().await?;
        Ok(request)
    }

    /// Accept a pending request as the signed-in provider.
    pub async fn accept_request(
        &self,
        request_id: &str,
        provider_name: &str,
    ) -> Result<ServiceRequest> {
        let outcome = self
            .lifecycle
            .accept(request_id, &self.user_id, provider_name)
            .await?;

        self.patch_request(outcome.request.clone()).await;
        self.upsert_chat(outcome.chat.clone()).await;
        self.apply_event(RealtimeEvent::MessageInserted(outcome.system_message.clone()))
            .await?;

        // The trucker's client learns about the pairing via push
        if let Err(err) = self
            .bus
            .publish(
                &outcome.chat.trucker_id,
                &RealtimeEvent::ChatInserted(outcome.chat.clone()),
            )
            .await
        {
            warn!(chat_id = %outcome.chat.id, error = %err, "Chat insert publish failed");
        }

        self.refresh().await?;
        Ok(outcome.request)
    }

    /// Move an accepted request forward (provider persona). Only
    /// `in_progress` and `completed` are reachable this way.
    pub async fn update_status(
        &self,
        request_id: &str,
        status: RequestStatus,
    ) -> Result<ServiceRequest> {
        let outcome = match status {
            RequestStatus::InProgress => {
                self.lifecycle.start_work(request_id, &self.user_id).await?
            }
            RequestStatus::Completed => self.lifecycle.complete(request_id, &self.user_id).await?,
            other => {
                return Err(RoadcallError::Validation(format!(
                    "update_status cannot target {}",
                    other
                )))
            }
        };

        self.apply_transition(&outcome).await?;
        self.refresh().await?;
        Ok(outcome.request)
    }

    /// Withdraw an acceptance (provider persona): penalty plus trucker
    /// refund, request reopens as pending.
    pub async fn withdraw_acceptance(
        &self,
        request_id: &str,
        reason: &str,
    ) -> Result<ServiceRequest> {
        let outcome = self
            .lifecycle
            .withdraw_acceptance(request_id, &self.user_id, reason)
            .await?;

        if outcome.charges.refund_failed {
            warn!(
                request_id = request_id,
                "Trucker refund incomplete, flagged for manual reconciliation"
            );
        }

        self.patch_request(outcome.request.clone()).await;
        if let Some(chat) = &outcome.chat {
            self.upsert_chat(chat.clone()).await;
        }
        self.apply_event(RealtimeEvent::MessageInserted(outcome.system_message.clone()))
            .await?;

        self.refresh().await?;
        Ok(outcome.request)
    }

    /// Terminally cancel a request (either party).
    pub async fn cancel_request(&self, request_id: &str, reason: &str) -> Result<ServiceRequest> {
        let outcome = self
            .lifecycle
            .cancel(request_id, &self.user_id, reason)
            .await?;
        self.apply_transition(&outcome).await?;
        self.refresh().await?;
        Ok(outcome.request)
    }

    /// Send a chat message on a request's conversation.
    pub async fn send_message(
        &self,
        request_id: &str,
        content: &str,
        kind: MessageKind,
    ) -> Result<ChatMessage> {
        if kind == MessageKind::System {
            return Err(RoadcallError::Validation(
                "system messages are synthesized internally".into(),
            ));
        }
        if content.trim().is_empty() {
            return Err(RoadcallError::Validation("message content is required".into()));
        }

        let mut chat = self
            .store
            .get_chat_for_request(request_id)
            .await?
            .ok_or_else(|| RoadcallError::NotFound(format!("chat for request {}", request_id)))?;
        if !chat.is_active {
            return Err(RoadcallError::Validation("chat is closed".into()));
        }

        let message = ChatMessage::new(request_id, &self.user_id, content, kind);
        self.store.insert_message(&message).await?;

        chat.last_message = Some(message.content.clone());
        chat.last_message_time = Some(message.sent_at);
        if let Err(err) = self.store.update_chat(&chat).await {
            warn!(chat_id = %chat.id, error = %err, "Chat preview update failed");
        }

        // Local merge first, then push to the counterparty; our own
        // subscription deduplicates the echo by id
        self.apply_event(RealtimeEvent::MessageInserted(message.clone()))
            .await?;
        let counterparty = chat.counterparty_of(&self.user_id).to_string();
        if let Err(err) = self
            .bus
            .publish(&counterparty, &RealtimeEvent::MessageInserted(message.clone()))
            .await
        {
            warn!(message_id = %message.id, error = %err, "Message publish failed");
        }
        let chat_patch = RealtimeEvent::ChatUpdated(ChatPatch {
            id: chat.id.clone(),
            last_message_time: chat.last_message_time,
        });
        if let Err(err) = self.bus.publish(&counterparty, &chat_patch).await {
            warn!(chat_id = %chat.id, error = %err, "Chat update publish failed");
        }

        Ok(message)
    }

    /// Mark all incoming messages on a request's conversation as read.
    /// Returns the number of messages flipped.
    pub async fn mark_read(&self, request_id: &str) -> Result<usize> {
        let messages = self.store.list_messages_for_request(request_id).await?;
        let mut flipped = 0usize;

        for message in messages {
            if message.is_read
                || message.sender_id == self.user_id
                || message.sender_id == SYSTEM_SENDER
            {
                continue;
            }

            // Cache moves ahead even if the write fails; the divergence
            // is corrected by a later refresh
            if let Err(err) = self.store.set_message_read(&message.id, true).await {
                warn!(message_id = %message.id, error = %err, "Read-flag write failed");
            }
            let patch = MessagePatch {
                id: message.id.clone(),
                is_read: true,
            };
            self.apply_event(RealtimeEvent::MessageUpdated(patch.clone()))
                .await?;

            if let Err(err) = self
                .bus
                .publish(&message.sender_id, &RealtimeEvent::MessageUpdated(patch))
                .await
            {
                warn!(message_id = %message.id, error = %err, "Read-flag publish failed");
            }
            flipped += 1;
        }

        if let Some(mut chat) = self.store.get_chat_for_request(request_id).await? {
            chat.unread_count = 0;
            if let Err(err) = self.store.update_chat(&chat).await {
                warn!(chat_id = %chat.id, error = %err, "Unread reset write failed");
            }
            self.upsert_chat(chat).await;
        }

        Ok(flipped)
    }

    /// Authoritative reconciliation: re-fetch requests and leads and
    /// replace the cached collections wholesale.
    pub async fn refresh(&self) -> Result<()> {
        let requests = self.store.list_requests_for_user(&self.user_id).await?;
        let leads = self.ledger.list_for_user(&self.user_id).await?;

        let mut cached = self.requests.write().await;
        let confirmed = cached
            .iter()
            .filter(|c| c.provenance == Provenance::Optimistic)
            .count();
        *cached = requests.into_iter().map(Cached::authoritative).collect();
        drop(cached);
        *self.leads.write().await = leads;

        debug!(
            user_id = %self.user_id,
            confirmed_optimistic = confirmed,
            "Cache refreshed from store"
        );
        Ok(())
    }

    /// Initial load: chats and their messages, then a first refresh.
    pub async fn hydrate(&self) -> Result<()> {
        let chats = self.store.list_chats_for_user(&self.user_id).await?;
        let mut messages = Vec::new();
        for chat in &chats {
            messages.extend(
                self.store
                    .list_messages_for_request(&chat.request_id)
                    .await?,
            );
        }
        messages.sort_by(|a, b| a.sent_at.cmp(&b.sent_at));

        *self.chats.write().await = chats;
        *self.messages.write().await = messages;

        self.refresh().await?;
        info!(user_id = %self.user_id, "State hydrated");
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn requests(&self) -> Vec<ServiceRequest> {
        self.requests
            .read()
            .await
            .iter()
            .map(|c| c.value.clone())
            .collect()
    }

    pub async fn leads(&self) -> Vec<LedgerEntry> {
        self.leads.read().await.clone()
    }

    pub async fn chats(&self) -> Vec<Chat> {
        self.chats.read().await.clone()
    }

    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.messages.read().await.clone()
    }

    /// Pending, unassigned requests a provider can browse and accept.
    /// Read-through: open requests belong to other users and are not part
    /// of this user's cached collections.
    pub async fn open_requests(&self) -> Result<Vec<ServiceRequest>> {
        self.store.list_open_requests().await
    }

    pub async fn messages_for(&self, request_id: &str) -> Vec<ChatMessage> {
        self.messages
            .read()
            .await
            .iter()
            .filter(|m| m.request_id == request_id)
            .cloned()
            .collect()
    }

    /// Spending aggregates, reduced from the cached leads
    pub async fn ledger_summary(&self) -> LedgerSummary {
        LedgerSummary::from_entries(&self.leads.read().await)
    }

    // =========================================================================
    // Merge rules
    // =========================================================================

    /// Fold one realtime event into the cache. Safe under redelivery:
    /// inserts check id presence, updates are id-keyed patches.
    pub async fn apply_event(&self, event: RealtimeEvent) -> Result<()> {
        match event {
            RealtimeEvent::ChatInserted(chat) => {
                {
                    let mut chats = self.chats.write().await;
                    if chats.iter().any(|c| c.id == chat.id) {
                        debug!(chat_id = %chat.id, "Duplicate chat insert ignored");
                        return Ok(());
                    }
                    chats.insert(0, chat.clone());
                }
                if chat.trucker_name.is_empty() || chat.provider_name.is_empty() {
                    self.backfill_chat_names(&chat).await?;
                }
            }
            RealtimeEvent::ChatUpdated(patch) => {
                let mut chats = self.chats.write().await;
                match chats.iter_mut().find(|c| c.id == patch.id) {
                    Some(chat) => chat.last_message_time = patch.last_message_time,
                    None => debug!(chat_id = %patch.id, "Chat update for unknown chat ignored"),
                }
            }
            RealtimeEvent::MessageInserted(message) => {
                {
                    let mut messages = self.messages.write().await;
                    if messages.iter().any(|m| m.id == message.id) {
                        debug!(message_id = %message.id, "Duplicate message insert ignored");
                        return Ok(());
                    }
                    messages.push(message.clone());
                    messages.sort_by(|a, b| a.sent_at.cmp(&b.sent_at));
                }

                let mut chats = self.chats.write().await;
                if let Some(chat) = chats.iter_mut().find(|c| c.request_id == message.request_id)
                {
                    chat.last_message = Some(message.content.clone());
                    chat.last_message_time = Some(message.sent_at);
                    if message.sender_id != self.user_id && message.sender_id != SYSTEM_SENDER {
                        chat.unread_count += 1;
                    }
                }
            }
            RealtimeEvent::MessageUpdated(patch) => {
                let mut messages = self.messages.write().await;
                match messages.iter_mut().find(|m| m.id == patch.id) {
                    Some(message) => message.is_read = patch.is_read,
                    None => {
                        debug!(message_id = %patch.id, "Message update for unknown message ignored")
                    }
                }
            }
        }
        Ok(())
    }

    /// Fill placeholder party names on a freshly pushed chat from its
    /// owning request.
    async fn backfill_chat_names(&self, chat: &Chat) -> Result<()> {
        let Some(request) = self.store.get_request(&chat.request_id).await? else {
            return Ok(());
        };
        let mut chats = self.chats.write().await;
        if let Some(cached) = chats.iter_mut().find(|c| c.id == chat.id) {
            if cached.trucker_name.is_empty() {
                cached.trucker_name = request.trucker_name.clone();
            }
            if cached.provider_name.is_empty() {
                cached.provider_name = request.provider_name.clone().unwrap_or_default();
            }
        }
        Ok(())
    }

    async fn apply_transition(&self, outcome: &TransitionOutcome) -> Result<()> {
        self.patch_request(outcome.request.clone()).await;
        if let Some(chat) = &outcome.chat {
            self.upsert_chat(chat.clone()).await;
        }
        if let Some(message) = &outcome.system_message {
            self.apply_event(RealtimeEvent::MessageInserted(message.clone()))
                .await?;
        }
        Ok(())
    }

    /// Optimistic id-keyed patch of the request cache
    async fn patch_request(&self, request: ServiceRequest) {
        let mut requests = self.requests.write().await;
        match requests.iter_mut().find(|c| c.value.id == request.id) {
            Some(cached) => *cached = Cached::optimistic(request),
            None => requests.insert(0, Cached::optimistic(request)),
        }
    }

    async fn upsert_chat(&self, chat: Chat) {
        let mut chats = self.chats.write().await;
        match chats.iter_mut().find(|c| c.id == chat.id) {
            Some(cached) => *cached = chat,
            None => chats.insert(0, chat),
        }
    }
}
