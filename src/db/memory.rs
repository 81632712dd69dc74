//! In-memory store for tests and dev mode

use async_trait::async_trait;
use dashmap::DashMap;

use crate::db::store::Store;
use crate::model::{Chat, ChatMessage, LedgerEntry, RequestStatus, ServiceRequest};
use crate::types::{Result, RoadcallError};

/// Simple in-memory store backed by concurrent maps
#[derive(Default)]
pub struct MemoryStore {
    requests: DashMap<String, ServiceRequest>,
    ledger: DashMap<String, LedgerEntry>,
    chats: DashMap<String, Chat>,
    messages: DashMap<String, ChatMessage>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_request(&self, request: &ServiceRequest) -> Result<()> {
        self.requests.insert(request.id.clone(), request.clone());
        Ok(())
    }

    async fn get_request(&self, id: &str) -> Result<Option<ServiceRequest>> {
        Ok(self.requests.get(id).map(|r| r.value().clone()))
    }

    async fn update_request(&self, request: &ServiceRequest) -> Result<()> {
        if !self.requests.contains_key(&request.id) {
            return Err(RoadcallError::NotFound(format!("request {}", request.id)));
        }
        self.requests.insert(request.id.clone(), request.clone());
        Ok(())
    }

    async fn update_request_if_status(
        &self,
        request: &ServiceRequest,
        expected: RequestStatus,
    ) -> Result<bool> {
        match self.requests.get_mut(&request.id) {
            Some(mut stored) => {
                if stored.status != expected {
                    return Ok(false);
                }
                *stored = request.clone();
                Ok(true)
            }
            None => Err(RoadcallError::NotFound(format!("request {}", request.id))),
        }
    }

    async fn list_requests_for_user(&self, user_id: &str) -> Result<Vec<ServiceRequest>> {
        let mut requests: Vec<ServiceRequest> = self
            .requests
            .iter()
            .filter(|r| r.trucker_id == user_id || r.provider_id.as_deref() == Some(user_id))
            .map(|r| r.value().clone())
            .collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(requests)
    }

    async fn list_open_requests(&self) -> Result<Vec<ServiceRequest>> {
        let mut requests: Vec<ServiceRequest> = self
            .requests
            .iter()
            .filter(|r| r.status == RequestStatus::Pending && r.provider_id.is_none())
            .map(|r| r.value().clone())
            .collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(requests)
    }

    async fn insert_ledger_entry(&self, entry: &LedgerEntry) -> Result<()> {
        self.ledger.insert(entry.id.clone(), entry.clone());
        Ok(())
    }

    async fn get_ledger_entry(&self, id: &str) -> Result<Option<LedgerEntry>> {
        Ok(self.ledger.get(id).map(|e| e.value().clone()))
    }

    async fn list_ledger_for_user(&self, user_id: &str) -> Result<Vec<LedgerEntry>> {
        let mut entries: Vec<LedgerEntry> = self
            .ledger
            .iter()
            .filter(|e| e.user_id == user_id)
            .map(|e| e.value().clone())
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries)
    }

    async fn list_ledger_for_request(&self, request_id: &str) -> Result<Vec<LedgerEntry>> {
        let mut entries: Vec<LedgerEntry> = self
            .ledger
            .iter()
            .filter(|e| e.request_id == request_id)
            .map(|e| e.value().clone())
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries)
    }

    async fn insert_chat(&self, chat: &Chat) -> Result<()> {
        self.chats.insert(chat.id.clone(), chat.clone());
        Ok(())
    }

    async fn get_chat(&self, id: &str) -> Result<Option<Chat>> {
        Ok(self.chats.get(id).map(|c| c.value().clone()))
    }

    async fn get_chat_for_request(&self, request_id: &str) -> Result<Option<Chat>> {
        Ok(self
            .chats
            .iter()
            .find(|c| c.request_id == request_id)
            .map(|c| c.value().clone()))
    }

    async fn update_chat(&self, chat: &Chat) -> Result<()> {
        if !self.chats.contains_key(&chat.id) {
            return Err(RoadcallError::NotFound(format!("chat {}", chat.id)));
        }
        self.chats.insert(chat.id.clone(), chat.clone());
        Ok(())
    }

    async fn list_chats_for_user(&self, user_id: &str) -> Result<Vec<Chat>> {
        let mut chats: Vec<Chat> = self
            .chats
            .iter()
            .filter(|c| c.trucker_id == user_id || c.provider_id == user_id)
            .map(|c| c.value().clone())
            .collect();
        chats.sort_by(|a, b| b.last_message_time.cmp(&a.last_message_time));
        Ok(chats)
    }

    async fn insert_message(&self, message: &ChatMessage) -> Result<()> {
        self.messages.insert(message.id.clone(), message.clone());
        Ok(())
    }

    async fn list_messages_for_request(&self, request_id: &str) -> Result<Vec<ChatMessage>> {
        let mut messages: Vec<ChatMessage> = self
            .messages
            .iter()
            .filter(|m| m.request_id == request_id)
            .map(|m| m.value().clone())
            .collect();
        messages.sort_by(|a, b| a.sent_at.cmp(&b.sent_at));
        Ok(messages)
    }

    async fn set_message_read(&self, id: &str, is_read: bool) -> Result<()> {
        match self.messages.get_mut(id) {
            Some(mut message) => {
                message.is_read = is_read;
                Ok(())
            }
            None => Err(RoadcallError::NotFound(format!("message {}", id))),
        }
    }
}
