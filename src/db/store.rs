//! Persistent store interface
//!
//! CRUD over requests, ledger entries, chats and messages, keyed by UUID
//! string identity and queryable by owning user and by request. Backends
//! implement this trait; the core never talks to a database directly.

use async_trait::async_trait;

use crate::model::{Chat, ChatMessage, LedgerEntry, RequestStatus, ServiceRequest};
use crate::types::Result;

/// Persistent store for the Roadcall core (allows mocking in tests)
#[async_trait]
pub trait Store: Send + Sync {
    // Requests

    async fn insert_request(&self, request: &ServiceRequest) -> Result<()>;

    async fn get_request(&self, id: &str) -> Result<Option<ServiceRequest>>;

    async fn update_request(&self, request: &ServiceRequest) -> Result<()>;

    /// Replace the stored request only if its persisted status still equals
    /// `expected`. Returns false when the guard did not match. This is the
    /// compare-and-swap backstop for racing lifecycle transitions.
    async fn update_request_if_status(
        &self,
        request: &ServiceRequest,
        expected: RequestStatus,
    ) -> Result<bool>;

    /// Requests the user is a party to, as trucker or assigned provider,
    /// newest first.
    async fn list_requests_for_user(&self, user_id: &str) -> Result<Vec<ServiceRequest>>;

    /// Unassigned pending requests, newest first (provider browsing).
    async fn list_open_requests(&self) -> Result<Vec<ServiceRequest>>;

    // Ledger (append-only)

    async fn insert_ledger_entry(&self, entry: &LedgerEntry) -> Result<()>;

    async fn get_ledger_entry(&self, id: &str) -> Result<Option<LedgerEntry>>;

    async fn list_ledger_for_user(&self, user_id: &str) -> Result<Vec<LedgerEntry>>;

    async fn list_ledger_for_request(&self, request_id: &str) -> Result<Vec<LedgerEntry>>;

    // Chats

    async fn insert_chat(&self, chat: &Chat) -> Result<()>;

    async fn get_chat(&self, id: &str) -> Result<Option<Chat>>;

    async fn get_chat_for_request(&self, request_id: &str) -> Result<Option<Chat>>;

    async fn update_chat(&self, chat: &Chat) -> Result<()>;

    async fn list_chats_for_user(&self, user_id: &str) -> Result<Vec<Chat>>;

    // Messages

    async fn insert_message(&self, message: &ChatMessage) -> Result<()>;

    /// Messages for a request, oldest first.
    async fn list_messages_for_request(&self, request_id: &str) -> Result<Vec<ChatMessage>>;

    async fn set_message_read(&self, id: &str, is_read: bool) -> Result<()>;
}
