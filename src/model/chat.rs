//! Chat and chat message models
//!
//! A chat pairs a trucker with the provider who accepted their request.
//! System messages are synthesized locally for lifecycle events and are
//! exempt from persistence and read tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::request::ServiceRequest;

/// Collection name for chats
pub const CHAT_COLLECTION: &str = "chats";

/// Collection name for chat messages
pub const MESSAGE_COLLECTION: &str = "messages";

/// Synthetic sender id for lifecycle-event messages
pub const SYSTEM_SENDER: &str = "system";

/// A conversation between a trucker and their assigned provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    pub request_id: String,

    pub trucker_id: String,
    pub trucker_name: String,
    pub provider_id: String,
    pub provider_name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_time: Option<DateTime<Utc>>,

    pub unread_count: u32,
    pub is_active: bool,
}

impl Chat {
    /// Create a chat for a freshly accepted request.
    ///
    /// The request must already carry the assigned provider.
    pub fn for_accepted_request(request: &ServiceRequest) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            request_id: request.id.clone(),
            trucker_id: request.trucker_id.clone(),
            trucker_name: request.trucker_name.clone(),
            provider_id: request.provider_id.clone().unwrap_or_default(),
            provider_name: request.provider_name.clone().unwrap_or_default(),
            last_message: None,
            last_message_time: None,
            unread_count: 0,
            is_active: true,
        }
    }

    /// The other party of the chat, from `user_id`'s point of view
    pub fn counterparty_of(&self, user_id: &str) -> &str {
        if self.trucker_id == user_id {
            &self.provider_id
        } else {
            &self.trucker_id
        }
    }
}

/// Message content type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    Location,
    System,
}

/// One message inside a chat
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub request_id: String,

    /// Sender user id, or [`SYSTEM_SENDER`] for synthesized messages
    pub sender_id: String,

    pub content: String,
    pub kind: MessageKind,
    pub is_read: bool,
    pub sent_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Create a user-authored message
    pub fn new(request_id: &str, sender_id: &str, content: impl Into<String>, kind: MessageKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            request_id: request_id.to_string(),
            sender_id: sender_id.to_string(),
            content: content.into(),
            kind,
            is_read: false,
            sent_at: Utc::now(),
        }
    }

    /// Synthesize a lifecycle-event message. Marked read because system
    /// messages do not participate in read tracking.
    pub fn system(request_id: &str, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            request_id: request_id.to_string(),
            sender_id: SYSTEM_SENDER.to_string(),
            content: content.into(),
            kind: MessageKind::System,
            is_read: true,
            sent_at: Utc::now(),
        }
    }

    /// Whether this is a synthesized lifecycle message
    pub fn is_system(&self) -> bool {
        self.sender_id == SYSTEM_SENDER
    }
}
