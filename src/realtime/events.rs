//! Realtime event types
//!
//! Events travel as `{entity, op, payload}` envelopes on per-user
//! subjects, one subject for chat records and one for messages. Every
//! event carries a stable entity id; delivery is at-least-once and
//! per-entity ordered, so consumers deduplicate by id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Chat, ChatMessage};
use crate::types::{Result, RoadcallError};

/// Subject prefix for sync events
pub const SYNC_SUBJECT_PREFIX: &str = "ROADCALL.SYNC";

/// Subject carrying chat-record events for a user
pub fn chat_subject(user_id: &str) -> String {
    format!("{SYNC_SUBJECT_PREFIX}.{user_id}.chats")
}

/// Subject carrying message events for a user
pub fn message_subject(user_id: &str) -> String {
    format!("{SYNC_SUBJECT_PREFIX}.{user_id}.messages")
}

/// Entity an event is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Chat,
    Message,
}

/// Operation the event describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusOp {
    Insert,
    Update,
}

/// Wire envelope for a realtime event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEnvelope {
    pub entity: EntityKind,
    pub op: BusOp,
    pub payload: serde_json::Value,
}

/// Patch payload for a chat update
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatPatch {
    pub id: String,
    pub last_message_time: Option<DateTime<Utc>>,
}

/// Patch payload for a message update
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePatch {
    pub id: String,
    pub is_read: bool,
}

/// Typed realtime event, decoded from an envelope
#[derive(Debug, Clone)]
pub enum RealtimeEvent {
    ChatInserted(Chat),
    ChatUpdated(ChatPatch),
    MessageInserted(ChatMessage),
    MessageUpdated(MessagePatch),
}

impl RealtimeEvent {
    /// Which entity stream this event belongs to
    pub fn entity(&self) -> EntityKind {
        match self {
            Self::ChatInserted(_) | Self::ChatUpdated(_) => EntityKind::Chat,
            Self::MessageInserted(_) | Self::MessageUpdated(_) => EntityKind::Message,
        }
    }

    /// Stable id of the entity the event is about
    pub fn entity_id(&self) -> &str {
        match self {
            Self::ChatInserted(chat) => &chat.id,
            Self::ChatUpdated(patch) => &patch.id,
            Self::MessageInserted(msg) => &msg.id,
            Self::MessageUpdated(patch) => &patch.id,
        }
    }

    pub fn to_envelope(&self) -> Result<BusEnvelope> {
        let (entity, op, payload) = match self {
            Self::ChatInserted(chat) => (EntityKind::Chat, BusOp::Insert, serde_json::to_value(chat)?),
            Self::ChatUpdated(patch) => (EntityKind::Chat, BusOp::Update, serde_json::to_value(patch)?),
            Self::MessageInserted(msg) => {
                (EntityKind::Message, BusOp::Insert, serde_json::to_value(msg)?)
            }
            Self::MessageUpdated(patch) => {
                (EntityKind::Message, BusOp::Update, serde_json::to_value(patch)?)
            }
        };
        Ok(BusEnvelope { entity, op, payload })
    }

    pub fn from_envelope(envelope: BusEnvelope) -> Result<Self> {
        let event = match (envelope.entity, envelope.op) {
            (EntityKind::Chat, BusOp::Insert) => {
                Self::ChatInserted(serde_json::from_value(envelope.payload)?)
            }
            (EntityKind::Chat, BusOp::Update) => {
                Self::ChatUpdated(serde_json::from_value(envelope.payload)?)
            }
            (EntityKind::Message, BusOp::Insert) => {
                Self::MessageInserted(serde_json::from_value(envelope.payload)?)
            }
            (EntityKind::Message, BusOp::Update) => {
                Self::MessageUpdated(serde_json::from_value(envelope.payload)?)
            }
        };
        Ok(event)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.to_envelope()?)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let envelope: BusEnvelope = serde_json::from_slice(data)
            .map_err(|e| RoadcallError::Bus(format!("Undecodable event envelope: {}", e)))?;
        Self::from_envelope(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_dispatch() {
        let patch = MessagePatch {
            id: "m1".into(),
            is_read: true,
        };
        let bytes = RealtimeEvent::MessageUpdated(patch).to_bytes().unwrap();

        match RealtimeEvent::from_bytes(&bytes).unwrap() {
            RealtimeEvent::MessageUpdated(decoded) => {
                assert_eq!(decoded.id, "m1");
                assert!(decoded.is_read);
            }
            other => panic!("wrong event decoded: {:?}", other),
        }
    }

    #[test]
    fn test_undecodable_payload_is_a_bus_error() {
        let err = RealtimeEvent::from_bytes(b"not json").unwrap_err();
        assert!(matches!(err, RoadcallError::Bus(_)));
    }
}
