//! Domain model for Roadcall
//!
//! Defines the persisted and cached entity types: service requests,
//! ledger entries, chats and chat messages.

mod chat;
mod ledger;
mod request;

pub use chat::{Chat, ChatMessage, MessageKind, CHAT_COLLECTION, MESSAGE_COLLECTION, SYSTEM_SENDER};
pub use ledger::{FeeKind, LedgerEntry, LedgerStatus, LedgerSummary, PartyRole, LEDGER_COLLECTION};
pub use request::{
    CancelledBy, CreateRequestInput, Location, RequestStatus, ServiceRequest, ServiceType, Urgency,
    REQUEST_COLLECTION,
};
