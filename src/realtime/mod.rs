//! Realtime synchronization layer
//!
//! Typed events, bus adapters (NATS in production, in-memory for tests),
//! and the dispatcher that folds pushed events into the local cache.

mod bus;
mod events;
mod sync;

pub use bus::{EventStream, MemoryBus, NatsBus, RealtimeBus};
pub use events::{
    chat_subject, message_subject, BusEnvelope, BusOp, ChatPatch, EntityKind, MessagePatch,
    RealtimeEvent, SYNC_SUBJECT_PREFIX,
};
pub use sync::SyncDispatcher;
