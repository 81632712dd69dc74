//! Persistence layer for Roadcall
//!
//! The [`Store`] trait is the boundary the core talks through; MongoDB
//! backs it in production, [`MemoryStore`] in tests and dev mode.

mod memory;
mod mongo;
mod store;

pub use memory::MemoryStore;
pub use mongo::{MongoClient, MongoStore};
pub use store::Store;
