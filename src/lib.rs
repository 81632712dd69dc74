//! Roadcall - request lifecycle and payment reconciliation core
//!
//! Roadcall connects truckers needing roadside and repair services with
//! the providers who fulfil them, charging small flat fees at each
//! lifecycle step and reconciling penalties and refunds on cancellation.
//!
//! ## Components
//!
//! - **Lifecycle**: state machine over `ServiceRequest.status`
//! - **Payments**: gateway interface plus the compensating-transaction
//!   orchestrator for the fee sequences
//! - **Ledger**: append-only history of monetary events
//! - **Realtime**: per-user chat/message push subscriptions and the
//!   dispatcher that folds them into the cache
//! - **State**: the cached, command-driven view one signed-in user sees

pub mod config;
pub mod db;
pub mod ledger;
pub mod lifecycle;
pub mod model;
pub mod payments;
pub mod realtime;
pub mod state;
pub mod types;

pub use config::Args;
pub use state::AppState;
pub use types::{Result, RoadcallError};
