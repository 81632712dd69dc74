//! Request lifecycle management

mod manager;

pub use manager::{AcceptOutcome, LifecycleManager, TransitionOutcome, WithdrawOutcome};
