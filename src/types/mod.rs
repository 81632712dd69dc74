//! Shared types for Roadcall

mod error;

pub use error::{Result, RoadcallError};
