//! Error types for Roadcall

use crate::payments::PaymentError;

/// Main error type for Roadcall operations
#[derive(Debug, thiserror::Error)]
pub enum RoadcallError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Realtime bus error: {0}")]
    Bus(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RoadcallError {
    /// Whether the error was raised before any side effect ran
    /// (safe to retry the operation verbatim).
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::NotFound(_))
    }
}

// Implement From conversions for common error types

impl From<serde_json::Error> for RoadcallError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON error: {}", err))
    }
}

impl From<mongodb::error::Error> for RoadcallError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// Result type alias for Roadcall operations
pub type Result<T> = std::result::Result<T, RoadcallError>;
