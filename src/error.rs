//! Error types for a3s-relay

use crate::types::SessionState;
use thiserror::Error;

/// Errors that can occur in the relay
#[derive(Debug, Error)]
pub enum RelayError {
    /// Remote webhook registration failed; the session stays unconfigured
    #[error("Registration failed: {0}")]
    Registration(String),

    /// Operation requires a running session
    #[error("Cannot {operation}: session is {state}")]
    NotRunning {
        operation: &'static str,
        state: SessionState,
    },

    /// Event queue consumer has gone away
    #[error("Event queue closed")]
    QueueClosed,

    /// Outbound call to the remote platform failed
    #[error("Remote error: {0}")]
    Remote(String),

    /// Outbound call exceeded its bound
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// Build a `NotRunning` error for the given operation and observed state
    pub fn not_running(operation: &'static str, state: SessionState) -> Self {
        Self::NotRunning { operation, state }
    }

    /// Whether this is a state-ordering error rather than a transport failure
    pub fn is_not_running(&self) -> bool {
        matches!(self, Self::NotRunning { .. })
    }
}

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;
