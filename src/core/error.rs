//! Error types and handling for the document relay
//!
//! Validation failures are recovered per connection and surfaced to the
//! client as `error` events. Configuration and credential failures are fatal
//! at startup. Nothing here is ever retried.

use thiserror::Error;

/// Main result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the relay
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed credentials for the persistence collaborator
    #[error("Credentials error: {0}")]
    Credentials(String),

    /// Client input rejected by presence checks
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Undecodable client frame
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Underlying channel fault
    #[error("Transport error: {0}")]
    Transport(String),

    /// I/O errors from std
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Prometheus metrics errors
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Presence-check failures on client input
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Document identifier absent, not a string, or empty
    #[error("docId is required")]
    MissingDocId,

    /// Delta absent or null
    #[error("delta is required")]
    MissingDelta,
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a credentials error
    pub fn credentials(msg: impl Into<String>) -> Self {
        Self::Credentials(msg.into())
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Check if this error is recoverable on the connection that caused it
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::Validation(_) | Error::Protocol(_))
    }

    /// Check if this error must abort startup
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config(_) | Error::Credentials(_))
    }
}
