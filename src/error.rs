//! Error types for the event mediation engine

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the mediator
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request error talking to the Policy API
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid or incomplete configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The hook envelope on stdin could not be interpreted
    #[error("Malformed hook envelope: {0}")]
    Envelope(String),

    /// Durable state store failure (corruption, I/O, schema)
    #[error("State store error: {0}")]
    StateStore(#[from] rusqlite::Error),

    /// Policy API returned something unexpected outside of normal rejection
    #[error("Policy API error: {0}")]
    Policy(String),

    /// Transcript file could not be read or parsed
    #[error("Transcript error: {0}")]
    Transcript(String),

    /// Request timed out
    #[error("Request timeout")]
    Timeout,

    /// Catch-all for conditions with no dedicated variant
    #[error("Error: {0}")]
    Other(String),
}

impl Error {
    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new envelope error
    pub fn envelope(msg: impl Into<String>) -> Self {
        Error::Envelope(msg.into())
    }

    /// Create a new policy error
    pub fn policy(msg: impl Into<String>) -> Self {
        Error::Policy(msg.into())
    }

    /// Create a new transcript error
    pub fn transcript(msg: impl Into<String>) -> Self {
        Error::Transcript(msg.into())
    }

    /// Create a catch-all error
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Create a timeout error
    pub fn timeout() -> Self {
        Error::Timeout
    }
}
