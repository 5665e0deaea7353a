//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid schedule expression '{expression}': {reason}")]
    Schedule { expression: String, reason: String },

    #[error("Escalation error: {0}")]
    Escalation(String),

    #[error("Escalation timed out after {0:?}")]
    EscalationTimedOut(std::time::Duration),

    #[error("Listener {listener} failed: {reason}")]
    Listener { listener: String, reason: String },

    #[error("Alert queue is closed")]
    QueueClosed,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn schedule(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Schedule {
            expression: expression.into(),
            reason: reason.into(),
        }
    }

    pub fn escalation(msg: impl Into<String>) -> Self {
        Self::Escalation(msg.into())
    }

    pub fn listener(listener: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Listener {
            listener: listener.into(),
            reason: reason.into(),
        }
    }

    /// Whether a listener should stop producing alerts after this error.
    pub fn is_queue_closed(&self) -> bool {
        matches!(self, Self::QueueClosed)
    }
}
