//! Error types for the listener engine and the queue client capability.

use std::time::Duration;
use thiserror::Error;

/// Failure reported by a handler for a single message.
///
/// Handler failures are a routine outcome: the message is not resolved and
/// the remote queue redelivers it once its visibility timeout expires.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Transport or remote-service failure from a queue client call
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue not found: {queue_url}")]
    QueueNotFound { queue_url: String },

    #[error("Receipt handle is invalid or expired: {receipt}")]
    ReceiptHandleInvalid { receipt: String },

    #[error("Batch size {size} exceeds maximum {max_size}")]
    BatchTooLarge { size: usize, max_size: usize },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Provider error ({provider}): {code} - {message}")]
    ProviderError {
        provider: String,
        code: String,
        message: String,
    },
}

impl QueueError {
    /// Check if error is transient and the call is worth repeating later
    pub fn is_transient(&self) -> bool {
        match self {
            Self::QueueNotFound { .. } => false,
            Self::ReceiptHandleInvalid { .. } => false,
            Self::BatchTooLarge { .. } => false,
            Self::Timeout { .. } => true,
            Self::ConnectionFailed { .. } => true,
            Self::ProviderError { .. } => true,
        }
    }
}

/// Errors surfaced by a message retriever to its caller
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("Failed to receive messages: {0}")]
    Queue(#[from] QueueError),

    #[error("Retriever is not running")]
    NotRunning,
}

/// Configuration errors, raised while a pipeline is being assembled
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },

    #[error("Configuration parsing failed: {message}")]
    Parsing { message: String },
}

/// Lifecycle errors for brokers and listener containers
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("{component} did not stop within {timeout:?}")]
    ShutdownTimedOut {
        component: &'static str,
        timeout: Duration,
    },

    #[error("Could not resolve queue '{queue}': {source}")]
    QueueResolution {
        queue: String,
        #[source]
        source: QueueError,
    },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
