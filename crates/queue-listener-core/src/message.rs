//! Message types and queue identifiers.

use crate::error::ConfigurationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Identifies the remote queue every retriever and resolver call targets.
///
/// Created once when a pipeline is assembled and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueProperties {
    queue_url: String,
}

impl QueueProperties {
    /// Create queue properties, rejecting an empty queue URL
    pub fn new(queue_url: impl Into<String>) -> Result<Self, ConfigurationError> {
        let queue_url = queue_url.into();
        if queue_url.trim().is_empty() {
            return Err(ConfigurationError::Missing {
                key: "queue_url".to_string(),
            });
        }

        Ok(Self { queue_url })
    }

    /// Get the queue URL
    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }
}

impl std::fmt::Display for QueueProperties {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.queue_url)
    }
}

/// Identifier assigned to a message by the queue service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Wrap an identifier handed back by the queue service
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate new random message ID
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque per-delivery token used to delete a received message.
///
/// Every delivery of the same message carries a different handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(String);

impl ReceiptHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    /// Get handle string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create timestamp from DateTime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

// ============================================================================
// Message
// ============================================================================

/// A message received from the queue service.
///
/// `Message` is intentionally not `Clone`. Handing it to a resolver consumes
/// it, so a single received instance can be acknowledged at most once.
#[derive(Debug)]
pub struct Message {
    pub message_id: MessageId,
    pub body: String,
    pub receipt_handle: ReceiptHandle,
    pub attributes: HashMap<String, String>,
    /// Number of times the queue has delivered this message, including this one
    pub receive_count: u32,
    pub received_at: Timestamp,
}

impl Message {
    /// Create a received message with a single delivery
    pub fn new(
        message_id: MessageId,
        body: impl Into<String>,
        receipt_handle: ReceiptHandle,
    ) -> Self {
        Self {
            message_id,
            body: body.into(),
            receipt_handle,
            attributes: HashMap::new(),
            receive_count: 1,
            received_at: Timestamp::now(),
        }
    }

    /// Add message attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Set the delivery count reported by the queue
    pub fn with_receive_count(mut self, receive_count: u32) -> Self {
        self.receive_count = receive_count;
        self
    }

    /// Look up a message attribute
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
