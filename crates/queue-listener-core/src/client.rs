//! Queue client capability consumed by retrievers and resolvers.
//!
//! The engine never talks to a queue service directly. Everything goes through
//! [`QueueClient`], which providers implement for a concrete backend.

use crate::error::QueueError;
use crate::message::{Message, QueueProperties, ReceiptHandle};
use async_trait::async_trait;
use std::time::Duration;

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

/// Maximum number of entries a single batch receive or delete may carry
pub const MAX_BATCH_SIZE: usize = 10;

/// Longest long-poll wait a receive call may request
pub const MAX_WAIT_TIME: Duration = Duration::from_secs(20);

/// Parameters for one receive call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveRequest {
    /// Maximum number of messages to return, always within `1..=MAX_BATCH_SIZE`
    pub max_messages: usize,
    /// How long the service may hold the call open waiting for messages
    pub wait_time: Duration,
    /// Visibility timeout override; `None` uses the queue's own setting
    pub visibility_timeout: Option<Duration>,
}

impl ReceiveRequest {
    /// Create a receive request, clamping both limits to what the service accepts
    pub fn new(max_messages: usize, wait_time: Duration) -> Self {
        Self {
            max_messages: max_messages.clamp(1, MAX_BATCH_SIZE),
            wait_time: wait_time.min(MAX_WAIT_TIME),
            visibility_timeout: None,
        }
    }

    /// Override the queue's visibility timeout for the received messages
    pub fn with_visibility_timeout(mut self, visibility_timeout: Duration) -> Self {
        self.visibility_timeout = Some(visibility_timeout);
        self
    }
}

/// One entry of a batch delete call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteBatchEntry {
    /// Batch-local identifier used to correlate the per-entry result
    pub id: String,
    pub receipt_handle: ReceiptHandle,
}

/// Per-entry failure reported by a batch delete call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntryFailure {
    pub id: String,
    pub code: String,
    pub message: String,
}

/// Result of a batch delete call that reached the service
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteBatchOutcome {
    /// Identifiers of the entries that were deleted
    pub successful: Vec<String>,
    pub failed: Vec<BatchEntryFailure>,
}

/// Interface implemented by queue providers (AWS SQS, in-memory, ...)
///
/// All calls are independent and may fail individually. Implementations must
/// be safe to call concurrently from any number of tasks.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Look up the URL of the queue called `queue_name`
    async fn get_queue_url(&self, queue_name: &str) -> Result<String, QueueError>;

    /// Receive up to `request.max_messages` messages
    async fn receive_messages(
        &self,
        queue: &QueueProperties,
        request: ReceiveRequest,
    ) -> Result<Vec<Message>, QueueError>;

    /// Delete a single message by its receipt handle
    async fn delete_message(
        &self,
        queue: &QueueProperties,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), QueueError>;

    /// Delete up to `MAX_BATCH_SIZE` messages in one call
    async fn delete_message_batch(
        &self,
        queue: &QueueProperties,
        entries: Vec<DeleteBatchEntry>,
    ) -> Result<DeleteBatchOutcome, QueueError>;
}

/// Resolve a configured queue reference into queue properties.
///
/// A reference containing `://` is taken to be a URL already and used as is.
/// Anything else is a queue name, looked up through [`QueueClient::get_queue_url`].
pub async fn resolve_queue(
    client: &dyn QueueClient,
    queue: &str,
) -> Result<QueueProperties, QueueError> {
    let queue_url = if queue.contains("://") {
        queue.to_string()
    } else {
        client.get_queue_url(queue).await?
    };

    QueueProperties::new(queue_url).map_err(|_| QueueError::QueueNotFound {
        queue_url: queue.to_string(),
    })
}
