//! Retriever issuing one receive call per request.

use super::MessageRetriever;
use crate::client::{QueueClient, ReceiveRequest, MAX_WAIT_TIME};
use crate::error::RetrievalError;
use crate::message::{Message, QueueProperties};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "individual_tests.rs"]
mod tests;

/// Retrieves a single message per receive call.
///
/// The long-poll wait of each call is the caller's timeout, capped at the
/// service maximum of 20 seconds. Errors go straight back to the caller.
pub struct IndividualMessageRetriever {
    queue: QueueProperties,
    client: Arc<dyn QueueClient>,
}

impl IndividualMessageRetriever {
    pub fn new(queue: QueueProperties, client: Arc<dyn QueueClient>) -> Self {
        Self { queue, client }
    }
}

#[async_trait]
impl MessageRetriever for IndividualMessageRetriever {
    async fn retrieve_message(&self, timeout: Duration) -> Result<Option<Message>, RetrievalError> {
        let request = ReceiveRequest::new(1, timeout.min(MAX_WAIT_TIME));
        let mut messages = self.client.receive_messages(&self.queue, request).await?;

        if messages.len() > 1 {
            // The call asked for one message; anything beyond it becomes
            // visible again after its visibility timeout.
            warn!(
                queue_url = %self.queue,
                received = messages.len(),
                "Receive returned more messages than requested"
            );
        }

        if messages.is_empty() {
            debug!(queue_url = %self.queue, "No message received");
            return Ok(None);
        }

        Ok(Some(messages.swap_remove(0)))
    }
}
