//! Message processing: running the application handler and resolving on success.

use crate::error::HandlerError;
use crate::message::{Message, QueueProperties};
use crate::resolver::MessageResolver;
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error};

#[cfg(test)]
#[path = "processor_tests.rs"]
mod tests;

/// Application code that handles one message.
///
/// Returning an error leaves the message on the queue; it is delivered again
/// after its visibility timeout.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError>;
}

/// Result of processing a single message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingOutcome {
    /// Handler completed and the message was handed to the resolver
    Success,
    /// Handler failed or panicked; the message was not resolved
    Failure,
}

/// Runs the handler for a message and decides whether it gets resolved
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    /// Process one message to completion. Never fails: handler errors are
    /// reported as [`ProcessingOutcome::Failure`].
    async fn process_message(&self, message: Message) -> ProcessingOutcome;
}

/// Processor that resolves a message exactly when its handler succeeds.
///
/// A panicking handler is caught and treated like a failed one, so it never
/// takes down the worker that called it.
pub struct DefaultMessageProcessor {
    queue: QueueProperties,
    handler: Arc<dyn MessageHandler>,
    resolver: Arc<dyn MessageResolver>,
}

impl DefaultMessageProcessor {
    pub fn new(
        queue: QueueProperties,
        handler: Arc<dyn MessageHandler>,
        resolver: Arc<dyn MessageResolver>,
    ) -> Self {
        Self {
            queue,
            handler,
            resolver,
        }
    }
}

#[async_trait]
impl MessageProcessor for DefaultMessageProcessor {
    async fn process_message(&self, message: Message) -> ProcessingOutcome {
        let outcome = AssertUnwindSafe(self.handler.handle(&message))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {
                debug!(message_id = %message.message_id, "Message processed successfully");
                self.resolver.resolve_message(message);
                ProcessingOutcome::Success
            }
            Ok(Err(e)) => {
                error!(
                    message_id = %message.message_id,
                    queue_url = %self.queue,
                    receive_count = message.receive_count,
                    error = %e,
                    "Error processing message"
                );
                ProcessingOutcome::Failure
            }
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());

                error!(
                    message_id = %message.message_id,
                    queue_url = %self.queue,
                    receive_count = message.receive_count,
                    panic = %reason,
                    "Message handler panicked"
                );
                ProcessingOutcome::Failure
            }
        }
    }
}
