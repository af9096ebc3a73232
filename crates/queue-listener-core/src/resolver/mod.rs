//! Message resolution: acknowledging (deleting) processed messages.
//!
//! A resolver receives every message a handler completed successfully and
//! deletes it from the remote queue. Resolution is fire-and-forget for the
//! caller: failures are logged here and never reach the processor. A message
//! whose delete fails simply becomes visible again after its visibility
//! timeout, which the engine accepts as at-least-once delivery.
//!
//! Two strategies are provided:
//!
//! - [`IndividualMessageResolver`] issues one delete call per message.
//! - [`BatchingMessageResolver`] buffers deletions and flushes them in batch
//!   calls of at most ten entries, on a size or time threshold.

use crate::error::ListenerError;
use crate::message::Message;
use async_trait::async_trait;
use std::time::Duration;

pub mod batching;
pub mod individual;

pub use batching::BatchingMessageResolver;
pub use individual::IndividualMessageResolver;

/// Acknowledges successfully processed messages
#[async_trait]
pub trait MessageResolver: Send + Sync {
    /// Prepare the resolver to accept messages.
    ///
    /// Called by the container on every start. Resolvers that need no
    /// background work keep the default no-op.
    async fn start(&self) {}

    /// Hand a processed message over for deletion.
    ///
    /// Returns immediately. Consuming the message guarantees that one
    /// received instance is submitted at most once.
    fn resolve_message(&self, message: Message);

    /// Finish outstanding deletions and stop, waiting at most `timeout`
    async fn stop(&self, timeout: Duration) -> Result<(), ListenerError>;
}
