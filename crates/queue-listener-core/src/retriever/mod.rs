//! Message retrieval: handing one message at a time to broker workers.
//!
//! Workers call [`MessageRetriever::retrieve_message`] in a loop. An
//! individual retriever turns every request into its own receive call; a
//! batching retriever pools concurrent requests into shared receive calls and
//! hands any surplus to the next requester.

use crate::error::{ListenerError, RetrievalError};
use crate::message::Message;
use async_trait::async_trait;
use std::time::Duration;

pub mod batching;
pub mod individual;

pub use batching::BatchingMessageRetriever;
pub use individual::IndividualMessageRetriever;

/// Supplies messages to broker workers
#[async_trait]
pub trait MessageRetriever: Send + Sync {
    /// Start any background activity. The default does nothing.
    async fn start(&self) {}

    /// Wait up to `timeout` for a single message.
    ///
    /// `Ok(None)` means no message became available in time. A message is
    /// delivered to exactly one caller.
    async fn retrieve_message(&self, timeout: Duration) -> Result<Option<Message>, RetrievalError>;

    /// Stop background activity, waiting at most `timeout`. The default does
    /// nothing.
    async fn stop(&self, _timeout: Duration) -> Result<(), ListenerError> {
        Ok(())
    }
}
