//! Listener container: lifecycle owner of one retriever-broker-resolver pipeline.

use crate::broker::ConcurrentMessageBroker;
use crate::error::ListenerError;
use crate::resolver::MessageResolver;
use crate::retriever::MessageRetriever;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[cfg(test)]
#[path = "container_tests.rs"]
mod tests;

/// Starts and stops the components of one listener in dependency order.
///
/// Start order is resolver, retriever, then broker, so workers never ask a
/// retriever that is not ready and never resolve into a stopped resolver. Stop order is broker, retriever, resolver: workers
/// finish their messages first, and everything they resolved is flushed
/// last. All three share the timeout passed to [`stop`].
///
/// [`stop`]: SimpleMessageListenerContainer::stop
pub struct SimpleMessageListenerContainer {
    identifier: String,
    retriever: Arc<dyn MessageRetriever>,
    broker: ConcurrentMessageBroker,
    resolver: Arc<dyn MessageResolver>,
    running: AtomicBool,
}

impl SimpleMessageListenerContainer {
    pub fn new(
        identifier: impl Into<String>,
        retriever: Arc<dyn MessageRetriever>,
        broker: ConcurrentMessageBroker,
        resolver: Arc<dyn MessageResolver>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            retriever,
            broker,
            resolver,
            running: AtomicBool::new(false),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn broker(&self) -> &ConcurrentMessageBroker {
        &self.broker
    }

    /// Start the listener. Starting a running listener does nothing; a
    /// stopped listener can be started again.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!(identifier = %self.identifier, "Listener is already running");
            return;
        }

        self.resolver.start().await;
        self.retriever.start().await;
        self.broker.start();

        info!(identifier = %self.identifier, "Listener started");
    }

    /// Stop the listener within `timeout`.
    ///
    /// Every component is asked to stop even when an earlier one overran the
    /// deadline; the first overrun is returned. Stopping a stopped listener
    /// does nothing.
    pub async fn stop(&self, timeout: Duration) -> Result<(), ListenerError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!(identifier = %self.identifier, "Listener is not running");
            return Ok(());
        }

        let deadline = Instant::now() + timeout;
        let remaining = || deadline.saturating_duration_since(Instant::now());

        let broker = self.broker.stop(remaining()).await;
        let retriever = self.retriever.stop(remaining()).await;
        let resolver = self.resolver.stop(remaining()).await;

        let result = broker.and(retriever).and(resolver);
        match &result {
            Ok(()) => info!(identifier = %self.identifier, "Listener stopped"),
            Err(e) => warn!(identifier = %self.identifier, error = %e, "Listener stopped uncleanly"),
        }
        result
    }
}
