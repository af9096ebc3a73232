//! Assembly of complete listener pipelines.

use crate::broker::{ConcurrentMessageBroker, DEFAULT_RETRIEVAL_TIMEOUT};
use crate::client::{resolve_queue, QueueClient};
use crate::config::ListenerConfig;
use crate::container::SimpleMessageListenerContainer;
use crate::error::{ConfigurationError, ListenerError};
use crate::message::QueueProperties;
use crate::processor::{DefaultMessageProcessor, MessageHandler};
use crate::properties::{
    BatchingResolverProperties, BatchingRetrieverProperties, BrokerProperties,
    StaticBrokerProperties,
};
use crate::resolver::{BatchingMessageResolver, IndividualMessageResolver, MessageResolver};
use crate::retriever::{BatchingMessageRetriever, IndividualMessageRetriever, MessageRetriever};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;

/// Builds a [`SimpleMessageListenerContainer`] from its parts.
///
/// Defaults to individual retrieval and resolution with a single worker.
///
/// # Examples
///
/// ```no_run
/// # use queue_listener_core::*;
/// # use std::sync::Arc;
/// # use std::time::Duration;
/// # async fn example(client: Arc<dyn QueueClient>, handler: Arc<dyn MessageHandler>) -> Result<(), ListenerError> {
/// let queue = QueueProperties::new("http://localhost:4566/000000000000/orders")?;
/// let listener = ListenerBuilder::new("orders", queue, client, handler)
///     .with_broker_properties(Arc::new(StaticBrokerProperties::new(4)))
///     .with_batching_resolution(BatchingResolverProperties::new(Duration::from_millis(500), 10)?)
///     .build();
///
/// listener.start().await;
/// listener.stop(Duration::from_secs(30)).await?;
/// # Ok(())
/// # }
/// ```
pub struct ListenerBuilder {
    identifier: String,
    queue: QueueProperties,
    client: Arc<dyn QueueClient>,
    handler: Arc<dyn MessageHandler>,
    broker_properties: Arc<dyn BrokerProperties>,
    retrieval: Option<BatchingRetrieverProperties>,
    resolution: Option<BatchingResolverProperties>,
    retrieval_timeout: Duration,
}

impl ListenerBuilder {
    pub fn new(
        identifier: impl Into<String>,
        queue: QueueProperties,
        client: Arc<dyn QueueClient>,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            queue,
            client,
            handler,
            broker_properties: Arc::new(StaticBrokerProperties::default()),
            retrieval: None,
            resolution: None,
            retrieval_timeout: DEFAULT_RETRIEVAL_TIMEOUT,
        }
    }

    /// Create a builder from declarative configuration, validating it first
    pub fn from_config(
        config: &ListenerConfig,
        client: Arc<dyn QueueClient>,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;

        let mut builder = Self::new(
            config.identifier.clone(),
            config.queue_properties()?,
            client,
            handler,
        )
        .with_broker_properties(Arc::new(config.broker_properties()))
        .with_retrieval_timeout(config.retrieval_timeout());

        if let Some(properties) = config.retrieval.batching_properties()? {
            builder = builder.with_batching_retrieval(properties);
        }
        if let Some(properties) = config.resolution.batching_properties()? {
            builder = builder.with_batching_resolution(properties);
        }

        Ok(builder)
    }

    /// Like [`from_config`](Self::from_config), but `queue_url` may also be
    /// a queue name, which is looked up through `client` first.
    pub async fn resolve_from_config(
        config: &ListenerConfig,
        client: Arc<dyn QueueClient>,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Self, ListenerError> {
        config.validate()?;

        let queue = resolve_queue(client.as_ref(), &config.queue_url)
            .await
            .map_err(|source| ListenerError::QueueResolution {
                queue: config.queue_url.clone(),
                source,
            })?;
        debug!(
            identifier = %config.identifier,
            queue = %config.queue_url,
            queue_url = %queue,
            "Resolved listener queue"
        );

        let resolved = ListenerConfig {
            queue_url: queue.queue_url().to_string(),
            ..config.clone()
        };
        Ok(Self::from_config(&resolved, client, handler)?)
    }

    /// Use the given broker properties, static or shared
    pub fn with_broker_properties(mut self, properties: Arc<dyn BrokerProperties>) -> Self {
        self.broker_properties = properties;
        self
    }

    pub fn with_batching_retrieval(mut self, properties: BatchingRetrieverProperties) -> Self {
        self.retrieval = Some(properties);
        self
    }

    pub fn with_batching_resolution(mut self, properties: BatchingResolverProperties) -> Self {
        self.resolution = Some(properties);
        self
    }

    pub fn with_retrieval_timeout(mut self, timeout: Duration) -> Self {
        self.retrieval_timeout = timeout;
        self
    }

    /// Assemble the container.
    ///
    /// Must be called from within a tokio runtime when batching resolution
    /// is enabled, since the resolver starts its flush loop immediately.
    pub fn build(self) -> SimpleMessageListenerContainer {
        let retriever: Arc<dyn MessageRetriever> = match self.retrieval {
            Some(properties) => Arc::new(BatchingMessageRetriever::new(
                self.queue.clone(),
                Arc::clone(&self.client),
                properties,
            )),
            None => Arc::new(IndividualMessageRetriever::new(
                self.queue.clone(),
                Arc::clone(&self.client),
            )),
        };

        let resolver: Arc<dyn MessageResolver> = match self.resolution {
            Some(properties) => Arc::new(BatchingMessageResolver::new(
                self.queue.clone(),
                Arc::clone(&self.client),
                properties,
            )),
            None => Arc::new(IndividualMessageResolver::new(
                self.queue.clone(),
                Arc::clone(&self.client),
            )),
        };

        let processor = Arc::new(DefaultMessageProcessor::new(
            self.queue.clone(),
            self.handler,
            Arc::clone(&resolver),
        ));

        let broker = ConcurrentMessageBroker::new(
            Arc::clone(&retriever),
            processor,
            self.broker_properties,
        )
        .with_retrieval_timeout(self.retrieval_timeout);

        debug!(
            identifier = %self.identifier,
            queue_url = %self.queue,
            "Listener pipeline assembled"
        );

        SimpleMessageListenerContainer::new(self.identifier, retriever, broker, resolver)
    }
}
