//! # Queue Listener Core
//!
//! Concurrent message listener engine for pull-based queue services such as
//! AWS SQS.
//!
//! A listener is a pipeline of four components:
//! - A **retriever** pulls messages from the queue, one per request, either
//!   with its own receive call or pooled into batch receives
//! - A **broker** runs a dynamically sized pool of workers that retrieve and
//!   process messages
//! - A **processor** runs the application's [`MessageHandler`] and, when it
//!   succeeds, hands the message to the resolver
//! - A **resolver** deletes processed messages, individually or in batches
//!
//! A [`SimpleMessageListenerContainer`] starts and stops the pipeline as a
//! unit. [`ListenerBuilder`] assembles one from code or from a
//! [`ListenerConfig`].
//!
//! Delivery is at-least-once: a message whose handler fails stays on the
//! queue and is delivered again after its visibility timeout.
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for queue calls, retrieval, configuration and lifecycle
//! - [`message`] - Messages, identifiers and queue properties
//! - [`client`] - The queue client capability providers implement
//! - [`providers`] - In-memory and AWS SQS queue clients
//! - [`properties`] - Broker and batching properties
//! - [`retriever`], [`processor`], [`broker`], [`resolver`] - Pipeline components
//! - [`container`] - Listener lifecycle
//! - [`config`], [`pipeline`] - Declarative configuration and assembly

pub mod broker;
pub mod client;
pub mod config;
pub mod container;
pub mod error;
pub mod message;
pub mod pipeline;
pub mod processor;
pub mod properties;
pub mod providers;
pub mod resolver;
pub mod retriever;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types at crate root for convenience
pub use broker::{BrokerState, ConcurrentMessageBroker};
pub use client::{
    resolve_queue, BatchEntryFailure, DeleteBatchEntry, DeleteBatchOutcome, QueueClient,
    ReceiveRequest, MAX_BATCH_SIZE, MAX_WAIT_TIME,
};
pub use config::{ListenerConfig, ResolutionConfig, RetrievalConfig};
pub use container::SimpleMessageListenerContainer;
pub use error::{ConfigurationError, HandlerError, ListenerError, QueueError, RetrievalError};
pub use message::{Message, MessageId, QueueProperties, ReceiptHandle, Timestamp};
pub use pipeline::ListenerBuilder;
pub use processor::{DefaultMessageProcessor, MessageHandler, MessageProcessor, ProcessingOutcome};
pub use properties::{
    BatchingResolverProperties, BatchingRetrieverProperties, BrokerProperties,
    SharedBrokerProperties, StaticBrokerProperties,
};
pub use providers::{InMemoryQueueService, QueueCounts, QueueSettings};
pub use resolver::{BatchingMessageResolver, IndividualMessageResolver, MessageResolver};
pub use retriever::{BatchingMessageRetriever, IndividualMessageRetriever, MessageRetriever};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
