//! Queue client implementations.
//!
//! This module contains concrete implementations of the `QueueClient` trait
//! for different queue backends. The AWS provider is behind the `aws` feature.

#[cfg(feature = "aws")]
pub mod aws;
pub mod memory;

#[cfg(feature = "aws")]
pub use aws::SqsQueueClient;
pub use memory::{InMemoryQueueService, QueueCounts, QueueSettings, DEAD_LETTER_SUFFIX};
