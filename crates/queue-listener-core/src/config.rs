//! # Listener Configuration Module
//!
//! Declarative description of a listener, as loaded from a configuration
//! file. A [`ListenerConfig`] is plain data; [`ListenerConfig::validate`]
//! checks it and the conversion helpers turn it into the typed property
//! objects the engine works with.
//!
//! ```yaml
//! identifier: orders
//! queue_url: https://sqs.eu-west-1.amazonaws.com/123456789012/orders
//! concurrency_level: 4
//! retrieval:
//!   mode: batching
//!   visibility_timeout_seconds: 30
//!   polling_period_ms: 1000
//!   trigger_threshold: 4
//! resolution:
//!   mode: batching
//!   buffering_time_ms: 500
//!   buffering_size_limit: 10
//! ```

use crate::broker::DEFAULT_RETRIEVAL_TIMEOUT;
use crate::error::ConfigurationError;
use crate::message::QueueProperties;
use crate::properties::{
    BatchingResolverProperties, BatchingRetrieverProperties, StaticBrokerProperties,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

fn default_concurrency_level() -> usize {
    1
}

fn default_concurrency_polling_rate_ms() -> u64 {
    60_000
}

fn default_error_backoff_time_ms() -> Option<u64> {
    Some(10_000)
}

fn default_retrieval_timeout_ms() -> u64 {
    DEFAULT_RETRIEVAL_TIMEOUT.as_millis() as u64
}

fn default_polling_period_ms() -> u64 {
    1_000
}

// ============================================================================
// Configuration Types
// ============================================================================

/// Configuration of a single queue listener
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Unique name of the listener, used in logs
    pub identifier: String,

    /// URL of the queue to listen to. A value without a scheme is a queue
    /// name, looked up through the client when the listener is built with
    /// [`ListenerBuilder::resolve_from_config`].
    ///
    /// [`ListenerBuilder::resolve_from_config`]: crate::pipeline::ListenerBuilder::resolve_from_config
    #[serde(alias = "queue")]
    pub queue_url: String,

    /// Named queue client to listen with; `None` uses the default client
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,

    /// Number of concurrent workers
    #[serde(default = "default_concurrency_level")]
    pub concurrency_level: usize,

    #[serde(default = "default_concurrency_polling_rate_ms")]
    pub concurrency_polling_rate_ms: u64,

    /// Worker pause after a failed retrieval; `null` disables the pause
    #[serde(default = "default_error_backoff_time_ms")]
    pub error_backoff_time_ms: Option<u64>,

    /// How long a worker waits for a message per retrieval
    #[serde(default = "default_retrieval_timeout_ms")]
    pub retrieval_timeout_ms: u64,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub resolution: ResolutionConfig,
}

/// How messages are fetched from the queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RetrievalConfig {
    /// One receive call per worker request
    #[default]
    Individual,

    /// Shared receive calls for concurrent worker requests
    Batching {
        visibility_timeout_seconds: u64,
        #[serde(default = "default_polling_period_ms")]
        polling_period_ms: u64,
        trigger_threshold: usize,
        #[serde(default)]
        receive_wait_time_seconds: Option<u64>,
        #[serde(default)]
        error_backoff_time_ms: Option<u64>,
    },
}

/// How processed messages are deleted from the queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ResolutionConfig {
    /// One delete call per message
    #[default]
    Individual,

    /// Buffered deletes sent in batch calls
    Batching {
        buffering_time_ms: u64,
        buffering_size_limit: usize,
    },
}

// ============================================================================
// Validation and Conversion
// ============================================================================

impl ListenerConfig {
    /// Create a configuration with individual retrieval and resolution
    pub fn new(identifier: impl Into<String>, queue_url: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            queue_url: queue_url.into(),
            client: None,
            concurrency_level: default_concurrency_level(),
            concurrency_polling_rate_ms: default_concurrency_polling_rate_ms(),
            error_backoff_time_ms: default_error_backoff_time_ms(),
            retrieval_timeout_ms: default_retrieval_timeout_ms(),
            retrieval: RetrievalConfig::default(),
            resolution: ResolutionConfig::default(),
        }
    }

    /// Check the whole configuration, reporting every problem at once
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let mut errors = Vec::new();

        if self.identifier.trim().is_empty() {
            errors.push("identifier must not be empty".to_string());
        }

        if let Err(e) = self.queue_properties() {
            errors.push(e.to_string());
        }

        if self
            .client
            .as_deref()
            .is_some_and(|client| client.trim().is_empty())
        {
            errors.push("client must not be empty when set".to_string());
        }

        if self.retrieval_timeout_ms == 0 {
            errors.push("retrieval_timeout_ms must be greater than zero".to_string());
        }

        if let Err(e) = self.retrieval.batching_properties() {
            errors.push(e.to_string());
        }

        if let Err(e) = self.resolution.batching_properties() {
            errors.push(e.to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigurationError::Invalid {
                message: format!("listener '{}': {}", self.identifier, errors.join("; ")),
            })
        }
    }

    pub fn queue_properties(&self) -> Result<QueueProperties, ConfigurationError> {
        QueueProperties::new(self.queue_url.clone())
    }

    pub fn broker_properties(&self) -> StaticBrokerProperties {
        StaticBrokerProperties::new(self.concurrency_level)
            .with_concurrency_polling_rate(Duration::from_millis(self.concurrency_polling_rate_ms))
            .with_error_backoff_time(self.error_backoff_time_ms.map(Duration::from_millis))
    }

    pub fn retrieval_timeout(&self) -> Duration {
        Duration::from_millis(self.retrieval_timeout_ms)
    }
}

impl RetrievalConfig {
    /// Typed batching properties, or `None` for individual retrieval
    pub fn batching_properties(
        &self,
    ) -> Result<Option<BatchingRetrieverProperties>, ConfigurationError> {
        match self {
            Self::Individual => Ok(None),
            Self::Batching {
                visibility_timeout_seconds,
                polling_period_ms,
                trigger_threshold,
                receive_wait_time_seconds,
                error_backoff_time_ms,
            } => {
                let mut properties = BatchingRetrieverProperties::new(
                    Duration::from_secs(*visibility_timeout_seconds),
                    Duration::from_millis(*polling_period_ms),
                    *trigger_threshold,
                )?;

                if let Some(seconds) = receive_wait_time_seconds {
                    properties = properties.with_receive_wait_time(Duration::from_secs(*seconds));
                }
                if let Some(ms) = error_backoff_time_ms {
                    properties = properties.with_error_backoff_time(Duration::from_millis(*ms));
                }

                Ok(Some(properties))
            }
        }
    }
}

impl ResolutionConfig {
    /// Typed batching properties, or `None` for individual resolution
    pub fn batching_properties(
        &self,
    ) -> Result<Option<BatchingResolverProperties>, ConfigurationError> {
        match self {
            Self::Individual => Ok(None),
            Self::Batching {
                buffering_time_ms,
                buffering_size_limit,
            } => BatchingResolverProperties::new(
                Duration::from_millis(*buffering_time_ms),
                *buffering_size_limit,
            )
            .map(Some),
        }
    }
}
