//! Tunable properties for brokers, batching retrievers and batching resolvers.
//!
//! Broker properties are read through the [`BrokerProperties`] trait on every
//! supervision cycle, so they can be either a frozen snapshot
//! ([`StaticBrokerProperties`]) or a live value that other parts of the
//! application update at runtime ([`SharedBrokerProperties`]).
//!
//! Batching properties are validated on construction. Invalid values are a
//! [`ConfigurationError`] before any worker starts.

use crate::client::{MAX_BATCH_SIZE, MAX_WAIT_TIME};
use crate::error::ConfigurationError;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

/// Longest visibility timeout the modelled queue service accepts (12 hours)
pub const MAX_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(12 * 60 * 60);

// ============================================================================
// Broker Properties
// ============================================================================

/// Read contract for concurrent broker settings.
///
/// The broker calls these on every polling cycle and must not assume whether
/// the values are constant or change between calls.
pub trait BrokerProperties: Send + Sync {
    /// Number of workers that should be running; zero idles the broker
    fn concurrency_level(&self) -> usize;

    /// How often the broker re-reads `concurrency_level`
    fn concurrency_polling_rate(&self) -> Duration;

    /// Delay a worker waits after a failed retrieval
    fn error_backoff_time(&self) -> Option<Duration>;
}

/// Broker properties frozen at construction time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticBrokerProperties {
    concurrency_level: usize,
    concurrency_polling_rate: Duration,
    error_backoff_time: Option<Duration>,
}

impl StaticBrokerProperties {
    pub fn new(concurrency_level: usize) -> Self {
        Self {
            concurrency_level,
            ..Self::default()
        }
    }

    /// Set how often the concurrency level is re-read
    pub fn with_concurrency_polling_rate(mut self, rate: Duration) -> Self {
        self.concurrency_polling_rate = rate;
        self
    }

    /// Set the per-worker delay after a retrieval failure
    pub fn with_error_backoff_time(mut self, backoff: Option<Duration>) -> Self {
        self.error_backoff_time = backoff;
        self
    }
}

impl Default for StaticBrokerProperties {
    fn default() -> Self {
        Self {
            concurrency_level: 1,
            concurrency_polling_rate: Duration::from_secs(60),
            error_backoff_time: Some(Duration::from_secs(10)),
        }
    }
}

impl BrokerProperties for StaticBrokerProperties {
    fn concurrency_level(&self) -> usize {
        self.concurrency_level
    }

    fn concurrency_polling_rate(&self) -> Duration {
        self.concurrency_polling_rate
    }

    fn error_backoff_time(&self) -> Option<Duration> {
        self.error_backoff_time
    }
}

/// Broker properties that can be changed while the broker is running.
///
/// Clones share the same underlying values, so an application keeps one clone
/// and hands another to the broker.
#[derive(Debug, Clone, Default)]
pub struct SharedBrokerProperties {
    inner: Arc<RwLock<StaticBrokerProperties>>,
}

impl SharedBrokerProperties {
    pub fn new(initial: StaticBrokerProperties) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial)),
        }
    }

    /// Change the number of workers the broker should run
    pub fn set_concurrency_level(&self, concurrency_level: usize) {
        self.write(|props| props.concurrency_level = concurrency_level);
    }

    pub fn set_concurrency_polling_rate(&self, rate: Duration) {
        self.write(|props| props.concurrency_polling_rate = rate);
    }

    pub fn set_error_backoff_time(&self, backoff: Option<Duration>) {
        self.write(|props| props.error_backoff_time = backoff);
    }

    /// Take a copy of the current values
    pub fn snapshot(&self) -> StaticBrokerProperties {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn write(&self, update: impl FnOnce(&mut StaticBrokerProperties)) {
        let mut props = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        update(&mut props);
    }
}

impl BrokerProperties for SharedBrokerProperties {
    fn concurrency_level(&self) -> usize {
        self.snapshot().concurrency_level
    }

    fn concurrency_polling_rate(&self) -> Duration {
        self.snapshot().concurrency_polling_rate
    }

    fn error_backoff_time(&self) -> Option<Duration> {
        self.snapshot().error_backoff_time
    }
}

// ============================================================================
// Batching Retriever Properties
// ============================================================================

/// Settings for the batching message retriever
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchingRetrieverProperties {
    visibility_timeout: Duration,
    polling_period: Duration,
    trigger_threshold: usize,
    receive_wait_time: Duration,
    error_backoff_time: Duration,
}

impl BatchingRetrieverProperties {
    /// Create validated batching retriever properties.
    ///
    /// `trigger_threshold` is the number of waiting requesters that forces an
    /// immediate receive and must be within `1..=10`.
    pub fn new(
        visibility_timeout: Duration,
        polling_period: Duration,
        trigger_threshold: usize,
    ) -> Result<Self, ConfigurationError> {
        if trigger_threshold == 0 || trigger_threshold > MAX_BATCH_SIZE {
            return Err(ConfigurationError::OutOfRange {
                field: "trigger_threshold".to_string(),
                message: format!("must be between 1 and {}", MAX_BATCH_SIZE),
            });
        }

        if visibility_timeout < Duration::from_secs(1) {
            return Err(ConfigurationError::OutOfRange {
                field: "visibility_timeout".to_string(),
                message: "must be at least 1 second".to_string(),
            });
        }

        if visibility_timeout > MAX_VISIBILITY_TIMEOUT {
            return Err(ConfigurationError::OutOfRange {
                field: "visibility_timeout".to_string(),
                message: format!("must not exceed {:?}", MAX_VISIBILITY_TIMEOUT),
            });
        }

        Ok(Self {
            visibility_timeout,
            polling_period,
            trigger_threshold,
            receive_wait_time: MAX_WAIT_TIME,
            error_backoff_time: Duration::from_secs(10),
        })
    }

    /// Set the long-poll wait used for each receive call (capped at 20 seconds)
    pub fn with_receive_wait_time(mut self, wait_time: Duration) -> Self {
        self.receive_wait_time = wait_time.min(MAX_WAIT_TIME);
        self
    }

    /// Set the pause after a failed receive before the next attempt
    pub fn with_error_backoff_time(mut self, backoff: Duration) -> Self {
        self.error_backoff_time = backoff;
        self
    }

    pub fn visibility_timeout(&self) -> Duration {
        self.visibility_timeout
    }

    pub fn polling_period(&self) -> Duration {
        self.polling_period
    }

    pub fn trigger_threshold(&self) -> usize {
        self.trigger_threshold
    }

    pub fn receive_wait_time(&self) -> Duration {
        self.receive_wait_time
    }

    pub fn error_backoff_time(&self) -> Duration {
        self.error_backoff_time
    }
}

// ============================================================================
// Batching Resolver Properties
// ============================================================================

/// Settings for the batching message resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchingResolverProperties {
    buffering_time: Duration,
    buffering_size_limit: usize,
}

impl BatchingResolverProperties {
    /// Create validated batching resolver properties.
    ///
    /// `buffering_time` must be positive and `buffering_size_limit` within
    /// `1..=10`, the batch delete ceiling of the queue service.
    pub fn new(
        buffering_time: Duration,
        buffering_size_limit: usize,
    ) -> Result<Self, ConfigurationError> {
        if buffering_time.is_zero() {
            return Err(ConfigurationError::OutOfRange {
                field: "buffering_time".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        if buffering_size_limit == 0 || buffering_size_limit > MAX_BATCH_SIZE {
            return Err(ConfigurationError::OutOfRange {
                field: "buffering_size_limit".to_string(),
                message: format!("must be between 1 and {}", MAX_BATCH_SIZE),
            });
        }

        Ok(Self {
            buffering_time,
            buffering_size_limit,
        })
    }

    pub fn buffering_time(&self) -> Duration {
        self.buffering_time
    }

    pub fn buffering_size_limit(&self) -> usize {
        self.buffering_size_limit
    }
}

#[cfg(test)]
#[path = "properties_tests.rs"]
mod tests;
