//! In-memory queue service for testing and development.
//!
//! This module provides a queue service that models the semantics the
//! listener engine relies on:
//! - Long polling receives that wake up as soon as a message arrives
//! - Per-receive visibility timeouts, with redelivery once they expire
//! - A fresh receipt handle for every delivery; only the current one deletes
//! - Dead letter queues: with a maximum receive count configured, a message
//!   that has already been delivered that often is moved to `<queue>-dlq`
//!   instead of being delivered again
//!
//! Time is measured with `tokio::time`, so tests running with a paused clock
//! can exercise visibility timeouts without real waiting.
//!
//! # Example
//!
//! ```
//! use queue_listener_core::{
//!     InMemoryQueueService, QueueClient, QueueProperties, QueueSettings, ReceiveRequest,
//! };
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let service = InMemoryQueueService::new();
//! let queue = QueueProperties::new("memory://orders").unwrap();
//! service.create_queue(&queue, QueueSettings::default());
//! service.send_message(&queue, "hello").unwrap();
//!
//! let received = service
//!     .receive_messages(&queue, ReceiveRequest::new(1, Duration::ZERO))
//!     .await
//!     .unwrap();
//! assert_eq!(received[0].body, "hello");
//! # });
//! ```

use crate::client::{
    BatchEntryFailure, DeleteBatchEntry, DeleteBatchOutcome, QueueClient, ReceiveRequest,
    MAX_BATCH_SIZE,
};
use crate::error::QueueError;
use crate::message::{Message, MessageId, QueueProperties, ReceiptHandle};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

/// Suffix appended to a queue URL to name its dead letter queue
pub const DEAD_LETTER_SUFFIX: &str = "-dlq";

/// Per-queue behaviour of the in-memory service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSettings {
    /// Visibility timeout applied when a receive does not override it
    pub visibility_timeout: Duration,
    /// Deliveries after which a message is dead-lettered; `None` keeps it forever
    pub max_receive_count: Option<u32>,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(30),
            max_receive_count: None,
        }
    }
}

/// Number of messages in each state for one queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    /// Messages a receive call could return right now
    pub visible: usize,
    /// Messages received but neither deleted nor back to visible
    pub in_flight: usize,
}

// ============================================================================
// Internal Storage Structures
// ============================================================================

struct StoredMessage {
    message_id: MessageId,
    body: String,
    attributes: HashMap<String, String>,
    receive_count: u32,
}

struct InFlightMessage {
    message: StoredMessage,
    visible_at: Instant,
}

struct InMemoryQueue {
    settings: QueueSettings,
    dead_letter_url: Option<String>,
    visible: VecDeque<StoredMessage>,
    /// In-flight messages keyed by their current receipt handle
    in_flight: HashMap<String, InFlightMessage>,
}

impl InMemoryQueue {
    fn new(settings: QueueSettings, dead_letter_url: Option<String>) -> Self {
        Self {
            settings,
            dead_letter_url,
            visible: VecDeque::new(),
            in_flight: HashMap::new(),
        }
    }

    /// Return every message whose visibility timeout has run out
    fn release_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, in_flight)| in_flight.visible_at <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();

        for receipt in expired {
            if let Some(in_flight) = self.in_flight.remove(&receipt) {
                debug!(
                    message_id = %in_flight.message.message_id,
                    "Visibility timeout expired, message is visible again"
                );
                self.visible.push_back(in_flight.message);
            }
        }
    }

    fn next_visibility_expiry(&self) -> Option<Instant> {
        self.in_flight.values().map(|m| m.visible_at).min()
    }

    fn counts(&self) -> QueueCounts {
        QueueCounts {
            visible: self.visible.len(),
            in_flight: self.in_flight.len(),
        }
    }
}

#[derive(Default)]
struct QueueStorage {
    queues: HashMap<String, InMemoryQueue>,
}

impl QueueStorage {
    fn queue_mut(&mut self, queue: &QueueProperties) -> Result<&mut InMemoryQueue, QueueError> {
        self.queues
            .get_mut(queue.queue_url())
            .ok_or_else(|| QueueError::QueueNotFound {
                queue_url: queue.queue_url().to_string(),
            })
    }

    /// Receive up to `max_messages` visible messages, dead-lettering on the way
    fn take(
        &mut self,
        queue: &QueueProperties,
        request: &ReceiveRequest,
        now: Instant,
    ) -> Result<Vec<Message>, QueueError> {
        let source = self.queue_mut(queue)?;
        source.release_expired(now);

        let visibility_timeout = request
            .visibility_timeout
            .unwrap_or(source.settings.visibility_timeout);
        let max_receive_count = source.settings.max_receive_count;
        let dead_letter_url = source.dead_letter_url.clone();

        let mut received = Vec::new();
        let mut dead_lettered = Vec::new();

        while received.len() < request.max_messages {
            let Some(mut stored) = source.visible.pop_front() else {
                break;
            };

            if max_receive_count.is_some_and(|max| stored.receive_count >= max) {
                dead_lettered.push(stored);
                continue;
            }

            stored.receive_count += 1;
            let receipt = format!("{}-{}", stored.message_id, uuid::Uuid::new_v4());

            let mut message = Message::new(
                stored.message_id.clone(),
                stored.body.clone(),
                ReceiptHandle::new(receipt.clone()),
            )
            .with_receive_count(stored.receive_count);
            message.attributes = stored.attributes.clone();
            received.push(message);

            source.in_flight.insert(
                receipt,
                InFlightMessage {
                    message: stored,
                    visible_at: now + visibility_timeout,
                },
            );
        }

        if let Some(dead_letter_url) = dead_letter_url {
            if let Some(dead_letter) = self.queues.get_mut(&dead_letter_url) {
                for stored in dead_lettered {
                    debug!(
                        message_id = %stored.message_id,
                        receive_count = stored.receive_count,
                        dead_letter_queue = %dead_letter_url,
                        "Maximum receive count reached, moving message to dead letter queue"
                    );
                    dead_letter.visible.push_back(StoredMessage {
                        receive_count: 0,
                        ..stored
                    });
                }
            }
        }

        Ok(received)
    }

    fn delete(
        &mut self,
        queue: &QueueProperties,
        receipt_handle: &ReceiptHandle,
        now: Instant,
    ) -> Result<(), QueueError> {
        let target = self.queue_mut(queue)?;
        target.release_expired(now);

        match target.in_flight.remove(receipt_handle.as_str()) {
            Some(in_flight) => {
                debug!(message_id = %in_flight.message.message_id, "Message deleted");
                Ok(())
            }
            None => Err(QueueError::ReceiptHandleInvalid {
                receipt: receipt_handle.to_string(),
            }),
        }
    }
}

// ============================================================================
// InMemoryQueueService
// ============================================================================

/// In-memory queue service implementing [`QueueClient`].
///
/// Clones share the same queues, so a test can keep one handle for sending
/// and inspection while the listener uses another.
#[derive(Clone, Default)]
pub struct InMemoryQueueService {
    inner: Arc<ServiceInner>,
}

#[derive(Default)]
struct ServiceInner {
    storage: Mutex<QueueStorage>,
    arrivals: Notify,
}

impl InMemoryQueueService {
    pub fn new() -> Self {
        Self::default()
    }

    fn storage(&self) -> MutexGuard<'_, QueueStorage> {
        self.inner
            .storage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a queue, plus its dead letter queue when a maximum receive
    /// count is set. Re-creating an existing queue replaces its settings.
    pub fn create_queue(&self, queue: &QueueProperties, settings: QueueSettings) {
        let mut storage = self.storage();

        let dead_letter_url = settings
            .max_receive_count
            .map(|_| format!("{}{}", queue.queue_url(), DEAD_LETTER_SUFFIX));

        if let Some(url) = &dead_letter_url {
            let dead_letter_settings = QueueSettings {
                visibility_timeout: settings.visibility_timeout,
                max_receive_count: None,
            };
            storage
                .queues
                .entry(url.clone())
                .or_insert_with(|| InMemoryQueue::new(dead_letter_settings, None));
        }

        match storage.queues.get_mut(queue.queue_url()) {
            Some(existing) => {
                existing.settings = settings;
                existing.dead_letter_url = dead_letter_url;
            }
            None => {
                storage.queues.insert(
                    queue.queue_url().to_string(),
                    InMemoryQueue::new(settings, dead_letter_url),
                );
            }
        }
    }

    /// Dead letter queue of `queue`, if it has one
    pub fn dead_letter_queue(&self, queue: &QueueProperties) -> Option<QueueProperties> {
        self.storage()
            .queues
            .get(queue.queue_url())
            .and_then(|q| q.dead_letter_url.clone())
            .and_then(|url| QueueProperties::new(url).ok())
    }

    /// Put a message on the queue and wake any waiting receivers
    pub fn send_message(
        &self,
        queue: &QueueProperties,
        body: impl Into<String>,
    ) -> Result<MessageId, QueueError> {
        self.send_message_with_attributes(queue, body, HashMap::new())
    }

    pub fn send_message_with_attributes(
        &self,
        queue: &QueueProperties,
        body: impl Into<String>,
        attributes: HashMap<String, String>,
    ) -> Result<MessageId, QueueError> {
        let message_id = MessageId::generate();
        {
            let mut storage = self.storage();
            let target = storage.queue_mut(queue)?;
            target.visible.push_back(StoredMessage {
                message_id: message_id.clone(),
                body: body.into(),
                attributes,
                receive_count: 0,
            });
        }

        self.inner.arrivals.notify_waiters();
        Ok(message_id)
    }

    /// Current message counts, after releasing expired in-flight messages
    pub fn message_counts(&self, queue: &QueueProperties) -> Result<QueueCounts, QueueError> {
        let mut storage = self.storage();
        let target = storage.queue_mut(queue)?;
        target.release_expired(Instant::now());
        Ok(target.counts())
    }
}

#[async_trait]
impl QueueClient for InMemoryQueueService {
    /// A queue's name is the last path segment of its URL
    async fn get_queue_url(&self, queue_name: &str) -> Result<String, QueueError> {
        self.storage()
            .queues
            .keys()
            .filter(|url| url.rsplit('/').next() == Some(queue_name))
            .min()
            .cloned()
            .ok_or_else(|| QueueError::QueueNotFound {
                queue_url: queue_name.to_string(),
            })
    }

    async fn receive_messages(
        &self,
        queue: &QueueProperties,
        request: ReceiveRequest,
    ) -> Result<Vec<Message>, QueueError> {
        let deadline = Instant::now() + request.wait_time;

        loop {
            let arrival = self.inner.arrivals.notified();

            let next_expiry = {
                let now = Instant::now();
                let mut storage = self.storage();
                let received = storage.take(queue, &request, now)?;
                if !received.is_empty() || now >= deadline {
                    return Ok(received);
                }
                storage.queue_mut(queue)?.next_visibility_expiry()
            };

            let wake_at = next_expiry.map_or(deadline, |expiry| expiry.min(deadline));
            tokio::select! {
                _ = arrival => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn delete_message(
        &self,
        queue: &QueueProperties,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), QueueError> {
        self.storage().delete(queue, receipt_handle, Instant::now())
    }

    async fn delete_message_batch(
        &self,
        queue: &QueueProperties,
        entries: Vec<DeleteBatchEntry>,
    ) -> Result<DeleteBatchOutcome, QueueError> {
        if entries.len() > MAX_BATCH_SIZE {
            return Err(QueueError::BatchTooLarge {
                size: entries.len(),
                max_size: MAX_BATCH_SIZE,
            });
        }

        let now = Instant::now();
        let mut storage = self.storage();
        storage.queue_mut(queue)?;

        let mut outcome = DeleteBatchOutcome::default();
        for entry in entries {
            match storage.delete(queue, &entry.receipt_handle, now) {
                Ok(()) => outcome.successful.push(entry.id),
                Err(e) => outcome.failed.push(BatchEntryFailure {
                    id: entry.id,
                    code: "ReceiptHandleIsInvalid".to_string(),
                    message: e.to_string(),
                }),
            }
        }

        Ok(outcome)
    }
}
