//! Resolver that buffers deletions and sends them in batch calls.

use super::MessageResolver;
use crate::client::{DeleteBatchEntry, QueueClient};
use crate::error::ListenerError;
use crate::message::{Message, QueueProperties};
use crate::properties::BatchingResolverProperties;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[cfg(test)]
#[path = "batching_tests.rs"]
mod tests;

/// Buffers resolved messages and deletes them with batch calls.
///
/// A flush happens when the buffer reaches `buffering_size_limit` entries or
/// when the oldest buffered entry has waited `buffering_time`, whichever comes
/// first. Each flush sends one batch call of at most `buffering_size_limit`
/// entries. Per-entry failures are logged and dropped; they are not retried.
///
/// The flush loop is started on construction and runs until [`stop`] is
/// called, at which point everything still buffered is flushed. A later
/// [`start`] spawns a fresh flush loop and accepts messages again.
///
/// [`start`]: MessageResolver::start
/// [`stop`]: MessageResolver::stop
pub struct BatchingMessageResolver {
    shared: Arc<ResolverShared>,
    flush_loop: Mutex<Option<FlushLoop>>,
}

struct FlushLoop {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl FlushLoop {
    fn spawn(shared: &Arc<ResolverShared>) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(Arc::clone(shared).run(shutdown_rx));
        Self { shutdown, handle }
    }
}

struct PendingResolution {
    message: Message,
    enqueued_at: Instant,
}

struct ResolverShared {
    queue: QueueProperties,
    client: Arc<dyn QueueClient>,
    properties: BatchingResolverProperties,
    buffer: Mutex<VecDeque<PendingResolution>>,
    accepting: Mutex<bool>,
    wakeup: Notify,
}

impl ResolverShared {
    fn buffered(&self) -> usize {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Deadline at which the oldest buffered entry must be flushed
    fn next_deadline(&self) -> Option<Instant> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .front()
            .map(|pending| pending.enqueued_at + self.properties.buffering_time())
    }

    fn take_batch(&self) -> Vec<PendingResolution> {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        let count = buffer.len().min(self.properties.buffering_size_limit());
        buffer.drain(..count).collect()
    }

    async fn flush(&self, batch: Vec<PendingResolution>) {
        if batch.is_empty() {
            return;
        }

        let messages: Vec<Message> = batch.into_iter().map(|p| p.message).collect();
        let entries: Vec<DeleteBatchEntry> = messages
            .iter()
            .enumerate()
            .map(|(index, message)| DeleteBatchEntry {
                id: index.to_string(),
                receipt_handle: message.receipt_handle.clone(),
            })
            .collect();

        debug!(
            queue_url = %self.queue,
            batch_size = entries.len(),
            "Flushing batch of message deletions"
        );

        match self.client.delete_message_batch(&self.queue, entries).await {
            Ok(outcome) => {
                for failure in &outcome.failed {
                    let message_id = failure
                        .id
                        .parse::<usize>()
                        .ok()
                        .and_then(|index| messages.get(index))
                        .map(|m| m.message_id.to_string())
                        .unwrap_or_else(|| failure.id.clone());

                    error!(
                        message_id = %message_id,
                        queue_url = %self.queue,
                        code = %failure.code,
                        reason = %failure.message,
                        "Error deleting message in batch"
                    );
                }

                debug!(
                    deleted = outcome.successful.len(),
                    failed = outcome.failed.len(),
                    "Batch deletion completed"
                );
            }
            Err(e) => {
                error!(
                    queue_url = %self.queue,
                    batch_size = messages.len(),
                    error = %e,
                    "Error deleting batch of messages"
                );
            }
        }
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let due = self
                .next_deadline()
                .is_some_and(|deadline| deadline <= Instant::now());
            if self.buffered() >= self.properties.buffering_size_limit() || due {
                let batch = self.take_batch();
                self.flush(batch).await;
                continue;
            }

            let wakeup = self.wakeup.notified();
            match self.next_deadline() {
                Some(deadline) => {
                    tokio::select! {
                        _ = wakeup => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
                None => {
                    tokio::select! {
                        _ = wakeup => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }

        loop {
            let batch = self.take_batch();
            if batch.is_empty() {
                break;
            }
            self.flush(batch).await;
        }

        info!(queue_url = %self.queue, "Batching resolver stopped");
    }
}

impl BatchingMessageResolver {
    /// Create the resolver and start its flush loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        queue: QueueProperties,
        client: Arc<dyn QueueClient>,
        properties: BatchingResolverProperties,
    ) -> Self {
        let shared = Arc::new(ResolverShared {
            queue,
            client,
            properties,
            buffer: Mutex::new(VecDeque::new()),
            accepting: Mutex::new(true),
            wakeup: Notify::new(),
        });

        let flush_loop = FlushLoop::spawn(&shared);

        Self {
            shared,
            flush_loop: Mutex::new(Some(flush_loop)),
        }
    }

    /// Number of resolutions waiting for the next flush
    pub fn buffered(&self) -> usize {
        self.shared.buffered()
    }
}

#[async_trait]
impl MessageResolver for BatchingMessageResolver {
    async fn start(&self) {
        let mut flush_loop = self
            .flush_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if flush_loop.is_some() {
            return;
        }

        *self
            .shared
            .accepting
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = true;
        *flush_loop = Some(FlushLoop::spawn(&self.shared));

        info!(queue_url = %self.shared.queue, "Batching resolver started");
    }

    fn resolve_message(&self, message: Message) {
        let accepting = self
            .shared
            .accepting
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !*accepting {
            warn!(
                message_id = %message.message_id,
                "Resolver is stopped, message will not be deleted"
            );
            return;
        }

        self.shared
            .buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(PendingResolution {
                message,
                enqueued_at: Instant::now(),
            });
        drop(accepting);

        self.shared.wakeup.notify_one();
    }

    async fn stop(&self, timeout: Duration) -> Result<(), ListenerError> {
        *self
            .shared
            .accepting
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = false;

        let flush_loop = self
            .flush_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(FlushLoop { shutdown, handle }) = flush_loop else {
            return Ok(());
        };
        let _ = shutdown.send(true);

        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!(error = %e, "Batching resolver flush loop failed");
                Ok(())
            }
            Err(_) => Err(ListenerError::ShutdownTimedOut {
                component: "batching resolver",
                timeout,
            }),
        }
    }
}
