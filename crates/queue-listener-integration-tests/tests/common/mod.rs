//! Common test utilities for queue-listener integration tests
//!
//! This module provides:
//! - A scriptable message handler that records every invocation
//! - A queue client wrapper that records the shape of every call
//! - Helpers for creating in-memory queues and waiting on conditions

use async_trait::async_trait;
use queue_listener_core::{
    DeleteBatchEntry, DeleteBatchOutcome, HandlerError, InMemoryQueueService, Message,
    MessageHandler, QueueClient, QueueError, QueueProperties, QueueSettings, ReceiptHandle,
    ReceiveRequest,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

// ============================================================================
// Queues
// ============================================================================

/// Visibility timeout used by the end-to-end scenarios
#[allow(dead_code)]
pub const VISIBILITY_TIMEOUT: Duration = Duration::from_secs(2);

/// Create a service with one queue
pub fn create_queue(name: &str, settings: QueueSettings) -> (InMemoryQueueService, QueueProperties) {
    let service = InMemoryQueueService::new();
    let queue = QueueProperties::new(format!("memory://{}", name)).unwrap();
    service.create_queue(&queue, settings);
    (service, queue)
}

/// Poll `condition` every 10ms until it holds or `timeout` passes
#[allow(dead_code)]
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

// ============================================================================
// Scripted Handler
// ============================================================================

/// What the handler does with each invocation
#[derive(Debug, Clone, Copy)]
#[allow(dead_code)]
pub enum HandlerBehavior {
    Succeed,
    /// Fail the first `n` invocations, then succeed
    FailFirst(usize),
    AlwaysFail,
}

/// One handler invocation
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct Invocation {
    pub body: String,
    pub receive_count: u32,
    pub at: Instant,
}

/// Handler that follows a [`HandlerBehavior`] and records every invocation
#[derive(Clone)]
pub struct ScriptedHandler {
    behavior: HandlerBehavior,
    processing_time: Duration,
    invocations: Arc<Mutex<Vec<Invocation>>>,
    completed: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl ScriptedHandler {
    pub fn new(behavior: HandlerBehavior) -> Self {
        Self {
            behavior,
            processing_time: Duration::ZERO,
            invocations: Arc::new(Mutex::new(Vec::new())),
            completed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(HandlerBehavior::Succeed)
    }

    /// Make each invocation take `processing_time` before it returns
    pub fn with_processing_time(mut self, processing_time: Duration) -> Self {
        self.processing_time = processing_time;
        self
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.lock().unwrap().len()
    }

    pub fn bodies(&self) -> Vec<String> {
        self.invocations().into_iter().map(|i| i.body).collect()
    }

    /// Invocations that ran to the end, successfully or not
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageHandler for ScriptedHandler {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        let invocation = {
            let mut invocations = self.invocations.lock().unwrap();
            invocations.push(Invocation {
                body: message.body.clone(),
                receive_count: message.receive_count,
                at: Instant::now(),
            });
            invocations.len()
        };

        if !self.processing_time.is_zero() {
            tokio::time::sleep(self.processing_time).await;
        }
        self.completed.fetch_add(1, Ordering::SeqCst);

        let fail = match self.behavior {
            HandlerBehavior::Succeed => false,
            HandlerBehavior::FailFirst(n) => invocation <= n,
            HandlerBehavior::AlwaysFail => true,
        };

        if fail {
            Err(format!("handler failed on invocation {}", invocation).into())
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// Recording Client
// ============================================================================

/// Queue client that forwards to another client and records call shapes
pub struct RecordingClient {
    inner: Arc<dyn QueueClient>,
    receive_sizes: Mutex<Vec<usize>>,
    batch_delete_sizes: Mutex<Vec<usize>>,
    single_deletes: AtomicUsize,
}

#[allow(dead_code)]
impl RecordingClient {
    pub fn new(inner: Arc<dyn QueueClient>) -> Self {
        Self {
            inner,
            receive_sizes: Mutex::new(Vec::new()),
            batch_delete_sizes: Mutex::new(Vec::new()),
            single_deletes: AtomicUsize::new(0),
        }
    }

    /// `max_messages` of every receive call
    pub fn receive_sizes(&self) -> Vec<usize> {
        self.receive_sizes.lock().unwrap().clone()
    }

    pub fn receive_calls(&self) -> usize {
        self.receive_sizes.lock().unwrap().len()
    }

    /// Entry count of every batch delete call
    pub fn batch_delete_sizes(&self) -> Vec<usize> {
        self.batch_delete_sizes.lock().unwrap().clone()
    }

    pub fn single_deletes(&self) -> usize {
        self.single_deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueueClient for RecordingClient {
    async fn get_queue_url(&self, queue_name: &str) -> Result<String, QueueError> {
        self.inner.get_queue_url(queue_name).await
    }

    async fn receive_messages(
        &self,
        queue: &QueueProperties,
        request: ReceiveRequest,
    ) -> Result<Vec<Message>, QueueError> {
        self.receive_sizes
            .lock()
            .unwrap()
            .push(request.max_messages);
        self.inner.receive_messages(queue, request).await
    }

    async fn delete_message(
        &self,
        queue: &QueueProperties,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), QueueError> {
        self.single_deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_message(queue, receipt_handle).await
    }

    async fn delete_message_batch(
        &self,
        queue: &QueueProperties,
        entries: Vec<DeleteBatchEntry>,
    ) -> Result<DeleteBatchOutcome, QueueError> {
        self.batch_delete_sizes.lock().unwrap().push(entries.len());
        self.inner.delete_message_batch(queue, entries).await
    }
}
