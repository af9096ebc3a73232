//! Shared fakes for unit tests.

use crate::client::{
    BatchEntryFailure, DeleteBatchEntry, DeleteBatchOutcome, QueueClient, ReceiveRequest,
};
use crate::error::{HandlerError, ListenerError, QueueError};
use crate::message::{Message, MessageId, QueueProperties, ReceiptHandle};
use crate::processor::MessageHandler;
use crate::resolver::MessageResolver;
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub(crate) fn queue() -> QueueProperties {
    QueueProperties::new("queueUrl").unwrap()
}

pub(crate) fn message(id: &str) -> Message {
    Message::new(
        MessageId::new(id),
        format!("body-{}", id),
        ReceiptHandle::new(format!("receipt-{}", id)),
    )
}

/// Scriptable in-process queue client that records every call
#[derive(Default)]
pub(crate) struct FakeQueueClient {
    available: Mutex<VecDeque<Message>>,
    receive_requests: Mutex<Vec<ReceiveRequest>>,
    receive_failures: AtomicUsize,
    receive_latency: Mutex<Duration>,
    deleted: Mutex<Vec<ReceiptHandle>>,
    delete_attempts: AtomicUsize,
    failing_receipts: Mutex<HashSet<String>>,
    batch_calls: Mutex<Vec<Vec<DeleteBatchEntry>>>,
    batch_call_failures: AtomicUsize,
}

impl FakeQueueClient {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_messages(ids: &[&str]) -> Self {
        let client = Self::new();
        for id in ids {
            client.push_message(message(id));
        }
        client
    }

    pub(crate) fn push_message(&self, message: Message) {
        self.available.lock().unwrap().push_back(message);
    }

    pub(crate) fn fail_next_receives(&self, count: usize) {
        self.receive_failures.store(count, Ordering::SeqCst);
    }

    pub(crate) fn set_receive_latency(&self, latency: Duration) {
        *self.receive_latency.lock().unwrap() = latency;
    }

    pub(crate) fn fail_deletes_for(&self, receipt: &str) {
        self.failing_receipts
            .lock()
            .unwrap()
            .insert(receipt.to_string());
    }

    pub(crate) fn fail_next_batch_calls(&self, count: usize) {
        self.batch_call_failures.store(count, Ordering::SeqCst);
    }

    pub(crate) fn receive_requests(&self) -> Vec<ReceiveRequest> {
        self.receive_requests.lock().unwrap().clone()
    }

    pub(crate) fn deleted(&self) -> Vec<String> {
        self.deleted
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.as_str().to_string())
            .collect()
    }

    pub(crate) fn delete_attempts(&self) -> usize {
        self.delete_attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn batch_calls(&self) -> Vec<Vec<DeleteBatchEntry>> {
        self.batch_calls.lock().unwrap().clone()
    }

    fn take_available(&self, max: usize) -> Vec<Message> {
        let mut available = self.available.lock().unwrap();
        let count = max.min(available.len());
        available.drain(..count).collect()
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl QueueClient for FakeQueueClient {
    async fn get_queue_url(&self, queue_name: &str) -> Result<String, QueueError> {
        Ok(format!("memory://{}", queue_name))
    }

    async fn receive_messages(
        &self,
        _queue: &QueueProperties,
        request: ReceiveRequest,
    ) -> Result<Vec<Message>, QueueError> {
        self.receive_requests.lock().unwrap().push(request.clone());

        let latency = *self.receive_latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if Self::take_failure(&self.receive_failures) {
            return Err(QueueError::ConnectionFailed {
                message: "receive refused".to_string(),
            });
        }

        let messages = self.take_available(request.max_messages);
        if messages.is_empty() && !request.wait_time.is_zero() {
            tokio::time::sleep(request.wait_time).await;
            return Ok(self.take_available(request.max_messages));
        }

        Ok(messages)
    }

    async fn delete_message(
        &self,
        _queue: &QueueProperties,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), QueueError> {
        self.delete_attempts.fetch_add(1, Ordering::SeqCst);

        if self
            .failing_receipts
            .lock()
            .unwrap()
            .contains(receipt_handle.as_str())
        {
            return Err(QueueError::ReceiptHandleInvalid {
                receipt: receipt_handle.to_string(),
            });
        }

        self.deleted.lock().unwrap().push(receipt_handle.clone());
        Ok(())
    }

    async fn delete_message_batch(
        &self,
        _queue: &QueueProperties,
        entries: Vec<DeleteBatchEntry>,
    ) -> Result<DeleteBatchOutcome, QueueError> {
        self.batch_calls.lock().unwrap().push(entries.clone());

        if Self::take_failure(&self.batch_call_failures) {
            return Err(QueueError::ConnectionFailed {
                message: "batch delete refused".to_string(),
            });
        }

        let failing = self.failing_receipts.lock().unwrap().clone();
        let mut outcome = DeleteBatchOutcome::default();
        for entry in entries {
            if failing.contains(entry.receipt_handle.as_str()) {
                outcome.failed.push(BatchEntryFailure {
                    id: entry.id,
                    code: "ReceiptHandleIsInvalid".to_string(),
                    message: "receipt handle is invalid".to_string(),
                });
            } else {
                self.deleted.lock().unwrap().push(entry.receipt_handle);
                outcome.successful.push(entry.id);
            }
        }

        Ok(outcome)
    }
}

/// Handler that records message ids and fails for configured bodies
#[derive(Default)]
pub(crate) struct RecordingHandler {
    handled: Mutex<Vec<String>>,
    failing_bodies: Mutex<HashSet<String>>,
    latency: Mutex<Duration>,
    panic_on: Mutex<Option<String>>,
}

impl RecordingHandler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_latency(latency: Duration) -> Self {
        let handler = Self::new();
        *handler.latency.lock().unwrap() = latency;
        handler
    }

    pub(crate) fn fail_on(&self, body: &str) {
        self.failing_bodies.lock().unwrap().insert(body.to_string());
    }

    pub(crate) fn panic_on(&self, body: &str) {
        *self.panic_on.lock().unwrap() = Some(body.to_string());
    }

    pub(crate) fn handled(&self) -> Vec<String> {
        self.handled.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        self.handled
            .lock()
            .unwrap()
            .push(message.message_id.as_str().to_string());

        let should_panic = self.panic_on.lock().unwrap().as_deref() == Some(message.body.as_str());
        if should_panic {
            panic!("handler panicked on {}", message.body);
        }

        if self.failing_bodies.lock().unwrap().contains(&message.body) {
            return Err(format!("handler rejected {}", message.body).into());
        }

        Ok(())
    }
}

/// Resolver that records the ids of resolved messages
#[derive(Default)]
pub(crate) struct RecordingResolver {
    resolved: Mutex<Vec<String>>,
    stopped: AtomicUsize,
}

impl RecordingResolver {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn resolved(&self) -> Vec<String> {
        self.resolved.lock().unwrap().clone()
    }

    pub(crate) fn stop_calls(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageResolver for RecordingResolver {
    fn resolve_message(&self, message: Message) {
        self.resolved
            .lock()
            .unwrap()
            .push(message.message_id.as_str().to_string());
    }

    async fn stop(&self, _timeout: Duration) -> Result<(), ListenerError> {
        self.stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
