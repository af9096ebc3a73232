//! Retriever that pools concurrent requests into shared receive calls.
//!
//! Every caller of [`BatchingMessageRetriever::retrieve_message`] registers a
//! pending request and waits on its own one-shot channel. A single trigger
//! loop watches the pending requests and issues a receive call when either
//!
//! - the number of waiting requests reaches the trigger threshold, or
//! - the oldest request has waited for the polling period.
//!
//! A receive that comes back empty holds off the next one until a polling
//! period has passed since it was issued, so a zero long-poll wait does not
//! spin against an empty queue.
//!
//! Received messages are handed to the waiting requests in arrival order.
//! Messages left over because their requester gave up are kept in a surplus
//! buffer and served to the next caller, until their visibility timeout has
//! run out.

use super::MessageRetriever;
use crate::client::{QueueClient, ReceiveRequest, MAX_BATCH_SIZE};
use crate::error::{ListenerError, RetrievalError};
use crate::message::{Message, QueueProperties};
use crate::properties::BatchingRetrieverProperties;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "batching_tests.rs"]
mod tests;

/// Batches message retrieval across all workers of a broker
pub struct BatchingMessageRetriever {
    shared: Arc<RetrieverShared>,
    trigger_loop: Mutex<Option<TriggerLoop>>,
}

struct TriggerLoop {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct PendingRequest {
    id: u64,
    arrived_at: Instant,
    sender: oneshot::Sender<SurplusMessage>,
}

struct SurplusMessage {
    message: Message,
    received_at: Instant,
}

#[derive(Default)]
struct RetrieverState {
    running: bool,
    next_id: u64,
    pending: VecDeque<PendingRequest>,
    surplus: VecDeque<SurplusMessage>,
}

impl RetrieverState {
    /// Hand a message to the oldest live request, or keep it as surplus
    fn dispatch(&mut self, message: Message, received_at: Instant) {
        let mut delivery = SurplusMessage {
            message,
            received_at,
        };
        while let Some(request) = self.pending.pop_front() {
            match request.sender.send(delivery) {
                Ok(()) => return,
                Err(returned) => delivery = returned,
            }
        }
        self.surplus.push_back(delivery);
    }

    fn withdraw(&mut self, id: u64) -> bool {
        match self.pending.iter().position(|request| request.id == id) {
            Some(index) => {
                self.pending.remove(index);
                true
            }
            None => false,
        }
    }
}

enum ReceiveOutcome {
    Received(usize),
    Failed,
    /// Shutdown was signalled while the call was running
    Shutdown,
}

struct RetrieverShared {
    queue: QueueProperties,
    client: Arc<dyn QueueClient>,
    properties: BatchingRetrieverProperties,
    state: Mutex<RetrieverState>,
    wakeup: Notify,
}

impl RetrieverShared {
    fn state(&self) -> MutexGuard<'_, RetrieverState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the freshest usable surplus message, discarding expired ones
    fn take_surplus(&self, state: &mut RetrieverState) -> Option<Message> {
        let visibility_timeout = self.properties.visibility_timeout();
        while let Some(surplus) = state.surplus.pop_front() {
            if surplus.received_at.elapsed() < visibility_timeout {
                return Some(surplus.message);
            }
            debug!(
                message_id = %surplus.message.message_id,
                "Discarding surplus message past its visibility timeout"
            );
        }
        None
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let threshold = self.properties.trigger_threshold();
        let polling_period = self.properties.polling_period();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let (waiting, oldest) = {
                let mut state = self.state();
                state.pending.retain(|request| !request.sender.is_closed());
                (
                    state.pending.len(),
                    state.pending.front().map(|request| request.arrived_at),
                )
            };

            let due = oldest.is_some_and(|arrived_at| arrived_at + polling_period <= Instant::now());
            if waiting > 0 && (waiting >= threshold || due) {
                let started = Instant::now();
                match self.receive_batch(waiting.min(MAX_BATCH_SIZE), &mut shutdown).await {
                    ReceiveOutcome::Shutdown => break,
                    // An empty queue is asked at most once per polling period
                    ReceiveOutcome::Received(0) => {
                        tokio::select! {
                            _ = tokio::time::sleep_until(started + polling_period) => {}
                            changed = shutdown.changed() => {
                                if changed.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    ReceiveOutcome::Received(_) | ReceiveOutcome::Failed => {}
                }
                continue;
            }

            let wakeup = self.wakeup.notified();
            match oldest {
                Some(arrived_at) => {
                    tokio::select! {
                        _ = wakeup => {}
                        _ = tokio::time::sleep_until(arrived_at + polling_period) => {}
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

        debug!(queue_url = %self.queue, "Batching retriever trigger loop exited");
    }

    /// Issue one receive call and dispatch the result.
    ///
    /// A failed call returns once its backoff has passed.
    async fn receive_batch(
        &self,
        wanted: usize,
        shutdown: &mut watch::Receiver<bool>,
    ) -> ReceiveOutcome {
        let request = ReceiveRequest::new(wanted, self.properties.receive_wait_time())
            .with_visibility_timeout(self.properties.visibility_timeout());

        debug!(queue_url = %self.queue, wanted = wanted, "Receiving batch of messages");

        let result = tokio::select! {
            result = self.client.receive_messages(&self.queue, request) => result,
            _ = shutdown.changed() => return ReceiveOutcome::Shutdown,
        };

        match result {
            Ok(messages) => {
                let received_at = Instant::now();
                debug!(
                    queue_url = %self.queue,
                    wanted = wanted,
                    received = messages.len(),
                    "Batch received"
                );

                let received = messages.len();
                let mut state = self.state();
                for message in messages {
                    state.dispatch(message, received_at);
                }
                ReceiveOutcome::Received(received)
            }
            Err(e) => {
                let backoff = self.properties.error_backoff_time();
                warn!(
                    queue_url = %self.queue,
                    error = %e,
                    backoff_ms = backoff.as_millis() as u64,
                    "Error receiving messages, backing off"
                );

                tokio::select! {
                    _ = tokio::time::sleep(backoff) => ReceiveOutcome::Failed,
                    _ = shutdown.changed() => ReceiveOutcome::Shutdown,
                }
            }
        }
    }
}

/// A caller's registered request and the receiving end of its hand-off.
///
/// Dropping it withdraws the request. A message that was already handed
/// over goes back to the front of the surplus buffer, so a caller that is
/// cancelled mid-wait never loses a received message.
struct PendingRetrieval<'a> {
    shared: &'a RetrieverShared,
    id: u64,
    receiver: oneshot::Receiver<SurplusMessage>,
    finished: bool,
}

impl PendingRetrieval<'_> {
    /// Withdraw the request, returning a message dispatched before withdrawal
    fn withdraw(&mut self) -> Option<SurplusMessage> {
        self.finished = true;
        let mut state = self.shared.state();
        state.withdraw(self.id);
        // Dispatch happens under the state lock, so nothing arrives after this
        self.receiver.try_recv().ok()
    }
}

impl Drop for PendingRetrieval<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Some(delivery) = self.withdraw() {
            debug!(
                message_id = %delivery.message.message_id,
                "Returning message of an abandoned request to the surplus buffer"
            );
            self.shared.state().surplus.push_front(delivery);
        }
    }
}

impl BatchingMessageRetriever {
    pub fn new(
        queue: QueueProperties,
        client: Arc<dyn QueueClient>,
        properties: BatchingRetrieverProperties,
    ) -> Self {
        Self {
            shared: Arc::new(RetrieverShared {
                queue,
                client,
                properties,
                state: Mutex::new(RetrieverState::default()),
                wakeup: Notify::new(),
            }),
            trigger_loop: Mutex::new(None),
        }
    }

    /// Number of callers currently waiting for a message
    pub fn pending_requests(&self) -> usize {
        self.shared.state().pending.len()
    }

    /// Number of received messages waiting for a caller
    pub fn surplus_messages(&self) -> usize {
        self.shared.state().surplus.len()
    }
}

#[async_trait]
impl MessageRetriever for BatchingMessageRetriever {
    async fn start(&self) {
        let mut trigger_loop = self
            .trigger_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if trigger_loop.is_some() {
            return;
        }

        self.shared.state().running = true;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(Arc::clone(&self.shared).run(shutdown_rx));
        *trigger_loop = Some(TriggerLoop { shutdown, handle });

        info!(queue_url = %self.shared.queue, "Batching retriever started");
    }

    async fn retrieve_message(&self, timeout: Duration) -> Result<Option<Message>, RetrievalError> {
        let (id, receiver) = {
            let mut state = self.shared.state();
            if let Some(message) = self.shared.take_surplus(&mut state) {
                return Ok(Some(message));
            }

            if !state.running {
                return Err(RetrievalError::NotRunning);
            }

            let id = state.next_id;
            state.next_id += 1;
            let (sender, receiver) = oneshot::channel();
            state.pending.push_back(PendingRequest {
                id,
                arrived_at: Instant::now(),
                sender,
            });
            (id, receiver)
        };

        let mut pending = PendingRetrieval {
            shared: &self.shared,
            id,
            receiver,
            finished: false,
        };
        self.shared.wakeup.notify_one();

        let received = tokio::time::timeout(timeout, &mut pending.receiver).await;
        match received {
            Ok(Ok(delivery)) => {
                pending.finished = true;
                Ok(Some(delivery.message))
            }
            // Sender dropped: the retriever was stopped
            Ok(Err(_)) => {
                pending.finished = true;
                Ok(None)
            }
            // A message dispatched just before the withdrawal still
            // belongs to this caller
            Err(_) => Ok(pending.withdraw().map(|delivery| delivery.message)),
        }
    }

    async fn stop(&self, timeout: Duration) -> Result<(), ListenerError> {
        self.shared.state().running = false;

        let trigger_loop = self
            .trigger_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let mut result = Ok(());
        if let Some(TriggerLoop { shutdown, handle }) = trigger_loop {
            let _ = shutdown.send(true);
            if tokio::time::timeout(timeout, handle).await.is_err() {
                result = Err(ListenerError::ShutdownTimedOut {
                    component: "batching retriever",
                    timeout,
                });
            }
        }

        let (released, surplus) = {
            let mut state = self.shared.state();
            let released = state.pending.len();
            state.pending.clear();
            let surplus = state.surplus.len();
            state.surplus.clear();
            (released, surplus)
        };

        if surplus > 0 {
            warn!(
                queue_url = %self.shared.queue,
                surplus = surplus,
                "Dropping undelivered messages; they reappear after their visibility timeout"
            );
        }

        info!(
            queue_url = %self.shared.queue,
            released_requests = released,
            "Batching retriever stopped"
        );

        result
    }
}
