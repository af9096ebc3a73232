//! Concurrent message broker.
//!
//! The broker owns a pool of workers. Each worker repeatedly asks the
//! retriever for a message and hands it to the processor. A supervisor task
//! re-reads the desired concurrency level from [`BrokerProperties`] on every
//! polling cycle and grows or shrinks the pool to match.
//!
//! Shrinking is graceful: a retired worker finishes the message it is working
//! on and then exits. Processing is never interrupted, not even by
//! [`ConcurrentMessageBroker::stop`].

use crate::error::ListenerError;
use crate::processor::MessageProcessor;
use crate::properties::BrokerProperties;
use crate::retriever::MessageRetriever;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[cfg(test)]
#[path = "broker_tests.rs"]
mod tests;

/// Shortest interval between two reads of the concurrency level
pub const MIN_CONCURRENCY_POLLING_RATE: Duration = Duration::from_millis(10);

/// Default time a worker waits for a message before asking again
pub const DEFAULT_RETRIEVAL_TIMEOUT: Duration = Duration::from_secs(20);

/// Lifecycle state of a broker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerState {
    Stopped,
    Running,
    Stopping,
}

/// Everything a worker needs, shared by all workers of one broker
#[derive(Clone)]
struct WorkerContext {
    retriever: Arc<dyn MessageRetriever>,
    processor: Arc<dyn MessageProcessor>,
    properties: Arc<dyn BrokerProperties>,
    retrieval_timeout: Duration,
    active_workers: Arc<AtomicUsize>,
}

struct Supervisor {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct Worker {
    id: usize,
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Runs a dynamically sized pool of retrieve-then-process workers
pub struct ConcurrentMessageBroker {
    context: WorkerContext,
    state: Mutex<BrokerState>,
    supervisor: Mutex<Option<Supervisor>>,
}

impl ConcurrentMessageBroker {
    pub fn new(
        retriever: Arc<dyn MessageRetriever>,
        processor: Arc<dyn MessageProcessor>,
        properties: Arc<dyn BrokerProperties>,
    ) -> Self {
        Self {
            context: WorkerContext {
                retriever,
                processor,
                properties,
                retrieval_timeout: DEFAULT_RETRIEVAL_TIMEOUT,
                active_workers: Arc::new(AtomicUsize::new(0)),
            },
            state: Mutex::new(BrokerState::Stopped),
            supervisor: Mutex::new(None),
        }
    }

    /// Set how long each worker waits for a message per retrieval
    pub fn with_retrieval_timeout(mut self, timeout: Duration) -> Self {
        self.context.retrieval_timeout = timeout;
        self
    }

    pub fn state(&self) -> BrokerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of workers currently in the pool, excluding retiring ones
    pub fn active_workers(&self) -> usize {
        self.context.active_workers.load(Ordering::SeqCst)
    }

    /// Start the supervisor. Starting a running broker does nothing.
    pub fn start(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != BrokerState::Stopped {
            debug!(state = ?*state, "Broker already started");
            return;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(supervise(self.context.clone(), shutdown_rx));
        *self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Supervisor { shutdown, handle });
        *state = BrokerState::Running;

        info!("Message broker started");
    }

    /// Stop all workers, waiting at most `timeout` for in-progress messages.
    ///
    /// Workers are never aborted. When the timeout expires, the broker reports
    /// [`ListenerError::ShutdownTimedOut`] and the remaining workers finish
    /// their current message in the background.
    pub async fn stop(&self, timeout: Duration) -> Result<(), ListenerError> {
        let supervisor = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state != BrokerState::Running {
                debug!(state = ?*state, "Broker is not running");
                return Ok(());
            }
            *state = BrokerState::Stopping;
            self.supervisor
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
        };

        let mut result = Ok(());
        if let Some(Supervisor { shutdown, handle }) = supervisor {
            let _ = shutdown.send(true);
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "Broker supervisor failed"),
                Err(_) => {
                    warn!(
                        timeout_ms = timeout.as_millis() as u64,
                        "Workers still processing after shutdown timeout"
                    );
                    result = Err(ListenerError::ShutdownTimedOut {
                        component: "message broker",
                        timeout,
                    });
                }
            }
        }

        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = BrokerState::Stopped;
        info!("Message broker stopped");
        result
    }
}

async fn supervise(context: WorkerContext, mut shutdown: watch::Receiver<bool>) {
    let mut workers: Vec<Worker> = Vec::new();
    let mut retiring: Vec<JoinHandle<()>> = Vec::new();
    let mut next_id = 0usize;

    loop {
        if *shutdown.borrow() {
            break;
        }

        retiring.retain(|handle| !handle.is_finished());
        workers.retain(|worker| {
            let alive = !worker.handle.is_finished();
            if !alive {
                warn!(worker_id = worker.id, "Worker exited unexpectedly");
            }
            alive
        });

        let desired = context.properties.concurrency_level();
        if workers.len() != desired {
            debug!(
                current = workers.len(),
                desired = desired,
                "Adjusting worker pool"
            );
        }

        while workers.len() < desired {
            let (stop, stop_rx) = watch::channel(false);
            let handle = tokio::spawn(run_worker(next_id, context.clone(), stop_rx));
            workers.push(Worker {
                id: next_id,
                stop,
                handle,
            });
            next_id += 1;
        }

        while workers.len() > desired {
            if let Some(worker) = workers.pop() {
                debug!(worker_id = worker.id, "Retiring worker");
                let _ = worker.stop.send(true);
                retiring.push(worker.handle);
            }
        }

        context
            .active_workers
            .store(workers.len(), Ordering::SeqCst);

        let polling_rate = context
            .properties
            .concurrency_polling_rate()
            .max(MIN_CONCURRENCY_POLLING_RATE);

        tokio::select! {
            _ = tokio::time::sleep(polling_rate) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    for worker in &workers {
        let _ = worker.stop.send(true);
    }
    context.active_workers.store(0, Ordering::SeqCst);

    let handles = workers
        .into_iter()
        .map(|worker| worker.handle)
        .chain(retiring);
    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "Worker task failed");
        }
    }
}

async fn run_worker(id: usize, context: WorkerContext, mut stop: watch::Receiver<bool>) {
    debug!(worker_id = id, "Worker started");

    loop {
        if *stop.borrow() {
            break;
        }

        let retrieved = tokio::select! {
            biased;
            _ = stop.changed() => break,
            retrieved = context.retriever.retrieve_message(context.retrieval_timeout) => retrieved,
        };

        match retrieved {
            Ok(Some(message)) => {
                let message_id = message.message_id.clone();
                let outcome = context.processor.process_message(message).await;
                debug!(worker_id = id, message_id = %message_id, outcome = ?outcome, "Message handled");
            }
            Ok(None) => {}
            Err(e) => {
                warn!(worker_id = id, error = %e, "Error retrieving message");
                match context.properties.error_backoff_time() {
                    Some(backoff) if !backoff.is_zero() => {
                        tokio::select! {
                            biased;
                            _ = stop.changed() => break,
                            _ = tokio::time::sleep(backoff) => {}
                        }
                    }
                    _ => tokio::task::yield_now().await,
                }
            }
        }
    }

    debug!(worker_id = id, "Worker stopped");
}
