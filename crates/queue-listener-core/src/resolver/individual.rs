//! Resolver that deletes every message with its own call.

use super::MessageResolver;
use crate::client::QueueClient;
use crate::error::ListenerError;
use crate::message::{Message, QueueProperties};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error};

#[cfg(test)]
#[path = "individual_tests.rs"]
mod tests;

/// Deletes each resolved message immediately with a single delete call.
///
/// Every call is spawned on its own task, so a slow or failed delete never
/// holds up resolution of the next message. Failures are logged and not
/// retried.
pub struct IndividualMessageResolver {
    queue: QueueProperties,
    client: Arc<dyn QueueClient>,
    in_flight: Arc<InFlightDeletes>,
}

/// Count of spawned deletes that have not completed yet
#[derive(Default)]
struct InFlightDeletes {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlightDeletes {
    fn begin(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn finish(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    async fn wait_idle(&self) {
        loop {
            let idle = self.idle.notified();
            if self.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            idle.await;
        }
    }
}

impl IndividualMessageResolver {
    pub fn new(queue: QueueProperties, client: Arc<dyn QueueClient>) -> Self {
        Self {
            queue,
            client,
            in_flight: Arc::new(InFlightDeletes::default()),
        }
    }

    /// Number of deletes that have been issued but not completed
    pub fn in_flight(&self) -> usize {
        self.in_flight.count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageResolver for IndividualMessageResolver {
    fn resolve_message(&self, message: Message) {
        let queue = self.queue.clone();
        let client = Arc::clone(&self.client);
        let in_flight = Arc::clone(&self.in_flight);

        in_flight.begin();
        tokio::spawn(async move {
            match client
                .delete_message(&queue, &message.receipt_handle)
                .await
            {
                Ok(()) => {
                    debug!(message_id = %message.message_id, "Message successfully deleted");
                }
                Err(e) => {
                    error!(
                        message_id = %message.message_id,
                        queue_url = %queue,
                        error = %e,
                        "Error deleting message"
                    );
                }
            }
            in_flight.finish();
        });
    }

    async fn stop(&self, timeout: Duration) -> Result<(), ListenerError> {
        tokio::time::timeout(timeout, self.in_flight.wait_idle())
            .await
            .map_err(|_| ListenerError::ShutdownTimedOut {
                component: "individual resolver",
                timeout,
            })
    }
}
