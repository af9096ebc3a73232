//! Tests for the individual message resolver.

use super::*;
use crate::client::MockQueueClient;
use crate::error::QueueError;
use crate::test_support::{message, queue, FakeQueueClient};
use std::sync::Mutex;

#[tokio::test]
async fn test_delete_uses_queue_url_and_receipt_handle() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&calls);

    let mut client = MockQueueClient::new();
    client
        .expect_delete_message()
        .withf(|queue, receipt| queue.queue_url() == "queueUrl" && receipt.as_str() == "receipt-1")
        .times(1)
        .returning(move |queue, receipt| {
            recorded
                .lock()
                .unwrap()
                .push((queue.queue_url().to_string(), receipt.to_string()));
            Ok(())
        });

    let resolver = IndividualMessageResolver::new(queue(), Arc::new(client));
    resolver.resolve_message(message("1"));
    resolver.stop(Duration::from_secs(1)).await.unwrap();

    assert_eq!(
        *calls.lock().unwrap(),
        vec![("queueUrl".to_string(), "receipt-1".to_string())]
    );
}

#[tokio::test]
async fn test_failed_delete_does_not_block_later_messages() {
    let mut client = MockQueueClient::new();
    client
        .expect_delete_message()
        .withf(|_, receipt| receipt.as_str() == "receipt-1")
        .times(1)
        .returning(|_, receipt| {
            Err(QueueError::ReceiptHandleInvalid {
                receipt: receipt.to_string(),
            })
        });
    client
        .expect_delete_message()
        .withf(|_, receipt| receipt.as_str() == "receipt-2")
        .times(1)
        .returning(|_, _| Ok(()));

    let resolver = IndividualMessageResolver::new(queue(), Arc::new(client));
    resolver.resolve_message(message("1"));
    resolver.resolve_message(message("2"));

    assert!(resolver.stop(Duration::from_secs(1)).await.is_ok());
    assert_eq!(resolver.in_flight(), 0);
}

#[tokio::test]
async fn test_every_resolved_message_gets_one_delete() {
    let client = Arc::new(FakeQueueClient::new());
    client.fail_deletes_for("receipt-b");

    let resolver = IndividualMessageResolver::new(queue(), client.clone());
    for id in ["a", "b", "c"] {
        resolver.resolve_message(message(id));
    }
    resolver.stop(Duration::from_secs(1)).await.unwrap();

    assert_eq!(client.delete_attempts(), 3);
    let mut deleted = client.deleted();
    deleted.sort();
    assert_eq!(deleted, vec!["receipt-a", "receipt-c"]);
}

#[tokio::test]
async fn test_stop_with_nothing_in_flight_returns_immediately() {
    let client = Arc::new(FakeQueueClient::new());
    let resolver = IndividualMessageResolver::new(queue(), client.clone());

    assert!(resolver.stop(Duration::ZERO).await.is_ok());
    assert_eq!(client.delete_attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_times_out_while_delete_outstanding() {
    let resolver = IndividualMessageResolver::new(queue(), Arc::new(FakeQueueClient::new()));
    resolver.in_flight.begin();

    let result = resolver.stop(Duration::from_millis(50)).await;
    assert!(matches!(
        result,
        Err(ListenerError::ShutdownTimedOut {
            component: "individual resolver",
            ..
        })
    ));

    resolver.in_flight.finish();
    assert!(resolver.stop(Duration::from_millis(50)).await.is_ok());
}
