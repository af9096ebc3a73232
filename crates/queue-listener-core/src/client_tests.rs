//! Tests for queue client request types and queue resolution.

use super::*;

#[test]
fn test_receive_request_clamps_batch_size() {
    assert_eq!(ReceiveRequest::new(0, Duration::ZERO).max_messages, 1);
    assert_eq!(ReceiveRequest::new(4, Duration::ZERO).max_messages, 4);
    assert_eq!(
        ReceiveRequest::new(25, Duration::ZERO).max_messages,
        MAX_BATCH_SIZE
    );
}

#[test]
fn test_receive_request_clamps_wait_time() {
    let request = ReceiveRequest::new(1, Duration::from_secs(60));
    assert_eq!(request.wait_time, MAX_WAIT_TIME);

    let request = ReceiveRequest::new(1, Duration::from_millis(250));
    assert_eq!(request.wait_time, Duration::from_millis(250));
}

#[test]
fn test_receive_request_visibility_override() {
    let request = ReceiveRequest::new(10, Duration::from_secs(1));
    assert_eq!(request.visibility_timeout, None);

    let request = request.with_visibility_timeout(Duration::from_secs(30));
    assert_eq!(request.visibility_timeout, Some(Duration::from_secs(30)));
}

#[tokio::test]
async fn test_queue_url_is_used_without_lookup() {
    // No expectations: any call would fail the test
    let client = MockQueueClient::new();

    let queue = resolve_queue(&client, "https://sqs.eu-west-1.amazonaws.com/1234/orders")
        .await
        .unwrap();

    assert_eq!(
        queue.queue_url(),
        "https://sqs.eu-west-1.amazonaws.com/1234/orders"
    );
}

#[tokio::test]
async fn test_queue_name_is_looked_up_through_client() {
    let mut client = MockQueueClient::new();
    client
        .expect_get_queue_url()
        .withf(|name| name == "orders")
        .times(1)
        .returning(|_| Ok("http://localhost:4566/000000000000/orders".to_string()));

    let queue = resolve_queue(&client, "orders").await.unwrap();

    assert_eq!(queue.queue_url(), "http://localhost:4566/000000000000/orders");
}

#[tokio::test]
async fn test_unknown_queue_name_is_reported() {
    let mut client = MockQueueClient::new();
    client.expect_get_queue_url().returning(|name| {
        Err(QueueError::QueueNotFound {
            queue_url: name.to_string(),
        })
    });

    let result = resolve_queue(&client, "missing").await;

    assert!(matches!(
        result,
        Err(QueueError::QueueNotFound { ref queue_url }) if queue_url == "missing"
    ));
}
