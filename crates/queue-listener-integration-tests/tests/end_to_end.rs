//! End-to-end delivery scenarios against the in-memory queue service.
//!
//! All tests run with paused time, so visibility timeouts elapse
//! deterministically.

mod common;

use common::{create_queue, wait_until, HandlerBehavior, RecordingClient, ScriptedHandler, VISIBILITY_TIMEOUT};
use queue_listener_core::{
    InMemoryQueueService, ListenerBuilder, QueueCounts, QueueProperties, QueueSettings,
    SimpleMessageListenerContainer, StaticBrokerProperties,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;

fn settings(max_receive_count: Option<u32>) -> QueueSettings {
    QueueSettings {
        visibility_timeout: VISIBILITY_TIMEOUT,
        max_receive_count,
    }
}

fn listener(
    service: &InMemoryQueueService,
    queue: &QueueProperties,
    handler: &ScriptedHandler,
) -> SimpleMessageListenerContainer {
    ListenerBuilder::new(
        "end-to-end",
        queue.clone(),
        Arc::new(service.clone()),
        Arc::new(handler.clone()),
    )
    .with_retrieval_timeout(Duration::from_secs(1))
    .build()
}

fn is_empty(service: &InMemoryQueueService, queue: &QueueProperties) -> bool {
    service.message_counts(queue).unwrap() == QueueCounts::default()
}

#[tokio::test(start_paused = true)]
async fn test_message_is_handled_once_and_deleted() {
    let (service, queue) = create_queue("single", settings(None));
    service.send_message(&queue, "my message").unwrap();

    let handler = ScriptedHandler::succeeding();
    let listener = listener(&service, &queue, &handler);
    listener.start().await;

    assert!(wait_until(Duration::from_secs(5), || is_empty(&service, &queue)).await);

    // Past the visibility timeout nothing comes back
    tokio::time::sleep(VISIBILITY_TIMEOUT * 2).await;
    assert_ok!(listener.stop(Duration::from_secs(5)).await);

    assert_eq!(handler.bodies(), vec!["my message".to_string()]);
    assert_eq!(handler.invocations()[0].receive_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_message_is_redelivered_after_visibility_timeout() {
    let (service, queue) = create_queue("redelivery", settings(None));
    service.send_message(&queue, "retry me").unwrap();

    let handler = ScriptedHandler::new(HandlerBehavior::FailFirst(1));
    let listener = listener(&service, &queue, &handler);
    listener.start().await;

    assert!(wait_until(Duration::from_secs(1), || handler.invocation_count() == 1).await);
    assert_eq!(
        service.message_counts(&queue).unwrap(),
        QueueCounts {
            visible: 0,
            in_flight: 1
        }
    );

    assert!(wait_until(VISIBILITY_TIMEOUT * 2, || handler.invocation_count() == 2).await);
    assert!(wait_until(Duration::from_secs(1), || is_empty(&service, &queue)).await);

    tokio::time::sleep(VISIBILITY_TIMEOUT * 2).await;
    assert_ok!(listener.stop(Duration::from_secs(5)).await);

    let invocations = handler.invocations();
    assert_eq!(invocations.len(), 2);
    assert_eq!(invocations[1].receive_count, 2);

    let gap = invocations[1].at - invocations[0].at;
    assert!(gap >= VISIBILITY_TIMEOUT, "redelivered after {:?}", gap);
    assert!(gap < VISIBILITY_TIMEOUT + Duration::from_secs(1), "redelivered after {:?}", gap);
}

#[tokio::test(start_paused = true)]
async fn test_always_failing_message_ends_in_dead_letter_queue() {
    let (service, queue) = create_queue("poison", settings(Some(3)));
    let dead_letter = service.dead_letter_queue(&queue).unwrap();
    service.send_message(&queue, "poison").unwrap();

    let handler = ScriptedHandler::new(HandlerBehavior::AlwaysFail);
    let listener = listener(&service, &queue, &handler);
    listener.start().await;

    tokio::time::sleep(VISIBILITY_TIMEOUT * 4 + Duration::from_millis(500)).await;
    assert_ok!(listener.stop(Duration::from_secs(5)).await);

    assert_eq!(service.message_counts(&queue).unwrap(), QueueCounts::default());
    assert_eq!(
        service.message_counts(&dead_letter).unwrap(),
        QueueCounts {
            visible: 1,
            in_flight: 0
        }
    );

    let receive_counts: Vec<u32> = handler
        .invocations()
        .iter()
        .map(|i| i.receive_count)
        .collect();
    assert_eq!(receive_counts, vec![1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_workers_handle_each_message_once() {
    let (service, queue) = create_queue("concurrent", settings(None));
    let mut expected = Vec::new();
    for i in 0..20 {
        let body = format!("message-{:02}", i);
        service.send_message(&queue, body.clone()).unwrap();
        expected.push(body);
    }

    let client = Arc::new(RecordingClient::new(Arc::new(service.clone())));
    let handler = ScriptedHandler::succeeding().with_processing_time(Duration::from_millis(100));
    let listener = ListenerBuilder::new(
        "concurrent",
        queue.clone(),
        client.clone(),
        Arc::new(handler.clone()),
    )
    .with_broker_properties(Arc::new(StaticBrokerProperties::new(4)))
    .with_retrieval_timeout(Duration::from_secs(1))
    .build();

    listener.start().await;
    assert!(wait_until(Duration::from_secs(5), || is_empty(&service, &queue)).await);
    assert_ok!(listener.stop(Duration::from_secs(5)).await);

    let mut bodies = handler.bodies();
    bodies.sort();
    assert_eq!(bodies, expected);
    assert_eq!(client.single_deletes(), 20);
}
