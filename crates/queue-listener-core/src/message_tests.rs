//! Tests for message types.

use super::*;

mod queue_properties {
    use super::*;

    #[test]
    fn test_queue_properties_keep_url() {
        let queue = QueueProperties::new("https://sqs.local/000000000000/orders").unwrap();
        assert_eq!(queue.queue_url(), "https://sqs.local/000000000000/orders");
        assert_eq!(queue.to_string(), "https://sqs.local/000000000000/orders");
    }

    #[test]
    fn test_empty_queue_url_is_rejected() {
        let result = QueueProperties::new("  ");
        assert_eq!(
            result.unwrap_err(),
            ConfigurationError::Missing {
                key: "queue_url".to_string()
            }
        );
    }
}

mod identifiers {
    use super::*;

    #[test]
    fn test_generated_message_ids_are_unique() {
        let first = MessageId::generate();
        let second = MessageId::generate();
        assert_ne!(first, second);
        assert!(!first.as_str().is_empty());
    }

    #[test]
    fn test_receipt_handle_display() {
        let receipt = ReceiptHandle::new("receipt-1");
        assert_eq!(receipt.as_str(), "receipt-1");
        assert_eq!(receipt.to_string(), "receipt-1");
    }
}

mod messages {
    use super::*;

    #[test]
    fn test_new_message_defaults() {
        let message = Message::new(
            MessageId::new("id-1"),
            "my message",
            ReceiptHandle::new("receipt-1"),
        );

        assert_eq!(message.message_id.as_str(), "id-1");
        assert_eq!(message.body, "my message");
        assert_eq!(message.receive_count, 1);
        assert!(message.attributes.is_empty());
    }

    #[test]
    fn test_message_attributes() {
        let message = Message::new(MessageId::new("id"), "body", ReceiptHandle::new("r"))
            .with_attribute("tenant", "acme")
            .with_receive_count(3);

        assert_eq!(message.attribute("tenant"), Some("acme"));
        assert_eq!(message.attribute("missing"), None);
        assert_eq!(message.receive_count, 3);
    }
}
