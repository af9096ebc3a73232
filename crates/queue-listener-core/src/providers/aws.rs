//! AWS SQS provider implementation.
//!
//! Implements [`QueueClient`] on top of the official `aws-sdk-sqs` client.
//! Receives request the `ApproximateReceiveCount` system attribute, which
//! becomes [`Message::receive_count`], and all custom message attributes with
//! a string value.
//!
//! # Example
//!
//! ```no_run
//! use queue_listener_core::providers::SqsQueueClient;
//!
//! # async fn example() {
//! // Point at LocalStack instead of AWS
//! let client = SqsQueueClient::from_env(
//!     Some("us-east-1".to_string()),
//!     Some("http://localhost:4566".to_string()),
//! )
//! .await;
//! # }
//! ```

use crate::client::{
    BatchEntryFailure, DeleteBatchEntry, DeleteBatchOutcome, QueueClient, ReceiveRequest,
    MAX_BATCH_SIZE,
};
use crate::error::QueueError;
use crate::message::{Message, MessageId, QueueProperties, ReceiptHandle};
use async_trait::async_trait;
use aws_sdk_sqs::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_sqs::types::{DeleteMessageBatchRequestEntry, MessageSystemAttributeName};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "aws_tests.rs"]
mod tests;

const PROVIDER: &str = "aws-sqs";

/// Whole seconds for the API, rounding any fraction up
fn whole_seconds(duration: Duration) -> i32 {
    let seconds = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    i32::try_from(seconds).unwrap_or(i32::MAX)
}

/// Map an SDK error to a [`QueueError`], keeping the service error code
fn map_sdk_error<E, R>(error: SdkError<E, R>, queue: &str) -> QueueError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: fmt::Debug + Send + Sync + 'static,
{
    match &error {
        SdkError::TimeoutError(_) => {
            return QueueError::ConnectionFailed {
                message: format!("request timed out: {}", DisplayErrorContext(&error)),
            }
        }
        SdkError::DispatchFailure(_) => {
            return QueueError::ConnectionFailed {
                message: DisplayErrorContext(&error).to_string(),
            }
        }
        _ => {}
    }

    let code = error.code().unwrap_or("Unknown").to_string();
    let message = error
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| DisplayErrorContext(&error).to_string());

    classify_error_code(&code, message, queue)
}

fn classify_error_code(code: &str, message: String, queue: &str) -> QueueError {
    match code {
        "AWS.SimpleQueueService.NonExistentQueue" | "QueueDoesNotExist" => {
            QueueError::QueueNotFound {
                queue_url: queue.to_string(),
            }
        }
        "ReceiptHandleIsInvalid" | "InvalidReceiptHandle" => {
            QueueError::ReceiptHandleInvalid { receipt: message }
        }
        "AWS.SimpleQueueService.TooManyEntriesInBatchRequest" | "TooManyEntriesInBatchRequest" => {
            QueueError::BatchTooLarge {
                size: MAX_BATCH_SIZE + 1,
                max_size: MAX_BATCH_SIZE,
            }
        }
        _ => QueueError::ProviderError {
            provider: PROVIDER.to_string(),
            code: code.to_string(),
            message,
        },
    }
}

/// Convert an SQS message, skipping messages without id or receipt handle
fn convert_message(message: aws_sdk_sqs::types::Message) -> Option<Message> {
    let message_id = message.message_id()?.to_string();
    let receipt_handle = message.receipt_handle()?.to_string();

    let receive_count = message
        .attributes()
        .and_then(|attrs| attrs.get(&MessageSystemAttributeName::ApproximateReceiveCount))
        .and_then(|count| count.parse::<u32>().ok())
        .unwrap_or(1);

    let mut converted = Message::new(
        MessageId::new(message_id),
        message.body().unwrap_or_default(),
        ReceiptHandle::new(receipt_handle),
    )
    .with_receive_count(receive_count);

    if let Some(attributes) = message.message_attributes() {
        for (name, value) in attributes {
            if let Some(text) = value.string_value() {
                converted.attributes.insert(name.clone(), text.to_string());
            }
        }
    }

    Some(converted)
}

/// Queue client backed by AWS SQS (or an SQS-compatible endpoint)
#[derive(Clone)]
pub struct SqsQueueClient {
    client: aws_sdk_sqs::Client,
}

impl SqsQueueClient {
    pub fn new(client: aws_sdk_sqs::Client) -> Self {
        Self { client }
    }

    /// Build a client from the standard AWS environment (credentials,
    /// region, profile), optionally overriding the region and endpoint URL.
    pub async fn from_env(region: Option<String>, endpoint_url: Option<String>) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        if let Some(endpoint_url) = endpoint_url {
            loader = loader.endpoint_url(endpoint_url);
        }
        let config = loader.load().await;

        Self::new(aws_sdk_sqs::Client::new(&config))
    }
}

impl fmt::Debug for SqsQueueClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqsQueueClient").finish_non_exhaustive()
    }
}

#[async_trait]
impl QueueClient for SqsQueueClient {
    async fn get_queue_url(&self, queue_name: &str) -> Result<String, QueueError> {
        let output = self
            .client
            .get_queue_url()
            .queue_name(queue_name)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, queue_name))?;

        let queue_url = output.queue_url.ok_or_else(|| QueueError::QueueNotFound {
            queue_url: queue_name.to_string(),
        })?;
        debug!(queue_name = queue_name, queue_url = %queue_url, "Resolved queue URL");
        Ok(queue_url)
    }

    async fn receive_messages(
        &self,
        queue: &QueueProperties,
        request: ReceiveRequest,
    ) -> Result<Vec<Message>, QueueError> {
        let mut call = self
            .client
            .receive_message()
            .queue_url(queue.queue_url())
            .max_number_of_messages(request.max_messages as i32)
            .wait_time_seconds(request.wait_time.as_secs() as i32)
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
            .message_attribute_names("All");

        if let Some(visibility_timeout) = request.visibility_timeout {
            call = call.visibility_timeout(whole_seconds(visibility_timeout));
        }

        let output = call.send().await.map_err(|e| map_sdk_error(e, queue.queue_url()))?;

        let messages: Vec<Message> = output
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(convert_message)
            .collect();

        debug!(
            queue_url = %queue,
            received = messages.len(),
            "Received messages from SQS"
        );

        Ok(messages)
    }

    async fn delete_message(
        &self,
        queue: &QueueProperties,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(queue.queue_url())
            .receipt_handle(receipt_handle.as_str())
            .send()
            .await
            .map_err(|e| map_sdk_error(e, queue.queue_url()))?;

        Ok(())
    }

    async fn delete_message_batch(
        &self,
        queue: &QueueProperties,
        entries: Vec<DeleteBatchEntry>,
    ) -> Result<DeleteBatchOutcome, QueueError> {
        if entries.len() > MAX_BATCH_SIZE {
            return Err(QueueError::BatchTooLarge {
                size: entries.len(),
                max_size: MAX_BATCH_SIZE,
            });
        }

        let request_entries = entries
            .iter()
            .map(|entry| {
                DeleteMessageBatchRequestEntry::builder()
                    .id(entry.id.as_str())
                    .receipt_handle(entry.receipt_handle.as_str())
                    .build()
                    .map_err(|e| QueueError::ProviderError {
                        provider: PROVIDER.to_string(),
                        code: "InvalidBatchEntry".to_string(),
                        message: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let output = self
            .client
            .delete_message_batch()
            .queue_url(queue.queue_url())
            .set_entries(Some(request_entries))
            .send()
            .await
            .map_err(|e| map_sdk_error(e, queue.queue_url()))?;

        let outcome = DeleteBatchOutcome {
            successful: output
                .successful()
                .iter()
                .map(|entry| entry.id().to_string())
                .collect(),
            failed: output
                .failed()
                .iter()
                .map(|entry| BatchEntryFailure {
                    id: entry.id().to_string(),
                    code: entry.code().to_string(),
                    message: entry.message().unwrap_or("unknown").to_string(),
                })
                .collect(),
        };

        if !outcome.failed.is_empty() {
            warn!(
                queue_url = %queue,
                failed = outcome.failed.len(),
                "SQS rejected some batch delete entries"
            );
        }

        Ok(outcome)
    }
}
