//! The pull side of the fanout: a durable queue that is polled, processed
//! and acknowledged.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::errors::FanoutError;
use crate::receiver::config::PollConfig;

/// Resolved reference to a queue (for SQS, its URL).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueHandle(Arc<str>);

impl QueueHandle {
    pub fn new(handle: impl Into<Arc<str>>) -> Self {
        QueueHandle(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One delivery of a message, as received from the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Backend-assigned identity, used to drop duplicates within a batch.
    pub message_id: Option<String>,
    /// Token tied to this delivery; needed to delete the message.
    pub receipt_token: String,
    pub body: String,
}

/// Operations the polling consumer needs from a queue backend.
#[async_trait]
pub trait QueueSource: Send + Sync {
    /// Resolves a queue name to a handle.
    async fn resolve(&self, queue_name: &str) -> Result<QueueHandle, FanoutError>;

    /// Receives up to `config.max_number_of_messages` messages, hiding them
    /// for `config.visibility_timeout` seconds and long-polling for up to
    /// `config.wait_time_seconds`.
    async fn receive_batch(
        &self,
        queue: &QueueHandle,
        config: &PollConfig,
    ) -> Result<Vec<RawMessage>, FanoutError>;

    /// Deletes one delivery from the queue.
    async fn delete(&self, queue: &QueueHandle, receipt_token: &str) -> Result<(), FanoutError>;
}

/// [`QueueSource`] backed by AWS SQS.
///
/// Queue URLs are looked up once per name and cached for the lifetime of
/// the source.
pub struct SqsQueueSource {
    sqs_client: aws_sdk_sqs::Client,
    queue_owner_account_id: Option<String>,
    queue_urls: RwLock<HashMap<String, QueueHandle>>,
}

impl SqsQueueSource {
    /// `queue_owner_account_id` is needed for queues owned by another
    /// account; `None` resolves names in the caller's account.
    pub fn new(sqs_client: aws_sdk_sqs::Client, queue_owner_account_id: Option<String>) -> Self {
        SqsQueueSource {
            sqs_client,
            queue_owner_account_id,
            queue_urls: RwLock::new(HashMap::new()),
        }
    }

    fn cached(&self, queue_name: &str) -> Option<QueueHandle> {
        self.queue_urls
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(queue_name)
            .cloned()
    }
}

#[async_trait]
impl QueueSource for SqsQueueSource {
    async fn resolve(&self, queue_name: &str) -> Result<QueueHandle, FanoutError> {
        if let Some(handle) = self.cached(queue_name) {
            return Ok(handle);
        }

        let output = self
            .sqs_client
            .get_queue_url()
            .queue_name(queue_name)
            .set_queue_owner_aws_account_id(self.queue_owner_account_id.clone())
            .send()
            .await
            .map_err(|e| FanoutError::Resolution {
                name: queue_name.to_string(),
                source: Box::new(e),
            })?;

        let url = output.queue_url().ok_or_else(|| FanoutError::Resolution {
            name: queue_name.to_string(),
            source: "GetQueueUrl returned no queue URL".into(),
        })?;
        let handle = QueueHandle::new(url);
        debug!(queue = queue_name, url, "resolved queue url");

        self.queue_urls
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(queue_name.to_string(), handle.clone());
        Ok(handle)
    }

    async fn receive_batch(
        &self,
        queue: &QueueHandle,
        config: &PollConfig,
    ) -> Result<Vec<RawMessage>, FanoutError> {
        let output = self
            .sqs_client
            .receive_message()
            .queue_url(queue.as_str())
            .max_number_of_messages(config.max_number_of_messages)
            .visibility_timeout(config.visibility_timeout)
            .wait_time_seconds(config.wait_time_seconds)
            .send()
            .await
            .map_err(|e| FanoutError::Receive {
                queue: queue.to_string(),
                source: Box::new(e),
            })?;

        let mut batch = Vec::with_capacity(output.messages().len());
        for message in output.messages() {
            let Some(receipt_handle) = message.receipt_handle() else {
                warn!(
                    queue = %queue,
                    message_id = ?message.message_id(),
                    "received a message without a receipt handle; skipping"
                );
                continue;
            };
            batch.push(RawMessage {
                message_id: message.message_id().map(str::to_string),
                receipt_token: receipt_handle.to_string(),
                body: message.body().unwrap_or_default().to_string(),
            });
        }
        Ok(batch)
    }

    async fn delete(&self, queue: &QueueHandle, receipt_token: &str) -> Result<(), FanoutError> {
        self.sqs_client
            .delete_message()
            .queue_url(queue.as_str())
            .receipt_handle(receipt_token)
            .send()
            .await
            .map_err(|e| FanoutError::Ack {
                queue: queue.to_string(),
                source: Box::new(e),
            })?;
        Ok(())
    }
}
