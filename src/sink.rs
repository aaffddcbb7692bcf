//! The push side of the fanout: fire-and-forget publish to a topic.

use std::fmt;

use async_trait::async_trait;
use tracing::debug;

use crate::errors::FanoutError;
use crate::settings::MessageStructure;

/// Fully qualified topic address: region, owning account and topic name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicAddress {
    pub region: String,
    pub account_id: String,
    pub topic: String,
}

impl TopicAddress {
    pub fn new(
        region: impl Into<String>,
        account_id: impl Into<String>,
        topic: impl Into<String>,
    ) -> Self {
        TopicAddress {
            region: region.into(),
            account_id: account_id.into(),
            topic: topic.into(),
        }
    }

    /// The SNS topic ARN, `arn:aws:sns:<region>:<account>:<topic>`.
    pub fn arn(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TopicAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "arn:aws:sns:{}:{}:{}",
            self.region, self.account_id, self.topic
        )
    }
}

/// A serialized message ready for the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkMessage {
    pub structure: MessageStructure,
    pub body: String,
}

/// Backend acknowledgement of a publish.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReceipt {
    pub message_id: Option<String>,
}

/// Publishes serialized messages to a topic that fans out to its
/// subscribed queues.
#[async_trait]
pub trait TopicSink: Send + Sync {
    async fn publish(
        &self,
        topic: &TopicAddress,
        message: &SinkMessage,
    ) -> Result<PublishReceipt, FanoutError>;
}

/// [`TopicSink`] backed by AWS SNS.
pub struct SnsTopicSink {
    sns_client: aws_sdk_sns::Client,
}

impl SnsTopicSink {
    pub fn new(sns_client: aws_sdk_sns::Client) -> Self {
        SnsTopicSink { sns_client }
    }
}

#[async_trait]
impl TopicSink for SnsTopicSink {
    async fn publish(
        &self,
        topic: &TopicAddress,
        message: &SinkMessage,
    ) -> Result<PublishReceipt, FanoutError> {
        let output = self
            .sns_client
            .publish()
            .topic_arn(topic.arn())
            // SNS only knows "json"; a plain string body leaves it unset
            .set_message_structure(
                (message.structure == MessageStructure::Json)
                    .then(|| message.structure.as_str().to_string()),
            )
            .message(&message.body)
            .send()
            .await
            .map_err(|e| FanoutError::Publish {
                topic: topic.topic.clone(),
                source: Box::new(e),
            })?;

        debug!(topic = %topic, message_id = ?output.message_id(), "published message");
        Ok(PublishReceipt {
            message_id: output.message_id().map(str::to_string),
        })
    }
}
