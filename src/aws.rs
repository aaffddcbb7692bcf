//! Fanout over SNS topics and the SQS queues subscribed to them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::client::{create_sns_client, create_sqs_client};
use crate::errors::FanoutError;
use crate::fanout::{FanoutStrategy, ListenHandle};
use crate::receiver::PollingConsumer;
use crate::receiver::functions::MessageHandler;
use crate::registry::{ListenerRegistry, Listeners};
use crate::settings::{FanoutConfig, MessageStructure};
use crate::sink::{PublishReceipt, SinkMessage, SnsTopicSink, TopicAddress, TopicSink};
use crate::source::{QueueSource, SqsQueueSource};

/// SNS notification body carrying one copy of the payload per protocol.
#[derive(Serialize)]
struct PublishEnvelope<'a> {
    default: &'a str,
    sqs: &'a str,
}

/// Publishes through a topic sink and consumes through a queue source.
///
/// Every queue gets its own poll loop; all loops share one handler
/// registry, so registering a handler again for a queue that is already
/// being polled swaps the handler without starting a second loop.
pub struct AwsStrategy {
    config: FanoutConfig,
    source: Arc<dyn QueueSource>,
    sink: Arc<dyn TopicSink>,
    registry: Arc<ListenerRegistry>,
    polling: Arc<Mutex<Polling>>,
    next_lease: AtomicU64,
}

/// Queues with a live poll loop, each tagged with the lease that started it.
type Polling = HashMap<String, u64>;

impl AwsStrategy {
    /// Creates a strategy over already constructed backends.
    ///
    /// # Arguments
    ///
    /// * `config` - Fanout configuration; the `sns` block is validated on
    ///   every publish and the `sqs` block on every listen
    /// * `source` - Queue source the poll loops receive from and delete on
    /// * `sink` - Topic sink publishes are sent to
    ///
    /// # Returns
    ///
    /// Returns an `AwsStrategy` with an empty listener registry and no
    /// running loops.
    pub fn new(config: FanoutConfig, source: Arc<dyn QueueSource>, sink: Arc<dyn TopicSink>) -> Self {
        AwsStrategy {
            config,
            source,
            sink,
            registry: Arc::new(ListenerRegistry::new()),
            polling: Arc::new(Mutex::new(HashMap::new())),
            next_lease: AtomicU64::new(0),
        }
    }

    /// Builds SQS and SNS clients from `config` and wraps them.
    pub async fn connect(config: FanoutConfig) -> Result<Self, FanoutError> {
        let credentials = config.credentials()?;
        let sqs = config.sqs.as_ref();
        let sns = config.sns.as_ref();

        let sqs_client = create_sqs_client(
            credentials.as_ref(),
            sqs.and_then(|o| o.region.as_deref()),
        )
        .await?;
        let sns_client = create_sns_client(
            credentials.as_ref(),
            sns.and_then(|o| o.region.as_deref()),
        )
        .await?;

        let source = SqsQueueSource::new(
            sqs_client,
            sqs.and_then(|o| o.queue_owner_account_id.clone()),
        );
        let sink = SnsTopicSink::new(sns_client);
        Ok(AwsStrategy::new(config, Arc::new(source), Arc::new(sink)))
    }

    fn polling_guard(&self, name: &str, lease: u64) -> PollingGuard {
        PollingGuard {
            name: name.to_string(),
            lease,
            polling: Arc::clone(&self.polling),
        }
    }
}

#[async_trait]
impl FanoutStrategy for AwsStrategy {
    async fn publish(&self, topic_name: &str, data: Value) -> Result<PublishReceipt, FanoutError> {
        let settings = self.config.sns_settings()?;

        let data = match data {
            Value::Null => Value::Object(Map::new()),
            data => data,
        };
        let serialized = serde_json::to_string(&data)?;
        let body = match settings.message_structure {
            MessageStructure::Json => serde_json::to_string(&PublishEnvelope {
                default: &serialized,
                sqs: &serialized,
            })?,
            MessageStructure::String => serialized,
        };

        let topic = TopicAddress::new(
            settings.region,
            settings.topic_owner_account_id,
            topic_name,
        );
        debug!(topic = %topic, "publishing message");
        self.sink
            .publish(
                &topic,
                &SinkMessage {
                    structure: settings.message_structure,
                    body,
                },
            )
            .await
    }

    async fn listen(&self, listeners: Listeners) -> Result<ListenHandle, FanoutError> {
        let settings = self.config.sqs_settings()?;
        if listeners.is_empty() {
            return Ok(ListenHandle::new());
        }

        // resolve everything first so a bad name starts nothing
        let mut resolved = Vec::new();
        for name in listeners.names() {
            let already_polled = lock(&self.polling).contains_key(name);
            if already_polled {
                debug!(queue = name, "queue already polled; replacing its handler");
                continue;
            }
            let queue = self
                .source
                .resolve(name)
                .await
                .map_err(|source| FanoutError::Listener {
                    queue: name.to_string(),
                    source: Box::new(source),
                })?;
            resolved.push((name.to_string(), queue));
        }

        self.registry.register(listeners);

        let mut handle = ListenHandle::new();
        for (name, queue) in resolved {
            let lease = self.next_lease.fetch_add(1, Ordering::Relaxed);
            {
                let mut polling = lock(&self.polling);
                if polling.contains_key(&name) {
                    continue;
                }
                polling.insert(name.clone(), lease);
            }
            // released by whichever ends first: the loop or the handle
            handle.hold(self.polling_guard(&name, lease));
            let guard = self.polling_guard(&name, lease);
            let consumer = PollingConsumer::new(
                name.as_str(),
                queue,
                Arc::clone(&self.source),
                Arc::clone(&self.registry),
                settings.poll.clone(),
            );
            let stop = handle.shutdown_signal();
            handle.spawn(name, async move {
                let _guard = guard;
                consumer.run_until(stop).await
            });
        }

        info!(queues = ?handle.queues(), "listening");
        Ok(handle)
    }

    fn listeners(&self) -> HashMap<String, Arc<dyn MessageHandler>> {
        self.registry.dump()
    }
}

/// Marks a queue as no longer polled when dropped, unless a newer loop has
/// taken the queue over since.
struct PollingGuard {
    name: String,
    lease: u64,
    polling: Arc<Mutex<Polling>>,
}

impl Drop for PollingGuard {
    fn drop(&mut self) {
        let mut polling = lock(&self.polling);
        if polling.get(&self.name) == Some(&self.lease) {
            polling.remove(&self.name);
        }
    }
}

fn lock(polling: &Mutex<Polling>) -> std::sync::MutexGuard<'_, Polling> {
    polling.lock().unwrap_or_else(|p| p.into_inner())
}
