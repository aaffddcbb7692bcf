#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rs_sqs_fanout::errors::{FanoutError, HandlerError};
use rs_sqs_fanout::receiver::{HandlerFn, MessageHandler, PollConfig};
use rs_sqs_fanout::sink::{PublishReceipt, SinkMessage, TopicAddress, TopicSink};
use rs_sqs_fanout::source::{QueueHandle, QueueSource, RawMessage};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Receive,
    Delete(String),
    HandlerStart(String),
    HandlerEnd(String),
}

#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    pub fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    pub fn snapshot(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    pub fn receives(&self) -> usize {
        self.count(|e| matches!(e, Event::Receive))
    }

    pub fn deletes(&self) -> Vec<String> {
        self.snapshot()
            .into_iter()
            .filter_map(|e| match e {
                Event::Delete(receipt) => Some(receipt),
                _ => None,
            })
            .collect()
    }

    pub fn handled(&self) -> Vec<String> {
        self.snapshot()
            .into_iter()
            .filter_map(|e| match e {
                Event::HandlerStart(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        self.0.lock().unwrap().iter().filter(|e| predicate(e)).count()
    }
}

/// Topic notification body wrapping `payload` the way SNS delivers it to
/// a subscribed queue.
pub fn notification(payload: &Value) -> String {
    serde_json::json!({
        "Type": "Notification",
        "Message": payload.to_string(),
    })
    .to_string()
}

pub fn raw(id: &str, receipt: &str, body: String) -> RawMessage {
    RawMessage {
        message_id: Some(id.to_string()),
        receipt_token: receipt.to_string(),
        body,
    }
}

/// A delivery of `{"id": id}` wrapped in a topic notification.
pub fn delivery(id: &str, receipt: &str) -> RawMessage {
    raw(id, receipt, notification(&serde_json::json!({ "id": id })))
}

pub enum Step {
    Batch(Vec<RawMessage>),
    Fail(&'static str),
}

pub enum Exhausted {
    /// Fail every receive once the script runs out, ending the loop.
    QueueDeleted,
    /// Return empty batches after a short long-poll.
    Idle,
}

/// Queue source replaying a fixed script of receive results.
pub struct ScriptedQueue {
    steps: Mutex<VecDeque<Step>>,
    exhausted: Exhausted,
    failing_deletes: HashSet<String>,
    panicking_deletes: HashSet<String>,
    pub events: EventLog,
}

impl ScriptedQueue {
    pub fn new(steps: Vec<Step>, exhausted: Exhausted, events: EventLog) -> Self {
        ScriptedQueue {
            steps: Mutex::new(steps.into()),
            exhausted,
            failing_deletes: HashSet::new(),
            panicking_deletes: HashSet::new(),
            events,
        }
    }

    pub fn failing_delete(mut self, receipt: &str) -> Self {
        self.failing_deletes.insert(receipt.to_string());
        self
    }

    pub fn panicking_delete(mut self, receipt: &str) -> Self {
        self.panicking_deletes.insert(receipt.to_string());
        self
    }
}

#[async_trait]
impl QueueSource for ScriptedQueue {
    async fn resolve(&self, queue_name: &str) -> Result<QueueHandle, FanoutError> {
        Ok(QueueHandle::new(format!("https://queue.test/{queue_name}")))
    }

    async fn receive_batch(
        &self,
        queue: &QueueHandle,
        _config: &PollConfig,
    ) -> Result<Vec<RawMessage>, FanoutError> {
        self.events.push(Event::Receive);
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Batch(batch)) => Ok(batch),
            Some(Step::Fail(reason)) => Err(FanoutError::Receive {
                queue: queue.to_string(),
                source: reason.into(),
            }),
            None => match self.exhausted {
                Exhausted::QueueDeleted => Err(FanoutError::Receive {
                    queue: queue.to_string(),
                    source: "AWS.SimpleQueueService.NonExistentQueue".into(),
                }),
                Exhausted::Idle => {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok(Vec::new())
                }
            },
        }
    }

    async fn delete(&self, queue: &QueueHandle, receipt_token: &str) -> Result<(), FanoutError> {
        if self.panicking_deletes.contains(receipt_token) {
            panic!("connection pool poisoned while deleting {receipt_token}");
        }
        if self.failing_deletes.contains(receipt_token) {
            return Err(FanoutError::Ack {
                queue: queue.to_string(),
                source: "ReceiptHandleIsInvalid".into(),
            });
        }
        self.events.push(Event::Delete(receipt_token.to_string()));
        Ok(())
    }
}

/// Handler that records start/end of each message by its `id` field,
/// sleeping briefly in between, and fails for ids listed in `fail_ids`.
pub fn recording_handler(
    events: EventLog,
    fail_ids: &[&'static str],
) -> impl MessageHandler + use<> {
    HandlerFn::new(
        |payload: Value, (events, fail_ids): (EventLog, Vec<&'static str>)| async move {
            let id = payload
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or("<empty>")
                .to_string();
            events.push(Event::HandlerStart(id.clone()));
            tokio::time::sleep(Duration::from_millis(10)).await;
            events.push(Event::HandlerEnd(id.clone()));
            if fail_ids.contains(&id.as_str()) {
                return Err(HandlerError::new(format!("cannot process {id}")));
            }
            Ok(())
        },
        (events, fail_ids.to_vec()),
    )
}

/// Topic sink that records what it is asked to publish.
#[derive(Default)]
pub struct RecordingSink {
    pub published: Mutex<Vec<(TopicAddress, SinkMessage)>>,
    pub fail_with: Option<&'static str>,
}

#[async_trait]
impl TopicSink for RecordingSink {
    async fn publish(
        &self,
        topic: &TopicAddress,
        message: &SinkMessage,
    ) -> Result<PublishReceipt, FanoutError> {
        if let Some(reason) = self.fail_with {
            return Err(FanoutError::Publish {
                topic: topic.topic.clone(),
                source: reason.into(),
            });
        }
        let mut published = self.published.lock().unwrap();
        published.push((topic.clone(), message.clone()));
        Ok(PublishReceipt {
            message_id: Some(format!("msg-{}", published.len())),
        })
    }
}

struct Stored {
    id: String,
    body: String,
}

#[derive(Default)]
struct BrokerState {
    subscriptions: HashMap<String, Vec<String>>,
    ready: HashMap<String, VecDeque<Stored>>,
    in_flight: HashMap<String, (String, Stored)>,
    unreachable: HashSet<String>,
    next_id: usize,
}

/// In-memory topic/queue pair: publishing to a topic enqueues a
/// notification on every queue subscribed to it.
#[derive(Default)]
pub struct Broker {
    state: Mutex<BrokerState>,
    pub deletes: EventLog,
}

impl Broker {
    pub fn with_queue(self, queue: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .ready
            .insert(queue.to_string(), VecDeque::new());
        self
    }

    pub fn subscribe(self, topic: &str, queue: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.ready.entry(queue.to_string()).or_default();
            state
                .subscriptions
                .entry(topic.to_string())
                .or_default()
                .push(queue.to_string());
        }
        self
    }

    /// Fails every receive on `queue` while it still resolves.
    pub fn unreachable(self, queue: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .unreachable
            .insert(queue.to_string());
        self
    }

    /// Makes every received-but-undeleted message visible again, as if
    /// its visibility timeout expired.
    pub fn expire_visibility(&self) {
        let mut state = self.state.lock().unwrap();
        let expired: Vec<_> = state.in_flight.drain().map(|(_, v)| v).collect();
        for (queue, stored) in expired {
            state.ready.entry(queue).or_default().push_back(stored);
        }
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().unwrap().in_flight.len()
    }

    fn queue_name(queue: &QueueHandle) -> String {
        queue.as_str().trim_start_matches("mem://").to_string()
    }
}

#[async_trait]
impl QueueSource for Broker {
    async fn resolve(&self, queue_name: &str) -> Result<QueueHandle, FanoutError> {
        if self.state.lock().unwrap().ready.contains_key(queue_name) {
            Ok(QueueHandle::new(format!("mem://{queue_name}")))
        } else {
            Err(FanoutError::Resolution {
                name: queue_name.to_string(),
                source: "AWS.SimpleQueueService.NonExistentQueue".into(),
            })
        }
    }

    async fn receive_batch(
        &self,
        queue: &QueueHandle,
        config: &PollConfig,
    ) -> Result<Vec<RawMessage>, FanoutError> {
        let name = Broker::queue_name(queue);
        let batch = {
            let mut state = self.state.lock().unwrap();
            if state.unreachable.contains(&name) {
                return Err(FanoutError::Receive {
                    queue: queue.to_string(),
                    source: "AWS.SimpleQueueService.NonExistentQueue".into(),
                });
            }
            let mut batch = Vec::new();
            while batch.len() < config.max_number_of_messages as usize {
                let Some(stored) = state.ready.get_mut(&name).and_then(VecDeque::pop_front) else {
                    break;
                };
                state.next_id += 1;
                let receipt = format!("receipt-{}", state.next_id);
                batch.push(raw(&stored.id, &receipt, stored.body.clone()));
                state.in_flight.insert(receipt, (name.clone(), stored));
            }
            batch
        };
        if batch.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok(batch)
    }

    async fn delete(&self, _queue: &QueueHandle, receipt_token: &str) -> Result<(), FanoutError> {
        self.state.lock().unwrap().in_flight.remove(receipt_token);
        self.deletes.push(Event::Delete(receipt_token.to_string()));
        Ok(())
    }
}

#[async_trait]
impl TopicSink for Broker {
    async fn publish(
        &self,
        topic: &TopicAddress,
        message: &SinkMessage,
    ) -> Result<PublishReceipt, FanoutError> {
        let envelope: Value = serde_json::from_str(&message.body).map_err(|e| {
            FanoutError::Publish {
                topic: topic.topic.clone(),
                source: Box::new(e),
            }
        })?;
        let sqs_copy = envelope
            .get("sqs")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let mut state = self.state.lock().unwrap();
        let Some(queues) = state.subscriptions.get(&topic.topic).cloned() else {
            return Err(FanoutError::Publish {
                topic: topic.topic.clone(),
                source: "NotFound: Topic does not exist".into(),
            });
        };
        state.next_id += 1;
        let id = format!("m-{}", state.next_id);
        let body = serde_json::json!({
            "Type": "Notification",
            "TopicArn": topic.arn(),
            "Message": sqs_copy,
        })
        .to_string();
        for queue in queues {
            state.ready.entry(queue).or_default().push_back(Stored {
                id: id.clone(),
                body: body.clone(),
            });
        }
        Ok(PublishReceipt {
            message_id: Some(id),
        })
    }
}
