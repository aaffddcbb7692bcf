use std::any::Any;
use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::decoder;
use crate::errors::FanoutError;
use crate::registry::ListenerRegistry;
use crate::source::{QueueHandle, QueueSource, RawMessage};

pub mod config;
pub mod functions;

pub use self::config::PollConfig;
pub use self::functions::{HandlerFn, MessageHandler};

/// Poll loop for a single queue.
///
/// Each cycle receives a batch, drops duplicate deliveries, runs the
/// queue's handler on every remaining message concurrently and deletes the
/// messages whose handler succeeded. The next receive is only issued once
/// the whole batch has settled, so at most one batch per queue is ever in
/// flight.
///
/// Failed messages are left alone: they reappear once their visibility
/// timeout expires, which is the only retry mechanism.
#[derive(Clone)]
pub struct PollingConsumer {
    queue_name: Arc<str>,
    queue: QueueHandle,
    source: Arc<dyn QueueSource>,
    registry: Arc<ListenerRegistry>,
    config: PollConfig,
}

/// Counts for one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Deliveries returned by the receive call, duplicates included.
    pub received: usize,
    pub duplicates: usize,
    /// Handled successfully and deleted.
    pub acknowledged: usize,
    /// Left on the queue for redelivery.
    pub unacknowledged: usize,
    /// Handled successfully but the delete failed.
    pub ack_failures: usize,
}

enum Outcome {
    Acknowledged,
    Unacknowledged,
    AckFailed,
}

impl PollingConsumer {
    /// Creates a poll loop for one queue.
    ///
    /// # Arguments
    ///
    /// * `queue_name` - Name the handler is looked up under in `registry`
    /// * `queue` - Handle the queue name resolved to
    /// * `source` - Queue source batches are received from and deleted on
    /// * `registry` - Handler registry, read once per message
    /// * `config` - Batch size, visibility, long-poll wait and handler deadline
    ///
    /// # Returns
    ///
    /// Returns a `PollingConsumer` that does nothing until [`run`](Self::run)
    /// or [`poll_once`](Self::poll_once) is called.
    pub fn new(
        queue_name: impl Into<Arc<str>>,
        queue: QueueHandle,
        source: Arc<dyn QueueSource>,
        registry: Arc<ListenerRegistry>,
        config: PollConfig,
    ) -> Self {
        PollingConsumer {
            queue_name: queue_name.into(),
            queue,
            source,
            registry,
            config,
        }
    }

    /// Polls until receiving fails or the batch harness breaks.
    pub async fn run(self) -> Result<(), FanoutError> {
        self.run_until(std::future::pending()).await
    }

    /// Polls until `shutdown` resolves, receiving fails, or the batch
    /// harness breaks.
    ///
    /// Shutdown is only observed between batches; a batch that has been
    /// received is always dispatched to completion.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), FanoutError>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        info!(queue = %self.queue_name, url = %self.queue, "starting poll loop");

        loop {
            let received = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!(queue = %self.queue_name, "poll loop shut down");
                    return Ok(());
                }
                received = self.source.receive_batch(&self.queue, &self.config) => received,
            };

            let batch = received.inspect_err(|e| {
                error!(queue = %self.queue_name, error = %e, "receive failed; stopping poll loop");
            })?;

            let report = self.process_batch(batch).await.inspect_err(|e| {
                error!(queue = %self.queue_name, error = %e, "batch dispatch failed; stopping poll loop");
            })?;
            if report.received > 0 {
                debug!(
                    queue = %self.queue_name,
                    received = report.received,
                    duplicates = report.duplicates,
                    acknowledged = report.acknowledged,
                    unacknowledged = report.unacknowledged,
                    ack_failures = report.ack_failures,
                    "poll cycle finished"
                );
            }

            // hand control back to the runtime before the next cycle
            tokio::task::yield_now().await;
        }
    }

    /// Runs a single receive-dispatch-acknowledge cycle.
    pub async fn poll_once(&self) -> Result<CycleReport, FanoutError> {
        let batch = self.source.receive_batch(&self.queue, &self.config).await?;
        self.process_batch(batch).await
    }

    async fn process_batch(&self, batch: Vec<RawMessage>) -> Result<CycleReport, FanoutError> {
        let mut report = CycleReport {
            received: batch.len(),
            ..CycleReport::default()
        };
        if batch.is_empty() {
            return Ok(report);
        }

        let unique = dedup(batch);
        report.duplicates = report.received - unique.len();

        let mut in_flight = JoinSet::new();
        for message in unique {
            in_flight.spawn(self.clone().dispatch(message));
        }

        let mut harness_failure = None;
        while let Some(joined) = in_flight.join_next().await {
            match joined {
                Ok(Outcome::Acknowledged) => report.acknowledged += 1,
                Ok(Outcome::Unacknowledged) => report.unacknowledged += 1,
                Ok(Outcome::AckFailed) => report.ack_failures += 1,
                Err(e) => {
                    error!(queue = %self.queue_name, error = %e, "message dispatch task failed");
                    harness_failure.get_or_insert_with(|| e.to_string());
                }
            }
        }

        match harness_failure {
            Some(message) => Err(FanoutError::Dispatch {
                queue: self.queue_name.to_string(),
                message,
            }),
            None => Ok(report),
        }
    }

    async fn dispatch(self, message: RawMessage) -> Outcome {
        let message_id = message.message_id.as_deref().unwrap_or_default();

        if let Err(e) = self.handle(&message).await {
            warn!(
                queue = %self.queue_name,
                message_id,
                error = %e,
                "message not handled; leaving it for redelivery"
            );
            return Outcome::Unacknowledged;
        }

        match self.source.delete(&self.queue, &message.receipt_token).await {
            Ok(()) => {
                debug!(queue = %self.queue_name, message_id, "message acknowledged");
                Outcome::Acknowledged
            }
            Err(e) => {
                error!(
                    queue = %self.queue_name,
                    message_id,
                    error = %e,
                    "failed to delete handled message; it may be redelivered"
                );
                Outcome::AckFailed
            }
        }
    }

    async fn handle(&self, message: &RawMessage) -> Result<(), FanoutError> {
        let handler = self.registry.resolve(&self.queue_name)?;

        let decoded = decoder::decode(&message.body);
        if decoded.is_fallback() {
            debug!(
                queue = %self.queue_name,
                message_id = message.message_id.as_deref().unwrap_or_default(),
                "message body not decodable; handing an empty payload to the handler"
            );
        }

        let invocation = AssertUnwindSafe(handler.handle(decoded.into_payload())).catch_unwind();
        let result = match self.config.handler_timeout {
            Some(timeout) => tokio::time::timeout(timeout, invocation)
                .await
                .map_err(|_| FanoutError::HandlerTimedOut {
                    queue: self.queue_name.to_string(),
                    timeout,
                })?,
            None => invocation.await,
        };

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(FanoutError::Handler {
                queue: self.queue_name.to_string(),
                source,
            }),
            Err(panic) => Err(FanoutError::HandlerPanicked {
                queue: self.queue_name.to_string(),
                message: panic_message(panic.as_ref()),
            }),
        }
    }
}

impl std::fmt::Debug for PollingConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingConsumer")
            .field("queue_name", &self.queue_name)
            .field("queue", &self.queue)
            .field("config", &self.config)
            .finish()
    }
}

/// Keeps the first delivery of every message identity in the batch.
/// Deliveries without an identity are always kept.
fn dedup(batch: Vec<RawMessage>) -> Vec<RawMessage> {
    let mut seen = HashSet::new();
    batch
        .into_iter()
        .filter(|message| match &message.message_id {
            Some(id) => seen.insert(id.clone()),
            None => true,
        })
        .collect()
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: Option<&str>, receipt: &str) -> RawMessage {
        RawMessage {
            message_id: id.map(str::to_string),
            receipt_token: receipt.to_string(),
            body: String::new(),
        }
    }

    #[test]
    fn dedup_keeps_first_delivery_per_identity() {
        let batch = vec![
            message(Some("A"), "r1"),
            message(Some("A"), "r2"),
            message(Some("B"), "r3"),
            message(None, "r4"),
            message(None, "r5"),
        ];

        let receipts: Vec<_> = dedup(batch)
            .into_iter()
            .map(|m| m.receipt_token)
            .collect();
        assert_eq!(receipts, vec!["r1", "r3", "r4", "r5"]);
    }

    #[test]
    fn panic_payloads_are_rendered() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic payload");
    }
}
