//! Backend-independent publish/listen façade.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::errors::FanoutError;
use crate::receiver::functions::MessageHandler;
use crate::registry::Listeners;
use crate::sink::PublishReceipt;

/// A delivery backend: something that can publish to a topic and run
/// handlers for queues subscribed to it.
#[async_trait]
pub trait FanoutStrategy: Send + Sync {
    /// Publishes `data` to `topic_name`.
    async fn publish(&self, topic_name: &str, data: Value) -> Result<PublishReceipt, FanoutError>;

    /// Registers `listeners` and starts consuming the queues they name.
    async fn listen(&self, listeners: Listeners) -> Result<ListenHandle, FanoutError>;

    /// Every handler registered so far, keyed by queue name.
    fn listeners(&self) -> HashMap<String, Arc<dyn MessageHandler>>;
}

/// Entry point for publishing and listening through a chosen strategy.
///
/// ```rust,no_run
/// use rs_sqs_fanout::{AwsStrategy, Fanout, FanoutConfig, HandlerFn, Listeners};
///
/// # async fn run() -> Result<(), rs_sqs_fanout::FanoutError> {
/// let config = FanoutConfig::load(None)?;
/// let fanout = Fanout::new(AwsStrategy::connect(config).await?);
///
/// let mut listening = fanout
///     .listen(Listeners::new().on(
///         "orders-billing",
///         HandlerFn::new(|order, _: ()| async move {
///             println!("billing {order}");
///             Ok(())
///         }, ()),
///     ))
///     .await?;
///
/// fanout.publish("orders", &serde_json::json!({"id": 1})).await?;
/// listening.wait().await
/// # }
/// ```
pub struct Fanout {
    strategy: Box<dyn FanoutStrategy>,
}

impl Fanout {
    pub fn new(strategy: impl FanoutStrategy + 'static) -> Self {
        Fanout {
            strategy: Box::new(strategy),
        }
    }

    /// Swaps the backend. Loops started through the previous strategy keep
    /// running for as long as their [`ListenHandle`] lives.
    pub fn set_strategy(&mut self, strategy: impl FanoutStrategy + 'static) {
        self.strategy = Box::new(strategy);
    }

    pub async fn publish<T>(&self, topic_name: &str, data: &T) -> Result<PublishReceipt, FanoutError>
    where
        T: Serialize + ?Sized,
    {
        let data = serde_json::to_value(data)?;
        self.strategy.publish(topic_name, data).await
    }

    pub async fn listen(&self, listeners: Listeners) -> Result<ListenHandle, FanoutError> {
        self.strategy.listen(listeners).await
    }

    pub fn listeners(&self) -> HashMap<String, Arc<dyn MessageHandler>> {
        self.strategy.listeners()
    }
}

/// The poll loops started by one `listen` call.
///
/// Loops run until they fail or [`ListenHandle::shutdown`] is called.
/// Dropping the handle aborts them and releases everything passed to
/// [`ListenHandle::hold`] right away, before the aborted tasks are torn down.
pub struct ListenHandle {
    loops: JoinSet<(String, Result<(), FanoutError>)>,
    queues: Vec<String>,
    shutdown: watch::Sender<bool>,
    _held: Vec<Box<dyn Send + Sync>>,
}

impl Default for ListenHandle {
    fn default() -> Self {
        ListenHandle::new()
    }
}

impl ListenHandle {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        ListenHandle {
            loops: JoinSet::new(),
            queues: Vec::new(),
            shutdown,
            _held: Vec::new(),
        }
    }

    /// Resolves once shutdown is requested (or the handle is gone).
    pub fn shutdown_signal(&self) -> impl Future<Output = ()> + Send + use<> {
        let mut stop = self.shutdown.subscribe();
        async move {
            let _ = stop.wait_for(|stop| *stop).await;
        }
    }

    /// Spawns the poll loop for a queue onto the handle's task set.
    ///
    /// # Arguments
    ///
    /// * `queue` - Name of the queue the loop consumes, reported back by
    ///   [`ListenHandle::next_exit`]
    /// * `poll_loop` - The loop itself, usually
    ///   [`PollingConsumer::run_until`](crate::PollingConsumer::run_until)
    ///   driven by [`ListenHandle::shutdown_signal`]
    ///
    /// A panic inside the loop is reported as a
    /// [`FanoutError::Dispatch`] of that queue.
    pub fn spawn<F>(&mut self, queue: String, poll_loop: F)
    where
        F: Future<Output = Result<(), FanoutError>> + Send + 'static,
    {
        self.queues.push(queue.clone());
        self.loops.spawn(async move {
            let result = match AssertUnwindSafe(poll_loop).catch_unwind().await {
                Ok(result) => result,
                Err(_) => Err(FanoutError::Dispatch {
                    queue: queue.clone(),
                    message: "poll loop panicked".to_string(),
                }),
            };
            (queue, result)
        });
    }

    /// Keeps `guard` alive exactly as long as the handle.
    pub fn hold(&mut self, guard: impl Send + Sync + 'static) {
        self._held.push(Box::new(guard));
    }

    /// Queue names whose loops were started through this handle.
    pub fn queues(&self) -> &[String] {
        &self.queues
    }

    /// Number of loops still running.
    pub fn running(&self) -> usize {
        self.loops.len()
    }

    /// Waits for the next loop to exit.
    ///
    /// Yields the queue name for a loop that stopped on shutdown, and a
    /// [`FanoutError::Listener`] wrapping the cause for one that failed.
    /// Returns `None` once no loops are left.
    pub async fn next_exit(&mut self) -> Option<Result<String, FanoutError>> {
        let joined = self.loops.join_next().await?;
        Some(match joined {
            Ok((queue, Ok(()))) => Ok(queue),
            Ok((queue, Err(source))) => {
                error!(queue = %queue, error = %source, "poll loop terminated");
                Err(FanoutError::Listener {
                    queue,
                    source: Box::new(source),
                })
            }
            Err(e) => Err(FanoutError::Dispatch {
                queue: String::new(),
                message: e.to_string(),
            }),
        })
    }

    /// Waits until a loop fails, returning its error, or until every loop
    /// has stopped.
    pub async fn wait(&mut self) -> Result<(), FanoutError> {
        while let Some(exit) = self.next_exit().await {
            exit?;
        }
        Ok(())
    }

    /// Asks every loop to stop after its current batch and waits for them.
    ///
    /// Returns the first error among loops that had already failed.
    pub async fn shutdown(mut self) -> Result<(), FanoutError> {
        info!(queues = ?self.queues, "shutting down poll loops");
        self.shutdown.send_replace(true);

        let mut first_error = None;
        while let Some(exit) = self.next_exit().await {
            if let Err(e) = exit {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for ListenHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenHandle")
            .field("queues", &self.queues)
            .field("running", &self.loops.len())
            .finish()
    }
}
