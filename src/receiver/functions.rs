use crate::errors::HandlerError;
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::marker::PhantomData;

/// Trait for message handlers registered against a queue name.
///
/// A handler receives the decoded payload of one message. Returning `Ok`
/// acknowledges (deletes) the message; returning `Err` leaves it on the
/// queue so the backend redelivers it after the visibility timeout.
///
/// Messages can be delivered more than once, so handlers should be
/// idempotent.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Processes one decoded payload.
    async fn handle(&self, payload: Value) -> Result<(), HandlerError>;
}

#[async_trait]
impl<F, Fut, TShared> MessageHandler for HandlerFn<F, Fut, TShared>
where
    F: Fn(Value, TShared) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    TShared: Send + Sync + Clone + 'static,
{
    async fn handle(&self, payload: Value) -> Result<(), HandlerError> {
        (self.rv_fn)(payload, self.shared_resources.clone()).await
    }
}

/// Adapts an async closure and a shared resource into a [`MessageHandler`].
///
/// The shared resource is cloned into every invocation, so it is usually an
/// `Arc` or a cheap handle such as a client.
///
/// # Type Parameters
///
/// * `RFn` - The message handler function type
/// * `Fut` - The future returned by the handler function
/// * `TShared` - The type of shared resources passed to the handler
///
/// # Example
///
/// ```rust
/// use rs_sqs_fanout::receiver::HandlerFn;
///
/// let handler = HandlerFn::new(
///     |payload: serde_json::Value, prefix: String| async move {
///         println!("{prefix}: {payload}");
///         Ok(())
///     },
///     "orders".to_string(),
/// );
/// # let _ = handler;
/// ```
pub struct HandlerFn<RFn, Fut, TShared>
where
    RFn: Fn(Value, TShared) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    TShared: Send + Sync + Clone + 'static,
{
    rv_fn: RFn,
    shared_resources: TShared,
    _fut: PhantomData<fn() -> Fut>,
}

impl<RFn, Fut, TShared> HandlerFn<RFn, Fut, TShared>
where
    RFn: Fn(Value, TShared) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    TShared: Send + Sync + Clone + 'static,
{
    /// Creates a new handler from a function and the resources it shares
    /// across invocations.
    pub fn new(rv_fn: RFn, shared_resources: TShared) -> Self {
        HandlerFn {
            rv_fn,
            shared_resources,
            _fut: PhantomData,
        }
    }
}
