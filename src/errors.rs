use std::time::Duration;

use thiserror::Error;

/// Boxed error carried by backend failures (SDK errors, fakes in tests).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error types for fanout operations.
///
/// Configuration and resolution errors propagate to the caller of
/// `publish`/`listen`. Handler and acknowledgement errors are scoped to a
/// single message: the polling consumer logs them and moves on.
#[derive(Debug, Error)]
pub enum FanoutError {
    /// A required configuration field is missing or out of range.
    ///
    /// Raised before any network I/O happens.
    #[error("invalid fanout configuration: {0}")]
    Configuration(String),

    /// A queue or topic name could not be resolved to a backend handle.
    #[error("failed to resolve '{name}': {source}")]
    Resolution {
        name: String,
        #[source]
        source: BoxError,
    },

    /// Receiving a batch failed. Fatal to that queue's poll loop.
    #[error("failed to receive messages from queue '{queue}': {source}")]
    Receive {
        queue: String,
        #[source]
        source: BoxError,
    },

    /// The topic sink rejected a publish.
    #[error("failed to publish to topic '{topic}': {source}")]
    Publish {
        topic: String,
        #[source]
        source: BoxError,
    },

    /// A handler reported failure for one message.
    #[error("handler for queue '{queue}' failed: {source}")]
    Handler {
        queue: String,
        #[source]
        source: HandlerError,
    },

    /// A handler panicked while processing one message.
    #[error("handler for queue '{queue}' panicked: {message}")]
    HandlerPanicked { queue: String, message: String },

    /// A handler did not finish before its deadline.
    #[error("handler for queue '{queue}' timed out after {timeout:?}")]
    HandlerTimedOut { queue: String, timeout: Duration },

    /// No handler is registered under the queue's name.
    #[error("no handler registered for queue '{0}'")]
    HandlerNotFound(String),

    /// Deleting a successfully handled message failed.
    #[error("failed to acknowledge message on queue '{queue}': {source}")]
    Ack {
        queue: String,
        #[source]
        source: BoxError,
    },

    /// The batch harness itself failed, as opposed to a single handler.
    #[error("dispatch of batch on queue '{queue}' failed: {message}")]
    Dispatch { queue: String, message: String },

    /// A queue's poll loop terminated.
    #[error("listener for queue '{queue}' failed: {source}")]
    Listener {
        queue: String,
        #[source]
        source: Box<FanoutError>,
    },

    #[error("failed to serialize payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FanoutError {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        FanoutError::Configuration(message.into())
    }
}

/// Error returned by a message handler to signal that processing failed.
///
/// A failed message is not deleted and becomes visible again once its
/// visibility timeout expires.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerError(String);

impl HandlerError {
    /// Creates a new `HandlerError` with the provided message.
    pub fn new(message: impl Into<String>) -> Self {
        HandlerError(message.into())
    }
}

impl From<String> for HandlerError {
    fn from(s: String) -> Self {
        HandlerError::new(s)
    }
}

impl From<&str> for HandlerError {
    fn from(s: &str) -> Self {
        HandlerError::new(s)
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::new(err.to_string())
    }
}
