//! # SQS Fanout
//!
//! Publish a message to a named topic and have every queue subscribed to it
//! receive a copy. Publishing goes through SNS; consuming is a pull loop
//! over SQS with at-least-once semantics.
//!
//! ## Features
//!
//! - One asynchronous poll loop per registered queue, on tokio
//! - Duplicate deliveries within a batch are handled once
//! - Every message in a batch is handled concurrently; the next receive
//!   waits for the whole batch
//! - Messages are deleted only when their handler succeeds; failed
//!   messages are redelivered after the visibility timeout
//! - Handler panics and overruns are contained to the message
//! - Double-encoded topic notifications are unwrapped before handlers see
//!   them
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rs_sqs_fanout::{AwsStrategy, Fanout, FanoutConfig, HandlerFn, Listeners};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     rs_sqs_fanout::logging::init_tracing();
//!
//!     let config = FanoutConfig::load(Some(std::path::Path::new("fanout.toml")))?;
//!     let fanout = Fanout::new(AwsStrategy::connect(config).await?);
//!
//!     let mut listening = fanout
//!         .listen(Listeners::new().on(
//!             "registration-new",
//!             HandlerFn::new(
//!                 |data, greeting: String| async move {
//!                     println!("{greeting} {data}");
//!                     Ok(())
//!                 },
//!                 "welcome".to_string(),
//!             ),
//!         ))
//!         .await?;
//!
//!     fanout.publish("registration", &serde_json::json!({"user": 42})).await?;
//!     listening.wait().await?;
//!     Ok(())
//! }
//! ```

pub mod aws;
pub mod client;
pub mod decoder;
pub mod errors;
pub mod fanout;
pub mod logging;
pub mod receiver;
pub mod registry;
pub mod settings;
pub mod sink;
pub mod source;

pub use aws::AwsStrategy;
pub use errors::{FanoutError, HandlerError};
pub use fanout::{Fanout, FanoutStrategy, ListenHandle};
pub use receiver::{CycleReport, HandlerFn, MessageHandler, PollConfig, PollingConsumer};
pub use registry::{ListenerRegistry, Listeners};
pub use settings::FanoutConfig;
