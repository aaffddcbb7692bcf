use std::time::Duration;

use crate::errors::FanoutError;
use crate::settings::SqsOptions;

const MAX_BATCH_SIZE: i32 = 10;
const MAX_VISIBILITY_TIMEOUT: i32 = 43_200;
const MAX_WAIT_TIME_SECONDS: i32 = 20;

/// Configuration for one queue's poll loop.
///
/// # Fields
/// - `max_number_of_messages`: The maximum number of messages to receive in a single request.
/// - `visibility_timeout`: Seconds a received message stays hidden from other receivers.
/// - `wait_time_seconds`: The wait time for long polling, in seconds.
/// - `handler_timeout`: Deadline for a single handler invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// The maximum number of messages to receive in a single request.
    pub max_number_of_messages: i32,

    /// Seconds a received message stays hidden before it can be redelivered.
    pub visibility_timeout: i32,

    /// The wait time for long polling, in seconds.
    pub wait_time_seconds: i32,

    /// A handler still running after this long is treated as failed and its
    /// message is left on the queue. `None` disables the deadline.
    pub handler_timeout: Option<Duration>,
}

impl Default for PollConfig {
    fn default() -> Self {
        PollConfig {
            max_number_of_messages: 10,
            visibility_timeout: 30,
            wait_time_seconds: 5,
            handler_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl PollConfig {
    /// Builds a poll configuration from user options, rounding every
    /// number up and checking it against the SQS limits.
    pub fn from_options(options: &SqsOptions) -> Result<Self, FanoutError> {
        let defaults = PollConfig::default();

        let max_number_of_messages = ceil_or(
            options.max_number_of_messages,
            defaults.max_number_of_messages,
            "sqs.max_number_of_messages",
        )?;
        if !(1..=MAX_BATCH_SIZE).contains(&max_number_of_messages) {
            return Err(FanoutError::configuration(format!(
                "sqs.max_number_of_messages must be between 1 and {MAX_BATCH_SIZE}, got {max_number_of_messages}"
            )));
        }

        let visibility_timeout = ceil_or(
            options.visibility_timeout,
            defaults.visibility_timeout,
            "sqs.visibility_timeout",
        )?;
        if !(0..=MAX_VISIBILITY_TIMEOUT).contains(&visibility_timeout) {
            return Err(FanoutError::configuration(format!(
                "sqs.visibility_timeout must be between 0 and {MAX_VISIBILITY_TIMEOUT}, got {visibility_timeout}"
            )));
        }

        let wait_time_seconds = ceil_or(
            options.wait_time_seconds,
            defaults.wait_time_seconds,
            "sqs.wait_time_seconds",
        )?;
        if !(0..=MAX_WAIT_TIME_SECONDS).contains(&wait_time_seconds) {
            return Err(FanoutError::configuration(format!(
                "sqs.wait_time_seconds must be between 0 and {MAX_WAIT_TIME_SECONDS}, got {wait_time_seconds}"
            )));
        }

        let handler_timeout = match options.handler_timeout {
            Some(secs) => {
                let secs = ceil_or(Some(secs), 0, "sqs.handler_timeout")?;
                if secs <= 0 {
                    return Err(FanoutError::configuration(
                        "sqs.handler_timeout must be greater than zero",
                    ));
                }
                Some(Duration::from_secs(secs as u64))
            }
            None if visibility_timeout > 0 => {
                Some(Duration::from_secs(visibility_timeout as u64))
            }
            None => None,
        };

        Ok(PollConfig {
            max_number_of_messages,
            visibility_timeout,
            wait_time_seconds,
            handler_timeout,
        })
    }
}

fn ceil_or(value: Option<f64>, default: i32, field: &str) -> Result<i32, FanoutError> {
    match value {
        None => Ok(default),
        Some(v) if v.is_finite() && v.ceil() <= i32::MAX as f64 && v.ceil() >= i32::MIN as f64 => {
            Ok(v.ceil() as i32)
        }
        Some(v) => Err(FanoutError::configuration(format!(
            "{field} must be a finite number, got {v}"
        ))),
    }
}
