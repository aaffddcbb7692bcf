//! Fanout configuration.
//!
//! Settings are usually loaded with [`FanoutConfig::load`], which layers an
//! optional config file under `FANOUT__`-prefixed environment variables
//! (`FANOUT__SQS__REGION=eu-west-1`, `FANOUT__SNS__TOPIC_OWNER_ACCOUNT_ID=...`).
//!
//! Nothing is validated at load time. Each operation validates the part it
//! needs when it is called: `publish` checks the SNS block, `listen` checks
//! the SQS block.

use std::path::Path;

use serde::Deserialize;

use crate::errors::FanoutError;
use crate::receiver::config::PollConfig;

const ENV_PREFIX: &str = "FANOUT";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FanoutConfig {
    /// AWS access key id. Must be set together with `secret_access_key`;
    /// when both are absent the SDK's environment chain is used.
    pub access_key_id: Option<String>,

    pub secret_access_key: Option<String>,

    #[serde(default)]
    pub sns: Option<SnsOptions>,

    #[serde(default)]
    pub sqs: Option<SqsOptions>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SnsOptions {
    pub region: Option<String>,

    /// Account id owning the topics published to.
    pub topic_owner_account_id: Option<String>,

    #[serde(default)]
    pub message_structure: MessageStructure,
}

/// How a publish is laid out for SNS.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStructure {
    /// One payload copy per delivery protocol (`default` and `sqs`).
    #[default]
    Json,
    /// The serialized payload as-is.
    String,
}

impl MessageStructure {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStructure::Json => "json",
            MessageStructure::String => "string",
        }
    }
}

/// SQS listener options. Numeric values are rounded up before use.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SqsOptions {
    pub region: Option<String>,

    /// Account id owning the queues listened on.
    pub queue_owner_account_id: Option<String>,

    /// Maximum messages per receive call. Defaults to 10.
    pub max_number_of_messages: Option<f64>,

    /// Visibility timeout in seconds. Defaults to 30.
    pub visibility_timeout: Option<f64>,

    /// Long-poll wait in seconds, 0 for short polling. Defaults to 5.
    pub wait_time_seconds: Option<f64>,

    /// Per-message handler deadline in seconds. Defaults to the visibility
    /// timeout.
    pub handler_timeout: Option<f64>,
}

/// Validated SNS settings.
#[derive(Debug, Clone)]
pub struct SnsSettings {
    pub region: String,
    pub topic_owner_account_id: String,
    pub message_structure: MessageStructure,
}

/// Validated SQS settings.
#[derive(Debug, Clone)]
pub struct SqsSettings {
    pub region: String,
    pub queue_owner_account_id: String,
    pub poll: PollConfig,
}

/// Static AWS credentials.
#[derive(Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

impl FanoutConfig {
    /// Loads configuration from an optional file, overridden by
    /// `FANOUT__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, FanoutError> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }
        builder
            .add_source(
                // values stay strings: account ids keep their leading zeros
                ::config::Environment::with_prefix(ENV_PREFIX).separator("__"),
            )
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| FanoutError::configuration(e.to_string()))
    }

    /// Static credentials, if configured.
    ///
    /// Supplying only one half of the key pair is an error.
    pub fn credentials(&self) -> Result<Option<Credentials>, FanoutError> {
        match (&self.access_key_id, &self.secret_access_key) {
            (Some(access_key_id), Some(secret_access_key)) => Ok(Some(Credentials {
                access_key_id: access_key_id.clone(),
                secret_access_key: secret_access_key.clone(),
            })),
            (None, None) => Ok(None),
            (Some(_), None) => Err(FanoutError::configuration(
                "missing secret_access_key; it must be supplied with access_key_id",
            )),
            (None, Some(_)) => Err(FanoutError::configuration(
                "missing access_key_id; it must be supplied with secret_access_key",
            )),
        }
    }

    pub fn sns_settings(&self) -> Result<SnsSettings, FanoutError> {
        let sns = self.sns.as_ref().ok_or_else(|| {
            FanoutError::configuration("missing sns options; supply a valid SNS configuration")
        })?;
        Ok(SnsSettings {
            region: required(&sns.region, "sns.region")?,
            topic_owner_account_id: required(
                &sns.topic_owner_account_id,
                "sns.topic_owner_account_id",
            )?,
            message_structure: sns.message_structure,
        })
    }

    pub fn sqs_settings(&self) -> Result<SqsSettings, FanoutError> {
        let sqs = self.sqs.as_ref().ok_or_else(|| {
            FanoutError::configuration("missing sqs options; supply a valid SQS configuration")
        })?;
        Ok(SqsSettings {
            region: required(&sqs.region, "sqs.region")?,
            queue_owner_account_id: required(
                &sqs.queue_owner_account_id,
                "sqs.queue_owner_account_id",
            )?,
            poll: PollConfig::from_options(sqs)?,
        })
    }
}

fn required(value: &Option<String>, field: &str) -> Result<String, FanoutError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(FanoutError::configuration(format!(
            "missing {field}; it is required"
        ))),
    }
}
