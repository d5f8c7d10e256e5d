//! Configuration for the lease keeper.
//!
//! Settings are layered with the `config` crate, later sources overriding
//! earlier ones:
//!
//! 1. `/etc/lease-keeper/config.{yaml,toml,json}` (optional)
//! 2. `./config/lease-keeper.{yaml,toml,json}` (optional)
//! 3. An explicit file passed by the caller (required when given)
//! 4. Environment variables prefixed `LEASE_KEEPER__`, with `__` separating
//!    nested keys (`LEASE_KEEPER__AWS__REGION=eu-west-1`)
//!
//! Every field has a default, so a file only needs to name its queues.

use crate::error::KeeperError;
use lease_keeper_runtime::{AwsConfig, AwsCredentials, MAX_BATCH_SIZE};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Longest long-poll wait SQS accepts
pub const MAX_WAIT_TIME_SECONDS: u32 = 20;

/// Longest visibility timeout SQS accepts (12 hours)
pub const MAX_VISIBILITY_TIMEOUT_SECONDS: u32 = 43_200;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "LEASE_KEEPER";

const REDACTED: &str = "***";

/// Complete lease keeper configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeeperConfig {
    /// AWS account, region, endpoints and credentials
    pub aws: AwsSettings,

    /// Queues this client works with
    pub queues: Vec<QueueSettings>,

    /// Large-body offload settings
    pub offload: OffloadSettings,

    /// Lease tracking and renewal tuning
    pub extension: ExtensionSettings,

    /// Log delete failures instead of returning them
    pub suppress_delete_errors: bool,

    /// Prefix physical queue names with `test_`
    pub test_mode: bool,
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            aws: AwsSettings::default(),
            queues: Vec::new(),
            offload: OffloadSettings::default(),
            extension: ExtensionSettings::default(),
            suppress_delete_errors: true,
            test_mode: false,
        }
    }
}

/// AWS connection settings
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsSettings {
    /// AWS region, e.g. `us-east-1`
    pub region: String,

    /// Account id used to build queue URLs
    pub account: String,

    /// Override for the SQS endpoint (LocalStack, ElasticMQ)
    pub sqs_endpoint: Option<String>,

    /// Override for the S3 endpoint
    pub s3_endpoint: Option<String>,

    /// Static access key id; the environment is used when absent
    pub access_key_id: Option<String>,

    /// Static secret access key
    pub secret_access_key: Option<String>,

    /// Session token for temporary credentials
    pub session_token: Option<String>,

    /// HTTP request timeout in seconds
    pub request_timeout_seconds: u64,
}

impl Default for AwsSettings {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            account: String::new(),
            sqs_endpoint: None,
            s3_endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            request_timeout_seconds: 30,
        }
    }
}

impl fmt::Debug for AwsSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsSettings")
            .field("region", &self.region)
            .field("account", &self.account)
            .field("sqs_endpoint", &self.sqs_endpoint)
            .field("s3_endpoint", &self.s3_endpoint)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| REDACTED),
            )
            .field("session_token", &self.session_token.as_ref().map(|_| REDACTED))
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .finish()
    }
}

/// Per-queue settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Logical queue name used by callers
    pub name: String,

    /// FIFO queue; adds the `.fifo` extension to the physical name
    pub fifo: bool,

    /// Developer prefix; adds `local_{prefix}_` to the physical name
    pub local_prefix: Option<String>,

    /// Appended to the physical name before the FIFO extension
    pub suffix: Option<String>,

    /// Messages per receive call (1-10)
    pub batch_size: u32,

    /// Visibility timeout in seconds; zero disables lease tracking
    pub visibility_timeout_seconds: u32,

    /// Long-poll wait in seconds (0-20)
    pub wait_time_seconds: u32,

    /// Renewals allowed per message before it is released
    pub max_visibility_extensions: u32,

    /// Log payloads and renewal traffic for this queue at info level
    pub debug: bool,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            fifo: false,
            local_prefix: None,
            suffix: None,
            batch_size: 10,
            visibility_timeout_seconds: 0,
            wait_time_seconds: 20,
            max_visibility_extensions: 12,
            debug: false,
        }
    }
}

impl QueueSettings {
    /// Settings with defaults for a named queue
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Whether received messages get a lease
    pub fn tracks_leases(&self) -> bool {
        self.visibility_timeout_seconds > 0
    }

    /// Visibility timeout as a duration
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.visibility_timeout_seconds))
    }
}

/// Large-body offload settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OffloadSettings {
    /// Store bodies above the threshold in S3
    pub enabled: bool,

    /// Bucket holding offloaded bodies
    pub bucket: Option<String>,

    /// Largest body in bytes sent inline
    pub message_threshold_bytes: usize,
}

impl Default for OffloadSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            bucket: None,
            message_threshold_bytes: 250_000,
        }
    }
}

/// Lease tracking and renewal tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtensionSettings {
    /// Most leases tracked at once
    pub max_concurrent_messages: usize,

    /// Time between renewal ticks in milliseconds
    pub batch_extend_interval_ms: u64,

    /// Pause between renewal chunks of one queue in milliseconds
    pub chunk_delay_ms: u64,

    /// Renewal attempts per chunk, including the first
    pub max_attempts: u32,

    /// Delay before retrying a throttled renewal in milliseconds
    pub throttle_backoff_ms: u64,

    /// Delay before retrying any other failed renewal in milliseconds
    pub retry_backoff_ms: u64,

    /// Random spread applied to retry delays, as a fraction (0.0 to 1.0)
    pub retry_jitter_percent: f64,

    /// Pause after a failed tick in milliseconds
    pub error_backoff_ms: u64,
}

impl Default for ExtensionSettings {
    fn default() -> Self {
        Self {
            max_concurrent_messages: 10_000,
            batch_extend_interval_ms: 5_000,
            chunk_delay_ms: 100,
            max_attempts: 2,
            throttle_backoff_ms: 500,
            retry_backoff_ms: 200,
            retry_jitter_percent: 0.0,
            error_backoff_ms: 1_000,
        }
    }
}

impl ExtensionSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.batch_extend_interval_ms)
    }

    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

impl KeeperConfig {
    /// Load configuration from the default locations, an optional explicit
    /// file and the environment, then validate it
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, KeeperError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("/etc/lease-keeper/config").required(false))
            .add_source(config::File::with_name("config/lease-keeper").required(false));

        if let Some(path) = explicit_path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let config: KeeperConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the queue service would reject
    pub fn validate(&self) -> Result<(), KeeperError> {
        if self.aws.region.trim().is_empty() {
            return Err(invalid("aws.region cannot be empty"));
        }

        if self.extension.max_concurrent_messages == 0 {
            return Err(invalid(
                "extension.max_concurrent_messages must be greater than zero",
            ));
        }

        if self.extension.batch_extend_interval_ms == 0 {
            return Err(invalid(
                "extension.batch_extend_interval_ms must be greater than zero",
            ));
        }

        if self.extension.max_attempts == 0 {
            return Err(invalid("extension.max_attempts must be at least 1"));
        }

        if !(0.0..=1.0).contains(&self.extension.retry_jitter_percent) {
            return Err(invalid(
                "extension.retry_jitter_percent must be between 0.0 and 1.0",
            ));
        }

        if self.offload.enabled
            && self
                .offload
                .bucket
                .as_deref()
                .map_or(true, |bucket| bucket.trim().is_empty())
        {
            return Err(invalid("offload.bucket is required when offload is enabled"));
        }

        let mut seen = HashSet::new();
        for queue in &self.queues {
            if queue.name.trim().is_empty() {
                return Err(invalid("queue name cannot be empty"));
            }

            if !seen.insert(queue.name.as_str()) {
                return Err(invalid(format!("queue '{}' is configured twice", queue.name)));
            }

            if queue.batch_size == 0 || queue.batch_size as usize > MAX_BATCH_SIZE {
                return Err(invalid(format!(
                    "queue '{}': batch_size must be between 1 and {}",
                    queue.name, MAX_BATCH_SIZE
                )));
            }

            if queue.wait_time_seconds > MAX_WAIT_TIME_SECONDS {
                return Err(invalid(format!(
                    "queue '{}': wait_time_seconds cannot exceed {}",
                    queue.name, MAX_WAIT_TIME_SECONDS
                )));
            }

            if queue.visibility_timeout_seconds > MAX_VISIBILITY_TIMEOUT_SECONDS {
                return Err(invalid(format!(
                    "queue '{}': visibility_timeout_seconds cannot exceed {}",
                    queue.name, MAX_VISIBILITY_TIMEOUT_SECONDS
                )));
            }
        }

        Ok(())
    }

    /// Look up a queue by its logical name
    pub fn queue(&self, name: &str) -> Option<&QueueSettings> {
        self.queues.iter().find(|queue| queue.name == name)
    }

    /// Transport configuration for the AWS providers
    pub fn aws_config(&self) -> AwsConfig {
        let mut aws = AwsConfig::new(self.aws.region.clone());
        aws.request_timeout = Duration::from_secs(self.aws.request_timeout_seconds);

        if let (Some(access_key_id), Some(secret)) =
            (&self.aws.access_key_id, &self.aws.secret_access_key)
        {
            aws = aws.with_credentials(AwsCredentials::new(
                access_key_id.clone(),
                secret.clone(),
                self.aws.session_token.clone(),
            ));
        }
        if let Some(endpoint) = &self.aws.sqs_endpoint {
            aws = aws.with_sqs_endpoint(endpoint.clone());
        }
        if let Some(endpoint) = &self.aws.s3_endpoint {
            aws = aws.with_s3_endpoint(endpoint.clone());
        }
        aws
    }

    /// Copy with secrets masked, for display
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.aws.secret_access_key.is_some() {
            copy.aws.secret_access_key = Some(REDACTED.to_string());
        }
        if copy.aws.session_token.is_some() {
            copy.aws.session_token = Some(REDACTED.to_string());
        }
        copy
    }
}

fn invalid(message: impl Into<String>) -> KeeperError {
    KeeperError::InvalidConfiguration {
        message: message.into(),
    }
}
