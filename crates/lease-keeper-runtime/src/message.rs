//! Message types for queue operations including core domain identifiers.

use crate::error::{codes, ValidationError};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Validated queue name with length and character restrictions
///
/// This is the logical name used in configuration; the physical queue URL
/// may add prefixes, suffixes and the `.fifo` extension.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QueueName(String);

impl QueueName {
    /// Create new queue name with validation
    pub fn new(name: String) -> Result<Self, ValidationError> {
        // Validate length
        if name.is_empty() || name.len() > 80 {
            return Err(ValidationError::OutOfRange {
                field: "queue_name".to_string(),
                message: "must be 1-80 characters".to_string(),
            });
        }

        // Validate characters (ASCII alphanumeric, hyphens, underscores)
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "only ASCII alphanumeric, hyphens, and underscores allowed".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

/// Fully qualified queue URL used to address the queue service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueUrl(String);

impl QueueUrl {
    /// Create queue URL, requiring an absolute http(s) URL
    pub fn new(url: String) -> Result<Self, ValidationError> {
        let parsed = url::Url::parse(&url).map_err(|e| ValidationError::InvalidFormat {
            field: "queue_url".to_string(),
            message: e.to_string(),
        })?;

        if parsed.scheme() != "https" && parsed.scheme() != "http" {
            return Err(ValidationError::InvalidFormat {
                field: "queue_url".to_string(),
                message: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }

        Ok(Self(url))
    }

    /// Last path segment of the URL, i.e. the physical queue name
    pub fn queue_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or_default()
    }

    /// Get queue URL as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for messages within the queue system
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        let id = uuid::Uuid::new_v4();
        Self(id.to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

/// Opaque token for acknowledging or renewing a received message
///
/// A new handle is issued on every receive; older handles for the same
/// message become stale.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReceiptHandle(String);

impl ReceiptHandle {
    /// Create new receipt handle
    pub fn new(handle: String) -> Self {
        Self(handle)
    }

    /// Get handle string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Receipt handles are long; keep logs readable.
impl std::fmt::Debug for ReceiptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix: String = self.0.chars().take(12).collect();
        write!(f, "ReceiptHandle({}…)", prefix)
    }
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create timestamp from DateTime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Timestamp `duration` after this one
    pub fn plus(&self, duration: Duration) -> Self {
        Self(self.0 + chrono::Duration::milliseconds(duration.as_millis() as i64))
    }

    /// Timestamp `duration` before this one
    pub fn minus(&self, duration: Duration) -> Self {
        Self(self.0 - chrono::Duration::milliseconds(duration.as_millis() as i64))
    }

    /// Elapsed time since `earlier`, zero if `earlier` is in the future
    pub fn duration_since(&self, earlier: &Timestamp) -> Duration {
        (self.0 - earlier.0).to_std().unwrap_or_default()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S%.3f UTC"))
    }
}

impl FromStr for Timestamp {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dt = s.parse::<DateTime<Utc>>()?;
        Ok(Self::from_datetime(dt))
    }
}

// ============================================================================
// Request Types
// ============================================================================

/// A message to be sent to a queue
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub body: Bytes,
    /// FIFO message group
    pub message_group_id: Option<String>,
    /// FIFO deduplication id
    pub deduplication_id: Option<String>,
    /// Delivery delay in seconds (0-900)
    pub delay_seconds: Option<u32>,
}

impl SendRequest {
    /// Create new send request with body
    pub fn new(body: Bytes) -> Self {
        Self {
            body,
            message_group_id: None,
            deduplication_id: None,
            delay_seconds: None,
        }
    }

    /// Set FIFO message group
    pub fn with_message_group_id(mut self, group_id: String) -> Self {
        self.message_group_id = Some(group_id);
        self
    }

    /// Set FIFO deduplication id
    pub fn with_deduplication_id(mut self, deduplication_id: String) -> Self {
        self.deduplication_id = Some(deduplication_id);
        self
    }

    /// Delay delivery
    pub fn with_delay_seconds(mut self, delay: u32) -> Self {
        self.delay_seconds = Some(delay);
        self
    }
}

/// Parameters of a receive call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveRequest {
    /// Maximum number of messages to receive (1-10)
    pub max_messages: u32,
    /// Visibility timeout applied to received messages; queue default if None
    pub visibility_timeout_seconds: Option<u32>,
    /// Long polling wait time (0-20)
    pub wait_time_seconds: u32,
}

impl Default for ReceiveRequest {
    fn default() -> Self {
        Self {
            max_messages: 10,
            visibility_timeout_seconds: None,
            wait_time_seconds: 20,
        }
    }
}

/// A message received from the queue with processing metadata
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message_id: MessageId,
    pub receipt_handle: ReceiptHandle,
    pub body: Bytes,
    pub attributes: HashMap<String, String>,
}

impl ReceivedMessage {
    /// Number of times the queue has delivered this message, if reported
    pub fn receive_count(&self) -> Option<u32> {
        self.attributes
            .get("ApproximateReceiveCount")
            .and_then(|v| v.parse().ok())
    }
}

/// One entry of a batch visibility change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibilityEntry {
    pub id: MessageId,
    pub receipt_handle: ReceiptHandle,
    pub visibility_timeout_seconds: u32,
}

/// One entry of a batch delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteEntry {
    pub id: MessageId,
    pub receipt_handle: ReceiptHandle,
}

/// Per-entry failure reported by a batch call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntryFailure {
    pub id: MessageId,
    pub code: String,
    pub message: String,
    pub sender_fault: bool,
}

impl BatchEntryFailure {
    /// Check whether the entry failed because its receipt handle is stale
    pub fn is_stale_receipt(&self) -> bool {
        codes::is_stale_receipt(&self.code, &self.message)
    }
}

/// Result of a batch call: which entries succeeded and which failed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub successful: Vec<MessageId>,
    pub failed: Vec<BatchEntryFailure>,
}

impl BatchOutcome {
    /// Check whether every entry succeeded
    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Merge another outcome into this one
    pub fn merge(&mut self, other: BatchOutcome) {
        self.successful.extend(other.successful);
        self.failed.extend(other.failed);
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
