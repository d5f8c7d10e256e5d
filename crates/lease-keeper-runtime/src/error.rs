//! Error types for queue and object-store operations.

use std::time::Duration;
use thiserror::Error;

/// Error codes returned by the queue service that the runtime classifies.
pub mod codes {
    /// The receipt handle is stale or was never valid.
    pub const RECEIPT_HANDLE_IS_INVALID: &str = "ReceiptHandleIsInvalid";
    /// Older spelling used by some SQS-compatible services.
    pub const INVALID_RECEIPT_HANDLE: &str = "InvalidReceiptHandle";
    /// The message is no longer in flight (visibility already expired).
    pub const MESSAGE_NOT_INFLIGHT: &str = "AWS.SimpleQueueService.MessageNotInflight";
    /// Short form of [`MESSAGE_NOT_INFLIGHT`] used in batch entry failures.
    pub const MESSAGE_NOT_INFLIGHT_SHORT: &str = "MessageNotInflight";
    /// Generic parameter error; used by SQS for expired receipt handles.
    pub const INVALID_PARAMETER_VALUE: &str = "InvalidParameterValue";
    /// The queue does not exist.
    pub const NON_EXISTENT_QUEUE: &str = "AWS.SimpleQueueService.NonExistentQueue";
    /// Request rate exceeded.
    pub const THROTTLING_EXCEPTION: &str = "ThrottlingException";
    /// Request rate exceeded (query protocol spelling).
    pub const REQUEST_THROTTLED: &str = "RequestThrottled";
    /// Too many in-flight messages or similar quota.
    pub const OVER_LIMIT: &str = "OverLimit";
    /// S3 throttling.
    pub const SLOW_DOWN: &str = "SlowDown";

    /// Check whether a code means the receipt handle can no longer be used.
    ///
    /// `InvalidParameterValue` only counts when the message names the receipt
    /// handle, which is how SQS reports an expired handle on visibility changes.
    pub fn is_stale_receipt(code: &str, message: &str) -> bool {
        match code {
            RECEIPT_HANDLE_IS_INVALID
            | INVALID_RECEIPT_HANDLE
            | MESSAGE_NOT_INFLIGHT
            | MESSAGE_NOT_INFLIGHT_SHORT => true,
            INVALID_PARAMETER_VALUE => message.contains("ReceiptHandle"),
            _ => false,
        }
    }

    /// Check whether a code reports throttling.
    pub fn is_throttling(code: &str) -> bool {
        matches!(
            code,
            THROTTLING_EXCEPTION
                | REQUEST_THROTTLED
                | "AWS.SimpleQueueService.RequestThrottled"
                | OVER_LIMIT
                | SLOW_DOWN
        )
    }
}

/// Comprehensive error type for all queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue not found: {queue}")]
    QueueNotFound { queue: String },

    #[error("Receipt handle is no longer valid ({code}): {message}")]
    ReceiptHandleInvalid { code: String, message: String },

    #[error("Message is not in flight: {message}")]
    MessageNotInFlight { message: String },

    #[error("Request throttled ({code}): {message}")]
    Throttled { code: String, message: String },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Permission denied for operation: {operation}")]
    PermissionDenied { operation: String },

    #[error("Message too large: {size} bytes (max: {max_size})")]
    MessageTooLarge { size: usize, max_size: usize },

    #[error("Batch size {size} exceeds maximum {max_size}")]
    BatchTooLarge { size: usize, max_size: usize },

    #[error("Provider error ({provider}): {code} - {message}")]
    ProviderError {
        provider: String,
        code: String,
        message: String,
    },

    #[error("Serialization failed: {0}")]
    SerializationError(#[from] SerializationError),

    #[error("Configuration error: {0}")]
    ConfigurationError(#[from] ConfigurationError),

    #[error("Validation error: {0}")]
    ValidationError(#[from] ValidationError),
}

impl QueueError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::QueueNotFound { .. } => false,
            Self::ReceiptHandleInvalid { .. } => false,
            Self::MessageNotInFlight { .. } => false,
            Self::Throttled { .. } => true,
            Self::Timeout { .. } => true,
            Self::ConnectionFailed { .. } => true,
            Self::AuthenticationFailed { .. } => false,
            Self::PermissionDenied { .. } => false,
            Self::MessageTooLarge { .. } => false,
            Self::BatchTooLarge { .. } => false,
            Self::ProviderError { .. } => true, // Provider-specific errors are usually transient
            Self::SerializationError(_) => false,
            Self::ConfigurationError(_) => false,
            Self::ValidationError(_) => false,
        }
    }

    /// Check if error reports throttling by the provider
    pub fn is_throttling(&self) -> bool {
        matches!(self, Self::Throttled { .. })
    }

    /// Check if error means the lease behind a receipt handle is gone for good
    ///
    /// Retrying such a call cannot succeed: the handle is stale or the message
    /// already became visible again.
    pub fn is_permanent_lease_failure(&self) -> bool {
        matches!(
            self,
            Self::ReceiptHandleInvalid { .. } | Self::MessageNotInFlight { .. }
        )
    }

    /// Build the error matching a provider error code
    pub fn from_code(provider: &str, code: &str, message: &str) -> Self {
        if codes::is_stale_receipt(code, message) {
            if code == codes::MESSAGE_NOT_INFLIGHT || code == codes::MESSAGE_NOT_INFLIGHT_SHORT {
                return Self::MessageNotInFlight {
                    message: message.to_string(),
                };
            }
            return Self::ReceiptHandleInvalid {
                code: code.to_string(),
                message: message.to_string(),
            };
        }

        if codes::is_throttling(code) {
            return Self::Throttled {
                code: code.to_string(),
                message: message.to_string(),
            };
        }

        if code == codes::NON_EXISTENT_QUEUE || code == "QueueDoesNotExist" {
            return Self::QueueNotFound {
                queue: message.to_string(),
            };
        }

        Self::ProviderError {
            provider: provider.to_string(),
            code: code.to_string(),
            message: message.to_string(),
        }
    }
}

/// Errors raised by object-store operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// Object does not exist
    #[error("Object not found: {key}")]
    ObjectNotFound { key: String },

    /// Connection to storage service failed
    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    /// Authentication with storage service failed
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// Permission denied for operation
    #[error("Permission denied: {operation}")]
    PermissionDenied { operation: String },

    /// Request rate exceeded
    #[error("Storage throttled: {message}")]
    Throttled { message: String },

    /// Some keys of a batch delete were not removed
    #[error("Failed to delete {failed} of {requested} objects")]
    PartialDelete { requested: usize, failed: usize },

    /// Service reported an error code
    #[error("Storage service error: {code} - {message}")]
    ServiceError { code: String, message: String },

    /// Configuration is invalid
    #[error("Storage configuration error: {message}")]
    Configuration { message: String },
}

impl StorageError {
    /// Check if error is transient and worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. } | Self::Throttled { .. } | Self::ServiceError { .. }
        )
    }
}

/// Errors during message serialization/deserialization
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("Message body is not valid UTF-8")]
    InvalidUtf8,

    #[error("Failed to parse provider response: {message}")]
    MalformedResponse { message: String },

    #[error("Response is missing element '{element}'")]
    MissingElement { element: String },
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },
}

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
