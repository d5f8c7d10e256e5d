//! Error types for the lease keeper.

use lease_keeper_runtime::{QueueError, StorageError};
use thiserror::Error;

/// Errors surfaced by [`crate::LeaseKeeper`] operations
#[derive(Debug, Error)]
pub enum KeeperError {
    /// A queue name was used that has no configuration entry
    #[error("No configuration for queue '{name}'")]
    ConfigurationMissing { name: String },

    /// Configuration failed to load or validate
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// An oversized body could not be written to the object store
    #[error("Failed to store message body under key {key}: {source}")]
    StorageWriteFailed {
        key: String,
        #[source]
        source: StorageError,
    },

    /// An offloaded body could not be fetched from the object store
    #[error("Failed to fetch message body for key {key}: {source}")]
    StorageReadFailed {
        key: String,
        #[source]
        source: StorageError,
    },

    /// A renewal call kept failing until the attempt ceiling was reached
    #[error("Visibility change failed after {attempts} attempt(s): {source}")]
    TransientTransportFailure {
        attempts: u32,
        #[source]
        source: QueueError,
    },

    /// The queue reported that the lease can no longer be renewed
    #[error("Lease can no longer be renewed: {source}")]
    PermanentLeaseFailure {
        #[source]
        source: QueueError,
    },

    /// Transport failure passed through from a caller operation
    #[error("Queue operation failed: {0}")]
    Queue(#[from] QueueError),
}

impl KeeperError {
    /// Check if retrying the failed operation could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ConfigurationMissing { .. } => false,
            Self::InvalidConfiguration { .. } => false,
            Self::StorageWriteFailed { source, .. } => source.is_transient(),
            Self::StorageReadFailed { source, .. } => source.is_transient(),
            Self::TransientTransportFailure { .. } => true,
            Self::PermanentLeaseFailure { .. } => false,
            Self::Queue(e) => e.is_transient(),
        }
    }
}

impl From<config::ConfigError> for KeeperError {
    fn from(error: config::ConfigError) -> Self {
        Self::InvalidConfiguration {
            message: error.to_string(),
        }
    }
}

/// Errors raised by the offload codec
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Failed to store body under key {key}: {source}")]
    StorageWriteFailed {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("Failed to fetch body for key {key}: {source}")]
    StorageReadFailed {
        key: String,
        #[source]
        source: StorageError,
    },
}

impl CodecError {
    /// Object key the failed operation used
    pub fn key(&self) -> &str {
        match self {
            Self::StorageWriteFailed { key, .. } | Self::StorageReadFailed { key, .. } => key,
        }
    }
}

impl From<CodecError> for KeeperError {
    fn from(error: CodecError) -> Self {
        match error {
            CodecError::StorageWriteFailed { key, source } => {
                Self::StorageWriteFailed { key, source }
            }
            CodecError::StorageReadFailed { key, source } => Self::StorageReadFailed { key, source },
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
