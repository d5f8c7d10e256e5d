//! # Lease Keeper Runtime
//!
//! Queue and object-store transports for the lease keeper, with AWS SQS, S3
//! and in-memory implementations.
//!
//! This library provides:
//! - Provider-agnostic queue operations behind [`QueueTransport`]
//! - Object storage for offloaded message bodies behind [`ObjectStore`]
//! - Error classification into transient, throttling and permanent lease failures
//! - AWS Signature V4 signing for the HTTP providers
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all queue and storage operations
//! - [`message`] - Message structures, identifiers and batch outcomes
//! - [`provider`] - Provider types and AWS configuration
//! - [`client`] - Transport traits
//! - [`providers`] - Concrete transports

// Module declarations
pub mod client;
pub mod error;
pub mod message;
pub mod provider;
pub mod providers;

// Re-export commonly used types at crate root for convenience
pub use client::{ObjectStore, QueueTransport, MAX_BATCH_SIZE};
pub use error::{
    codes, ConfigurationError, QueueError, SerializationError, StorageError, ValidationError,
};
pub use message::{
    BatchEntryFailure, BatchOutcome, DeleteEntry, MessageId, QueueName, QueueUrl, ReceiptHandle,
    ReceiveRequest, ReceivedMessage, SendRequest, Timestamp, VisibilityEntry,
};
pub use provider::{AwsConfig, AwsCredentials, ProviderType};
pub use providers::{
    AwsSqsProvider, InMemoryObjectStore, InMemoryQueueProvider, Operation, S3ObjectStore,
};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
