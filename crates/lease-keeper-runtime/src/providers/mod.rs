//! Queue and object-store provider implementations.
//!
//! This module contains concrete implementations of the `QueueTransport` and
//! `ObjectStore` traits: AWS over HTTP, and in-memory for tests.

pub mod aws;
pub mod memory;
pub mod s3;
pub mod signing;
pub mod xml;

pub use aws::{AwsError, AwsSqsProvider};
pub use memory::{InMemoryObjectStore, InMemoryQueueProvider, Operation, RecordedCall, StoredObject};
pub use s3::S3ObjectStore;
pub use signing::SigV4Signer;
