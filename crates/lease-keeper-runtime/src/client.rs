//! Transport traits for queue and object-store operations.
//!
//! The lease keeper only talks to the outside world through these traits.
//! Concrete HTTP and in-memory implementations live in [`crate::providers`].

use crate::error::{QueueError, StorageError};
use crate::message::{
    BatchOutcome, DeleteEntry, MessageId, QueueUrl, ReceiveRequest, ReceivedMessage, SendRequest,
    VisibilityEntry,
};
use crate::provider::ProviderType;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;

/// Maximum number of entries accepted by one batch call
pub const MAX_BATCH_SIZE: usize = 10;

/// Interface implemented by queue providers (SQS, in-memory)
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Send single message
    async fn send_message(
        &self,
        queue_url: &QueueUrl,
        request: SendRequest,
    ) -> Result<MessageId, QueueError>;

    /// Receive up to `request.max_messages` messages; zero messages is not an error
    async fn receive_messages(
        &self,
        queue_url: &QueueUrl,
        request: &ReceiveRequest,
    ) -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Change the visibility timeout of up to [`MAX_BATCH_SIZE`] messages
    ///
    /// A whole-call error means no entry was processed; per-entry failures
    /// are reported in the returned outcome.
    async fn change_visibility_batch(
        &self,
        queue_url: &QueueUrl,
        entries: &[VisibilityEntry],
    ) -> Result<BatchOutcome, QueueError>;

    /// Delete up to [`MAX_BATCH_SIZE`] messages
    async fn delete_message_batch(
        &self,
        queue_url: &QueueUrl,
        entries: &[DeleteEntry],
    ) -> Result<BatchOutcome, QueueError>;

    /// Read queue attributes by name (`All` for every attribute)
    async fn get_queue_attributes(
        &self,
        queue_url: &QueueUrl,
        attribute_names: &[String],
    ) -> Result<HashMap<String, String>, QueueError>;

    /// Get provider type
    fn provider_type(&self) -> ProviderType;

    /// Get maximum batch size
    fn max_batch_size(&self) -> usize {
        MAX_BATCH_SIZE
    }
}

/// Interface implemented by object stores holding offloaded message bodies
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store an object under `key`
    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError>;

    /// Fetch the object stored under `key`
    async fn get_object(&self, key: &str) -> Result<Bytes, StorageError>;

    /// Delete a set of objects in as few calls as the backend allows
    async fn delete_objects(&self, keys: &[String]) -> Result<(), StorageError>;
}
