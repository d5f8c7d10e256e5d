//! In-memory queue and object-store implementations for testing and development.
//!
//! The queue provider mirrors the SQS behaviour the lease keeper depends on:
//! - every receive issues a fresh receipt handle
//! - in-flight messages become visible again once their visibility expires
//! - visibility changes and deletes are batched and report per-entry failures
//!
//! Both providers expose fault injection hooks (one-shot call failures,
//! per-message entry failures, invalidated receipts, slow calls) and record
//! the calls they served so tests can assert on the traffic.

use crate::client::{ObjectStore, QueueTransport, MAX_BATCH_SIZE};
use crate::error::{codes, QueueError, StorageError};
use crate::message::{
    BatchEntryFailure, BatchOutcome, DeleteEntry, MessageId, QueueUrl, ReceiptHandle,
    ReceiveRequest, ReceivedMessage, SendRequest, Timestamp, VisibilityEntry,
};
use crate::provider::ProviderType;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

/// Default visibility timeout applied when a receive does not set one
const DEFAULT_VISIBILITY_TIMEOUT_SECONDS: u32 = 30;

// ============================================================================
// Call Recording
// ============================================================================

/// Queue operations served by [`InMemoryQueueProvider`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Send,
    Receive,
    ChangeVisibility,
    Delete,
    GetAttributes,
}

/// One call served by the in-memory provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub operation: Operation,
    pub queue_url: String,
    /// Message ids of the batch entries, empty for non-batch calls
    pub message_ids: Vec<MessageId>,
}

// ============================================================================
// Internal Storage Structures
// ============================================================================

#[derive(Clone)]
struct StoredMessage {
    message_id: MessageId,
    body: Bytes,
    receive_count: u32,
    sent_at: Timestamp,
    available_at: Timestamp,
}

struct InFlightMessage {
    message: StoredMessage,
    visible_at: Timestamp,
}

#[derive(Default)]
struct InMemoryQueue {
    messages: VecDeque<StoredMessage>,
    /// Keyed by the receipt handle issued on the latest receive
    in_flight: HashMap<String, InFlightMessage>,
}

impl InMemoryQueue {
    /// Return expired in-flight messages to the queue
    fn requeue_expired(&mut self, now: Timestamp) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, m)| m.visible_at <= now)
            .map(|(handle, _)| handle.clone())
            .collect();

        for handle in expired {
            if let Some(in_flight) = self.in_flight.remove(&handle) {
                self.messages.push_back(in_flight.message);
            }
        }
    }
}

#[derive(Default)]
struct QueueStorage {
    queues: HashMap<String, InMemoryQueue>,
    failures: HashMap<Operation, VecDeque<QueueError>>,
    entry_failures: HashMap<MessageId, (String, String)>,
    invalidated: HashSet<String>,
    calls: Vec<RecordedCall>,
}

impl QueueStorage {
    fn queue(&mut self, queue_url: &QueueUrl) -> &mut InMemoryQueue {
        self.queues.entry(queue_url.as_str().to_string()).or_default()
    }

    fn record(&mut self, operation: Operation, queue_url: &QueueUrl, message_ids: Vec<MessageId>) {
        self.calls.push(RecordedCall {
            operation,
            queue_url: queue_url.as_str().to_string(),
            message_ids,
        });
    }

    fn take_failure(&mut self, operation: Operation) -> Option<QueueError> {
        self.failures.get_mut(&operation).and_then(VecDeque::pop_front)
    }
}

/// Per-entry failure for a receipt that cannot be renewed or deleted
fn storage_entry_failure(
    entry_failures: &HashMap<MessageId, (String, String)>,
    invalidated: &HashSet<String>,
    queue: &InMemoryQueue,
    id: &MessageId,
    handle: &ReceiptHandle,
) -> Option<BatchEntryFailure> {
    if let Some((code, message)) = entry_failures.get(id) {
        return Some(BatchEntryFailure {
            id: id.clone(),
            code: code.clone(),
            message: message.clone(),
            sender_fault: true,
        });
    }

    if invalidated.contains(handle.as_str()) || !queue.in_flight.contains_key(handle.as_str()) {
        return Some(BatchEntryFailure {
            id: id.clone(),
            code: codes::RECEIPT_HANDLE_IS_INVALID.to_string(),
            message: format!("The receipt handle \"{}\" is not valid.", handle.as_str()),
            sender_fault: true,
        });
    }

    None
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// In-Memory Queue Provider
// ============================================================================

/// In-memory queue transport
///
/// Queues are created on first use and keyed by their URL.
#[derive(Default)]
pub struct InMemoryQueueProvider {
    storage: Mutex<QueueStorage>,
    visibility_delay: Mutex<Duration>,
}

impl InMemoryQueueProvider {
    /// Create new empty provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next call of `operation` with `error`
    ///
    /// Failures queue up: injecting twice fails the next two calls.
    pub fn inject_failure(&self, operation: Operation, error: QueueError) {
        lock(&self.storage)
            .failures
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Report a per-entry failure with `code` for every batch entry of `message_id`
    pub fn fail_entry(&self, message_id: &MessageId, code: &str, message: &str) {
        lock(&self.storage)
            .entry_failures
            .insert(message_id.clone(), (code.to_string(), message.to_string()));
    }

    /// Make a receipt handle stale, as if the message had been received again
    pub fn invalidate_receipt(&self, receipt_handle: &ReceiptHandle) {
        lock(&self.storage)
            .invalidated
            .insert(receipt_handle.as_str().to_string());
    }

    /// Delay every visibility change by `delay` before it is applied
    pub fn set_visibility_delay(&self, delay: Duration) {
        *lock(&self.visibility_delay) = delay;
    }

    /// Calls served so far
    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.storage).calls.clone()
    }

    /// Calls of one operation served so far
    pub fn calls_for(&self, operation: Operation) -> Vec<RecordedCall> {
        lock(&self.storage)
            .calls
            .iter()
            .filter(|c| c.operation == operation)
            .cloned()
            .collect()
    }

    /// Number of messages waiting to be received
    pub fn available_count(&self, queue_url: &QueueUrl) -> usize {
        lock(&self.storage)
            .queues
            .get(queue_url.as_str())
            .map(|q| q.messages.len())
            .unwrap_or(0)
    }

    /// Number of received, not yet deleted messages
    pub fn in_flight_count(&self, queue_url: &QueueUrl) -> usize {
        lock(&self.storage)
            .queues
            .get(queue_url.as_str())
            .map(|q| q.in_flight.len())
            .unwrap_or(0)
    }

    /// Time at which an in-flight message becomes visible again
    pub fn visible_at(&self, queue_url: &QueueUrl, receipt_handle: &ReceiptHandle) -> Option<Timestamp> {
        lock(&self.storage)
            .queues
            .get(queue_url.as_str())
            .and_then(|q| q.in_flight.get(receipt_handle.as_str()))
            .map(|m| m.visible_at)
    }

    /// Derive the queue ARN from a standard SQS queue URL
    fn queue_arn(queue_url: &QueueUrl) -> String {
        let parsed = url::Url::parse(queue_url.as_str()).ok();
        let region = parsed
            .as_ref()
            .and_then(|u| u.host_str().map(str::to_string))
            .and_then(|host| host.split('.').nth(1).map(str::to_string))
            .unwrap_or_else(|| "local".to_string());
        let mut segments = parsed
            .as_ref()
            .and_then(|u| u.path_segments())
            .map(|s| s.map(str::to_string).collect::<Vec<_>>())
            .unwrap_or_default();
        let name = segments.pop().unwrap_or_default();
        let account = segments.pop().unwrap_or_else(|| "000000000000".to_string());

        format!("arn:aws:sqs:{}:{}:{}", region, account, name)
    }
}

#[async_trait]
impl QueueTransport for InMemoryQueueProvider {
    async fn send_message(
        &self,
        queue_url: &QueueUrl,
        request: SendRequest,
    ) -> Result<MessageId, QueueError> {
        let mut storage = lock(&self.storage);
        storage.record(Operation::Send, queue_url, Vec::new());
        if let Some(error) = storage.take_failure(Operation::Send) {
            return Err(error);
        }

        let max_size = ProviderType::InMemory.max_message_size();
        if request.body.len() > max_size {
            return Err(QueueError::MessageTooLarge {
                size: request.body.len(),
                max_size,
            });
        }

        let now = Timestamp::now();
        let message_id = MessageId::new();
        let delay = Duration::from_secs(request.delay_seconds.unwrap_or(0) as u64);
        storage.queue(queue_url).messages.push_back(StoredMessage {
            message_id: message_id.clone(),
            body: request.body,
            receive_count: 0,
            sent_at: now,
            available_at: now.plus(delay),
        });

        Ok(message_id)
    }

    async fn receive_messages(
        &self,
        queue_url: &QueueUrl,
        request: &ReceiveRequest,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let mut storage = lock(&self.storage);
        storage.record(Operation::Receive, queue_url, Vec::new());
        if let Some(error) = storage.take_failure(Operation::Receive) {
            return Err(error);
        }

        let now = Timestamp::now();
        let visibility = Duration::from_secs(
            request
                .visibility_timeout_seconds
                .unwrap_or(DEFAULT_VISIBILITY_TIMEOUT_SECONDS) as u64,
        );
        let max_messages = request.max_messages.clamp(1, MAX_BATCH_SIZE as u32) as usize;

        let queue = storage.queue(queue_url);
        queue.requeue_expired(now);

        let mut received = Vec::new();
        let mut deferred = VecDeque::new();
        while received.len() < max_messages {
            let Some(mut message) = queue.messages.pop_front() else {
                break;
            };
            if message.available_at > now {
                deferred.push_back(message);
                continue;
            }

            message.receive_count += 1;
            let handle = ReceiptHandle::new(uuid::Uuid::new_v4().to_string());

            let mut attributes = HashMap::new();
            attributes.insert(
                "ApproximateReceiveCount".to_string(),
                message.receive_count.to_string(),
            );
            attributes.insert(
                "SentTimestamp".to_string(),
                message.sent_at.as_datetime().timestamp_millis().to_string(),
            );

            received.push(ReceivedMessage {
                message_id: message.message_id.clone(),
                receipt_handle: handle.clone(),
                body: message.body.clone(),
                attributes,
            });
            queue.in_flight.insert(
                handle.as_str().to_string(),
                InFlightMessage {
                    message,
                    visible_at: now.plus(visibility),
                },
            );
        }

        // Delayed messages keep their place at the front.
        while let Some(message) = deferred.pop_back() {
            queue.messages.push_front(message);
        }

        Ok(received)
    }

    async fn change_visibility_batch(
        &self,
        queue_url: &QueueUrl,
        entries: &[VisibilityEntry],
    ) -> Result<BatchOutcome, QueueError> {
        if entries.len() > MAX_BATCH_SIZE {
            return Err(QueueError::BatchTooLarge {
                size: entries.len(),
                max_size: MAX_BATCH_SIZE,
            });
        }

        let delay = *lock(&self.visibility_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut storage = lock(&self.storage);
        storage.record(
            Operation::ChangeVisibility,
            queue_url,
            entries.iter().map(|e| e.id.clone()).collect(),
        );
        if let Some(error) = storage.take_failure(Operation::ChangeVisibility) {
            return Err(error);
        }

        let now = Timestamp::now();
        let mut outcome = BatchOutcome::default();
        let storage = &mut *storage;
        let queue = storage
            .queues
            .entry(queue_url.as_str().to_string())
            .or_default();
        queue.requeue_expired(now);

        for entry in entries {
            if let Some(failure) = storage_entry_failure(
                &storage.entry_failures,
                &storage.invalidated,
                queue,
                &entry.id,
                &entry.receipt_handle,
            ) {
                outcome.failed.push(failure);
                continue;
            }

            let handle = entry.receipt_handle.as_str();
            if entry.visibility_timeout_seconds == 0 {
                if let Some(in_flight) = queue.in_flight.remove(handle) {
                    queue.messages.push_back(in_flight.message);
                }
            } else if let Some(in_flight) = queue.in_flight.get_mut(handle) {
                in_flight.visible_at =
                    now.plus(Duration::from_secs(entry.visibility_timeout_seconds as u64));
            }
            outcome.successful.push(entry.id.clone());
        }

        Ok(outcome)
    }

    async fn delete_message_batch(
        &self,
        queue_url: &QueueUrl,
        entries: &[DeleteEntry],
    ) -> Result<BatchOutcome, QueueError> {
        if entries.len() > MAX_BATCH_SIZE {
            return Err(QueueError::BatchTooLarge {
                size: entries.len(),
                max_size: MAX_BATCH_SIZE,
            });
        }

        let mut storage = lock(&self.storage);
        storage.record(
            Operation::Delete,
            queue_url,
            entries.iter().map(|e| e.id.clone()).collect(),
        );
        if let Some(error) = storage.take_failure(Operation::Delete) {
            return Err(error);
        }

        let mut outcome = BatchOutcome::default();
        let storage = &mut *storage;
        let queue = storage
            .queues
            .entry(queue_url.as_str().to_string())
            .or_default();

        for entry in entries {
            if let Some(failure) = storage_entry_failure(
                &storage.entry_failures,
                &storage.invalidated,
                queue,
                &entry.id,
                &entry.receipt_handle,
            ) {
                outcome.failed.push(failure);
                continue;
            }

            queue.in_flight.remove(entry.receipt_handle.as_str());
            outcome.successful.push(entry.id.clone());
        }

        Ok(outcome)
    }

    async fn get_queue_attributes(
        &self,
        queue_url: &QueueUrl,
        attribute_names: &[String],
    ) -> Result<HashMap<String, String>, QueueError> {
        let mut storage = lock(&self.storage);
        storage.record(Operation::GetAttributes, queue_url, Vec::new());
        if let Some(error) = storage.take_failure(Operation::GetAttributes) {
            return Err(error);
        }

        let queue = storage.queue(queue_url);
        let mut all = HashMap::new();
        all.insert("QueueArn".to_string(), Self::queue_arn(queue_url));
        all.insert(
            "ApproximateNumberOfMessages".to_string(),
            queue.messages.len().to_string(),
        );
        all.insert(
            "ApproximateNumberOfMessagesNotVisible".to_string(),
            queue.in_flight.len().to_string(),
        );

        if attribute_names.is_empty() || attribute_names.iter().any(|n| n == "All") {
            return Ok(all);
        }

        Ok(all
            .into_iter()
            .filter(|(name, _)| attribute_names.contains(name))
            .collect())
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }
}

// ============================================================================
// In-Memory Object Store
// ============================================================================

/// One object held by [`InMemoryObjectStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Bytes,
    pub content_type: String,
}

/// In-memory object store with operation counters and failure switches
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<HashMap<String, StoredObject>>,
    puts: AtomicUsize,
    gets: AtomicUsize,
    delete_calls: AtomicUsize,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    fail_deletes: AtomicBool,
}

impl InMemoryObjectStore {
    /// Create new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail until reset
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every read fail until reset
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every delete fail until reset
    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful and failed put calls
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Number of successful and failed get calls
    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    /// Number of delete calls
    pub fn delete_call_count(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    /// Object stored under `key`
    pub fn object(&self, key: &str) -> Option<StoredObject> {
        lock(&self.objects).get(key).cloned()
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        lock(&self.objects).len()
    }

    /// Check whether the store holds no objects
    pub fn is_empty(&self) -> bool {
        lock(&self.objects).is_empty()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::ConnectionFailed {
                message: "injected write failure".to_string(),
            });
        }

        lock(&self.objects).insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Bytes, StorageError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::ConnectionFailed {
                message: "injected read failure".to_string(),
            });
        }

        lock(&self.objects)
            .get(key)
            .map(|o| o.body.clone())
            .ok_or_else(|| StorageError::ObjectNotFound {
                key: key.to_string(),
            })
    }

    async fn delete_objects(&self, keys: &[String]) -> Result<(), StorageError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::ConnectionFailed {
                message: "injected delete failure".to_string(),
            });
        }

        let mut objects = lock(&self.objects);
        for key in keys {
            objects.remove(key);
        }
        Ok(())
    }
}
