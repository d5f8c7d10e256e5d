//! In-memory lease table.
//!
//! The tracker is the single source of truth for which received messages are
//! still being processed and when their visibility must next be extended.
//! Every operation takes the table lock once and never awaits while holding
//! it, so the scheduler and caller operations can use it concurrently.

use lease_keeper_runtime::{MessageId, QueueName, QueueUrl, ReceiptHandle, Timestamp};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::warn;

#[cfg(test)]
#[path = "tracker_tests.rs"]
mod tests;

/// Share of the visibility timeout that may elapse before a renewal is due
pub const RENEWAL_FRACTION: f64 = 0.8;

/// Lease parameters taken from the queue configuration
#[derive(Debug, Clone)]
pub struct LeaseSettings {
    pub queue_url: QueueUrl,
    pub visibility_timeout: Duration,
    pub max_extensions: u32,
}

/// Processing lease on one received message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub message_id: MessageId,
    pub queue_name: QueueName,
    pub queue_url: QueueUrl,
    pub receipt_handle: ReceiptHandle,
    pub extension_count: u32,
    pub max_extensions: u32,
    pub visibility_timeout: Duration,
    pub next_extend_time: Timestamp,
    pub created_at: Timestamp,
}

impl Lease {
    /// Visibility timeout in whole seconds, as sent to the queue
    pub fn visibility_timeout_seconds(&self) -> u32 {
        u32::try_from(self.visibility_timeout.as_secs()).unwrap_or(u32::MAX)
    }

    fn is_exhausted(&self) -> bool {
        self.extension_count >= self.max_extensions
    }
}

/// Result of a renewal attempt for one lease
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseOutcome {
    /// Visibility was extended
    Success,
    /// The lease can never be renewed again
    PermanentFailure,
    /// Renewal failed but may succeed on a later tick
    TransientFailure,
}

/// Snapshot of the lease table for monitoring
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeaseStats {
    pub total: usize,
    pub per_queue: BTreeMap<QueueName, usize>,
    /// Age of the longest-held lease
    pub oldest_age: Option<Duration>,
    pub oldest_extension_count: Option<u32>,
    pub mean_extension_count: f64,
}

/// Bounded table of active leases keyed by message id
#[derive(Debug)]
pub struct LeaseTracker {
    leases: Mutex<HashMap<MessageId, Lease>>,
    capacity: usize,
}

impl LeaseTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            leases: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Start tracking a message; `false` when the table is full
    pub fn add(
        &self,
        message_id: MessageId,
        queue_name: QueueName,
        receipt_handle: ReceiptHandle,
        settings: &LeaseSettings,
    ) -> bool {
        self.add_at(
            message_id,
            queue_name,
            receipt_handle,
            settings,
            Timestamp::now(),
        )
    }

    /// [`Self::add`] with an explicit clock reading
    ///
    /// A message that is already tracked was redelivered; its lease is
    /// replaced and does not count against the capacity.
    pub fn add_at(
        &self,
        message_id: MessageId,
        queue_name: QueueName,
        receipt_handle: ReceiptHandle,
        settings: &LeaseSettings,
        now: Timestamp,
    ) -> bool {
        let mut leases = self.lock();
        if leases.len() >= self.capacity && !leases.contains_key(&message_id) {
            return false;
        }

        let lease = Lease {
            message_id: message_id.clone(),
            queue_name,
            queue_url: settings.queue_url.clone(),
            receipt_handle,
            extension_count: 0,
            max_extensions: settings.max_extensions,
            visibility_timeout: settings.visibility_timeout,
            next_extend_time: next_extend_time(now, settings.visibility_timeout),
            created_at: now,
        };
        leases.insert(message_id, lease);
        true
    }

    /// Stop tracking a message; `true` if it was tracked
    pub fn remove(&self, message_id: &MessageId) -> bool {
        self.lock().remove(message_id).is_some()
    }

    pub fn contains(&self, message_id: &MessageId) -> bool {
        self.lock().contains_key(message_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Current receipt handle of a tracked message
    pub fn receipt_handle(&self, message_id: &MessageId) -> Option<ReceiptHandle> {
        self.lock()
            .get(message_id)
            .map(|lease| lease.receipt_handle.clone())
    }

    /// Copy of a tracked lease
    pub fn get(&self, message_id: &MessageId) -> Option<Lease> {
        self.lock().get(message_id).cloned()
    }

    /// Leases due for renewal at `now`, grouped by queue
    ///
    /// Leases that used up their extensions are dropped here: their messages
    /// are released back to the queue when the current visibility expires.
    pub fn snapshot_due(&self, now: Timestamp) -> BTreeMap<QueueName, Vec<Lease>> {
        let mut leases = self.lock();

        let exhausted: Vec<MessageId> = leases
            .values()
            .filter(|lease| lease.is_exhausted())
            .map(|lease| lease.message_id.clone())
            .collect();
        for message_id in exhausted {
            if let Some(lease) = leases.remove(&message_id) {
                warn!(
                    queue = %lease.queue_name,
                    message_id = %lease.message_id,
                    extensions = lease.extension_count,
                    "Message reached its visibility extension limit and is no longer renewed"
                );
            }
        }

        let mut due: BTreeMap<QueueName, Vec<Lease>> = BTreeMap::new();
        for lease in leases.values().filter(|lease| now >= lease.next_extend_time) {
            due.entry(lease.queue_name.clone())
                .or_default()
                .push(lease.clone());
        }
        for group in due.values_mut() {
            group.sort_by(|a, b| {
                a.next_extend_time
                    .cmp(&b.next_extend_time)
                    .then_with(|| a.message_id.cmp(&b.message_id))
            });
        }
        due
    }

    /// Record the outcome of a renewal; `false` if the message is not tracked
    pub fn apply_outcome(&self, message_id: &MessageId, outcome: LeaseOutcome, now: Timestamp) -> bool {
        let mut leases = self.lock();
        match outcome {
            LeaseOutcome::Success => match leases.get_mut(message_id) {
                Some(lease) => {
                    lease.extension_count = (lease.extension_count + 1).min(lease.max_extensions);
                    let candidate = next_extend_time(now, lease.visibility_timeout);
                    lease.next_extend_time = lease.next_extend_time.max(candidate);
                    true
                }
                None => false,
            },
            LeaseOutcome::PermanentFailure => leases.remove(message_id).is_some(),
            LeaseOutcome::TransientFailure => leases.contains_key(message_id),
        }
    }

    /// Table statistics at `now`
    pub fn stats(&self, now: Timestamp) -> LeaseStats {
        let leases = self.lock();
        if leases.is_empty() {
            return LeaseStats::default();
        }

        let mut per_queue: BTreeMap<QueueName, usize> = BTreeMap::new();
        let mut total_extensions: u64 = 0;
        for lease in leases.values() {
            *per_queue.entry(lease.queue_name.clone()).or_default() += 1;
            total_extensions += u64::from(lease.extension_count);
        }

        let oldest = leases
            .values()
            .min_by(|a, b| a.created_at.cmp(&b.created_at));

        LeaseStats {
            total: leases.len(),
            per_queue,
            oldest_age: oldest.map(|lease| now.duration_since(&lease.created_at)),
            oldest_extension_count: oldest.map(|lease| lease.extension_count),
            mean_extension_count: total_extensions as f64 / leases.len() as f64,
        }
    }

    /// Drop every lease
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<MessageId, Lease>> {
        // A panic while holding the lock cannot leave a lease half-written.
        self.leases.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn next_extend_time(now: Timestamp, visibility_timeout: Duration) -> Timestamp {
    now.plus(visibility_timeout.mul_f64(RENEWAL_FRACTION))
}
