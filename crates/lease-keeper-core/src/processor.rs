//! Renewal of due leases.
//!
//! One tick takes the tracker's due snapshot and, per queue, sends the
//! visibility changes in chunks no larger than the transport's batch limit.
//! Queues are processed in parallel; chunks of one queue run one after the
//! other with a short pause in between so a large backlog does not burst
//! against the queue's rate limits.

use crate::error::KeeperError;
use crate::retry::RenewalRetryPolicy;
use crate::tracker::{Lease, LeaseOutcome, LeaseTracker};
use futures::future::join_all;
use lease_keeper_runtime::{
    BatchOutcome, QueueName, QueueTransport, QueueUrl, Timestamp, VisibilityEntry,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[cfg(test)]
#[path = "processor_tests.rs"]
mod tests;

/// Counts from one renewal tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Leases whose visibility was extended
    pub renewed: usize,
    /// Leases dropped because they could not be renewed
    pub removed: usize,
    /// Due leases that were no longer tracked when their chunk was sent
    pub skipped: usize,
    /// Chunks whose renewal call failed as a whole
    pub failed_calls: usize,
}

impl TickReport {
    fn merge(&mut self, other: TickReport) {
        self.renewed += other.renewed;
        self.removed += other.removed;
        self.skipped += other.skipped;
        self.failed_calls += other.failed_calls;
    }
}

/// Renews due leases against the queue transport
pub struct BatchProcessor {
    transport: Arc<dyn QueueTransport>,
    tracker: Arc<LeaseTracker>,
    retry_policy: RenewalRetryPolicy,
    chunk_delay: Duration,
    debug_queues: HashSet<QueueName>,
}

impl BatchProcessor {
    pub fn new(
        transport: Arc<dyn QueueTransport>,
        tracker: Arc<LeaseTracker>,
        retry_policy: RenewalRetryPolicy,
        chunk_delay: Duration,
    ) -> Self {
        Self {
            transport,
            tracker,
            retry_policy,
            chunk_delay,
            debug_queues: HashSet::new(),
        }
    }

    /// Log renewal traffic of these queues at info level
    pub fn with_debug_queues(mut self, queues: impl IntoIterator<Item = QueueName>) -> Self {
        self.debug_queues = queues.into_iter().collect();
        self
    }

    /// Renew every lease due at `now`
    ///
    /// Failures are reconciled into the tracker and counted in the report;
    /// nothing is returned as an error.
    pub async fn run_tick(&self, now: Timestamp) -> TickReport {
        let due = self.tracker.snapshot_due(now);
        if due.is_empty() {
            return TickReport::default();
        }

        let reports = join_all(
            due.into_iter()
                .map(|(queue, leases)| self.process_queue(queue, leases, now)),
        )
        .await;

        let mut report = TickReport::default();
        for queue_report in reports {
            report.merge(queue_report);
        }
        report
    }

    async fn process_queue(&self, queue: QueueName, leases: Vec<Lease>, now: Timestamp) -> TickReport {
        let mut report = TickReport::default();
        let chunk_size = self.transport.max_batch_size().max(1);

        for (index, chunk) in leases.chunks(chunk_size).enumerate() {
            if index > 0 && !self.chunk_delay.is_zero() {
                tokio::time::sleep(self.chunk_delay).await;
            }

            // Deletes may have raced the snapshot; the tracker also has the
            // newest receipt handle if the message was redelivered.
            let entries: Vec<VisibilityEntry> = chunk
                .iter()
                .filter_map(|lease| {
                    self.tracker
                        .receipt_handle(&lease.message_id)
                        .map(|receipt_handle| VisibilityEntry {
                            id: lease.message_id.clone(),
                            receipt_handle,
                            visibility_timeout_seconds: lease.visibility_timeout_seconds(),
                        })
                })
                .collect();
            report.skipped += chunk.len() - entries.len();
            if entries.is_empty() {
                continue;
            }

            let queue_url = &chunk[0].queue_url;
            if self.debug_queues.contains(&queue) {
                info!(
                    queue = %queue,
                    message_ids = ?entries.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(),
                    "Extending message visibility"
                );
            }

            match self.change_visibility_with_retry(queue_url, &entries).await {
                Ok(outcome) => self.reconcile(&queue, outcome, now, &mut report),
                Err(e) => {
                    match &e {
                        KeeperError::PermanentLeaseFailure { .. } => debug!(
                            queue = %queue,
                            count = entries.len(),
                            error = %e,
                            "Leases are gone, no longer tracking chunk"
                        ),
                        _ => error!(
                            queue = %queue,
                            count = entries.len(),
                            error = %e,
                            "Visibility extension failed, no longer tracking chunk"
                        ),
                    }
                    report.failed_calls += 1;
                    for entry in &entries {
                        if self.tracker.remove(&entry.id) {
                            report.removed += 1;
                        }
                    }
                }
            }
        }

        report
    }

    async fn change_visibility_with_retry(
        &self,
        queue_url: &QueueUrl,
        entries: &[VisibilityEntry],
    ) -> Result<BatchOutcome, KeeperError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.transport.change_visibility_batch(queue_url, entries).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_permanent_lease_failure() => {
                    return Err(KeeperError::PermanentLeaseFailure { source: e });
                }
                Err(e) if self.retry_policy.should_retry(attempts) => {
                    let delay = self.retry_policy.delay_for(&e, attempts);
                    debug!(
                        queue_url = %queue_url,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying visibility extension"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(KeeperError::TransientTransportFailure {
                        attempts,
                        source: e,
                    });
                }
            }
        }
    }

    fn reconcile(&self, queue: &QueueName, outcome: BatchOutcome, now: Timestamp, report: &mut TickReport) {
        for message_id in &outcome.successful {
            if self.tracker.apply_outcome(message_id, LeaseOutcome::Success, now) {
                report.renewed += 1;
            }
        }

        for failure in &outcome.failed {
            if failure.is_stale_receipt() {
                debug!(
                    queue = %queue,
                    message_id = %failure.id,
                    code = %failure.code,
                    "Receipt handle is stale, no longer tracking message"
                );
            } else {
                warn!(
                    queue = %queue,
                    message_id = %failure.id,
                    code = %failure.code,
                    message = %failure.message,
                    "Visibility extension rejected, no longer tracking message"
                );
            }
            if self
                .tracker
                .apply_outcome(&failure.id, LeaseOutcome::PermanentFailure, now)
            {
                report.removed += 1;
            }
        }
    }
}

impl std::fmt::Debug for BatchProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchProcessor")
            .field("retry_policy", &self.retry_policy)
            .field("chunk_delay", &self.chunk_delay)
            .finish_non_exhaustive()
    }
}
