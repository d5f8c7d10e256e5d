//! Tests for the renewal scheduler lifecycle.

use super::*;
use crate::retry::RenewalRetryPolicy;
use crate::tracker::LeaseSettings;
use async_trait::async_trait;
use bytes::Bytes;
use lease_keeper_runtime::{
    BatchOutcome, DeleteEntry, InMemoryQueueProvider, MessageId, Operation, ProviderType,
    QueueError, QueueName, QueueTransport, QueueUrl, ReceiptHandle, ReceiveRequest,
    ReceivedMessage, SendRequest, VisibilityEntry,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

const TICK: Duration = Duration::from_secs(1);
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

fn queue_url() -> QueueUrl {
    QueueUrl::new("https://sqs.us-east-1.amazonaws.com/123456789012/jobs".to_string()).unwrap()
}

fn lease_settings() -> LeaseSettings {
    LeaseSettings {
        queue_url: queue_url(),
        visibility_timeout: Duration::from_secs(30),
        max_extensions: 5,
    }
}

fn create_scheduler(transport: Arc<dyn QueueTransport>) -> (Arc<LeaseTracker>, ExtensionScheduler) {
    let tracker = Arc::new(LeaseTracker::new(100));
    let processor = Arc::new(BatchProcessor::new(
        transport,
        tracker.clone(),
        RenewalRetryPolicy::default(),
        Duration::from_millis(100),
    ));
    let scheduler = ExtensionScheduler::new(processor, tracker.clone(), TICK, ERROR_BACKOFF);
    (tracker, scheduler)
}

/// Receive one message and track it with a lease that is already due
async fn track_due_message(provider: &InMemoryQueueProvider, tracker: &LeaseTracker) -> MessageId {
    provider
        .send_message(&queue_url(), SendRequest::new(Bytes::from("work")))
        .await
        .unwrap();
    let message = provider
        .receive_messages(
            &queue_url(),
            &ReceiveRequest {
                max_messages: 1,
                visibility_timeout_seconds: Some(30),
                wait_time_seconds: 0,
            },
        )
        .await
        .unwrap()
        .remove(0);

    assert!(tracker.add_at(
        message.message_id.clone(),
        QueueName::new("jobs".to_string()).unwrap(),
        message.receipt_handle,
        &lease_settings(),
        Timestamp::now().minus(Duration::from_secs(60)),
    ));
    message.message_id
}

// ============================================================================
// Lifecycle Tests
// ============================================================================

mod lifecycle {
    use super::*;

    /// Verify start is idempotent and stop drains to stopped
    #[tokio::test(start_paused = true)]
    async fn test_start_stop_transitions() {
        let (_tracker, scheduler) = create_scheduler(Arc::new(InMemoryQueueProvider::new()));
        assert_eq!(scheduler.state(), SchedulerState::Stopped);

        assert!(scheduler.start());
        assert!(!scheduler.start());
        assert_eq!(scheduler.state(), SchedulerState::Running);

        scheduler.stop();
        assert_eq!(scheduler.state(), SchedulerState::Draining);
        assert!(!scheduler.start());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }

    /// Verify stop keeps the leases and shutdown clears them
    #[tokio::test(start_paused = true)]
    async fn test_shutdown_clears_tracker() {
        let provider = Arc::new(InMemoryQueueProvider::new());
        let (tracker, scheduler) = create_scheduler(provider.clone());
        track_due_message(&provider, &tracker).await;

        scheduler.start();
        scheduler.stop();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(tracker.len(), 1);

        scheduler.shutdown().await;
        assert!(tracker.is_empty());
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }

    /// Verify shutdown without a running loop only clears the tracker
    #[tokio::test]
    async fn test_shutdown_when_stopped() {
        let provider = Arc::new(InMemoryQueueProvider::new());
        let (tracker, scheduler) = create_scheduler(provider.clone());
        track_due_message(&provider, &tracker).await;

        scheduler.shutdown().await;

        assert!(tracker.is_empty());
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }

    /// Verify the loop can be started again after shutdown
    #[tokio::test(start_paused = true)]
    async fn test_restart_after_shutdown() {
        let provider = Arc::new(InMemoryQueueProvider::new());
        let (tracker, scheduler) = create_scheduler(provider.clone());

        scheduler.start();
        scheduler.shutdown().await;
        assert!(scheduler.start());

        let message_id = track_due_message(&provider, &tracker).await;
        tokio::time::sleep(TICK + Duration::from_millis(500)).await;

        assert_eq!(tracker.get(&message_id).unwrap().extension_count, 1);
        scheduler.shutdown().await;
    }

    /// Verify a loop started while shutdown is draining keeps running
    #[tokio::test]
    async fn test_start_during_shutdown_keeps_new_loop() {
        let provider = Arc::new(InMemoryQueueProvider::new());
        let (_tracker, scheduler) = create_scheduler(provider);
        let scheduler = Arc::new(scheduler);
        scheduler.start();

        // Restart as soon as the old loop reports stopped, possibly before
        // shutdown has resumed.
        let restarter = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move {
                for _ in 0..10_000 {
                    if scheduler.start() {
                        return true;
                    }
                    tokio::task::yield_now().await;
                }
                false
            })
        };
        scheduler.shutdown().await;

        assert!(restarter.await.unwrap());
        assert_eq!(scheduler.state(), SchedulerState::Running);
        assert!(!scheduler.start());

        scheduler.shutdown().await;
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }
}

// ============================================================================
// Tick Tests
// ============================================================================

mod ticks {
    use super::*;

    /// Verify the loop renews due leases on its interval
    #[tokio::test(start_paused = true)]
    async fn test_loop_renews_due_leases() {
        let provider = Arc::new(InMemoryQueueProvider::new());
        let (tracker, scheduler) = create_scheduler(provider.clone());
        let message_id = track_due_message(&provider, &tracker).await;

        scheduler.start();
        tokio::time::sleep(TICK / 2).await;
        assert!(provider.calls_for(Operation::ChangeVisibility).is_empty());

        tokio::time::sleep(TICK).await;
        assert_eq!(provider.calls_for(Operation::ChangeVisibility).len(), 1);
        assert_eq!(tracker.get(&message_id).unwrap().extension_count, 1);

        scheduler.shutdown().await;
    }

    /// Verify shutdown waits for the in-flight tick and leaves the tracker empty
    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_in_flight_tick() {
        let provider = Arc::new(InMemoryQueueProvider::new());
        let (tracker, scheduler) = create_scheduler(provider.clone());
        track_due_message(&provider, &tracker).await;
        provider.set_visibility_delay(Duration::from_secs(2));

        scheduler.start();
        // The first tick starts after one interval and is then held by the delay.
        tokio::time::sleep(TICK + Duration::from_millis(500)).await;
        assert!(provider.calls_for(Operation::ChangeVisibility).is_empty());

        let started = tokio::time::Instant::now();
        scheduler.shutdown().await;

        assert!(started.elapsed() >= Duration::from_millis(1_500));
        assert_eq!(provider.calls_for(Operation::ChangeVisibility).len(), 1);
        assert!(tracker.is_empty());
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }

    /// Verify run_tick drives the processor directly
    #[tokio::test]
    async fn test_manual_tick() {
        let provider = Arc::new(InMemoryQueueProvider::new());
        let (tracker, scheduler) = create_scheduler(provider.clone());
        let message_id = track_due_message(&provider, &tracker).await;

        let report = scheduler.run_tick(Timestamp::now()).await;

        assert_eq!(report.renewed, 1);
        assert_eq!(tracker.get(&message_id).unwrap().extension_count, 1);
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }
}

// ============================================================================
// Fault Containment Tests
// ============================================================================

/// Transport whose first visibility change panics
#[derive(Default)]
struct PanicOnceTransport {
    visibility_calls: AtomicUsize,
}

#[async_trait]
impl QueueTransport for PanicOnceTransport {
    async fn send_message(
        &self,
        _queue_url: &QueueUrl,
        _request: SendRequest,
    ) -> Result<MessageId, QueueError> {
        Ok(MessageId::new())
    }

    async fn receive_messages(
        &self,
        _queue_url: &QueueUrl,
        _request: &ReceiveRequest,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        Ok(Vec::new())
    }

    async fn change_visibility_batch(
        &self,
        _queue_url: &QueueUrl,
        entries: &[VisibilityEntry],
    ) -> Result<BatchOutcome, QueueError> {
        if self.visibility_calls.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("transport bug");
        }
        Ok(BatchOutcome {
            successful: entries.iter().map(|e| e.id.clone()).collect(),
            failed: Vec::new(),
        })
    }

    async fn delete_message_batch(
        &self,
        _queue_url: &QueueUrl,
        _entries: &[DeleteEntry],
    ) -> Result<BatchOutcome, QueueError> {
        Ok(BatchOutcome::default())
    }

    async fn get_queue_attributes(
        &self,
        _queue_url: &QueueUrl,
        _attribute_names: &[String],
    ) -> Result<HashMap<String, String>, QueueError> {
        Ok(HashMap::new())
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }
}

/// Verify a panicking tick is contained and the loop carries on after the backoff
#[tokio::test(start_paused = true)]
async fn test_panicking_tick_is_contained() {
    let transport = Arc::new(PanicOnceTransport::default());
    let (tracker, scheduler) = create_scheduler(transport.clone());
    let message_id = MessageId::new();
    tracker.add_at(
        message_id.clone(),
        QueueName::new("jobs".to_string()).unwrap(),
        ReceiptHandle::new("receipt".to_string()),
        &lease_settings(),
        Timestamp::now().minus(Duration::from_secs(60)),
    );

    scheduler.start();

    // Tick at 1s panics, backoff until 2s, next tick at 3s.
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert_eq!(transport.visibility_calls.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.state(), SchedulerState::Running);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(transport.visibility_calls.load(Ordering::SeqCst), 2);
    assert_eq!(tracker.get(&message_id).unwrap().extension_count, 1);

    scheduler.shutdown().await;
}
