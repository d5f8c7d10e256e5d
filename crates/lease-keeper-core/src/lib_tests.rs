//! Tests for the lease-keeper-core library surface.

use super::*;
use lease_keeper_runtime::{InMemoryObjectStore, InMemoryQueueProvider};
use std::sync::Arc;

/// Verify the facade works end to end through the crate root exports
#[tokio::test]
async fn test_facade_from_root_exports() {
    let mut config = KeeperConfig::default();
    config.aws.account = "123456789012".to_string();
    config.offload = OffloadSettings {
        enabled: true,
        bucket: Some("payloads".to_string()),
        message_threshold_bytes: 4,
    };
    let mut jobs = QueueSettings::new("jobs");
    jobs.visibility_timeout_seconds = 30;
    jobs.wait_time_seconds = 0;
    config.queues.push(jobs);

    let store = Arc::new(InMemoryObjectStore::new());
    let keeper: KeeperResult<LeaseKeeper> = LeaseKeeper::new(
        config,
        Arc::new(InMemoryQueueProvider::new()),
        Some(store.clone() as Arc<dyn lease_keeper_runtime::ObjectStore>),
    );
    let keeper = keeper.unwrap();

    keeper
        .send_message("jobs", "payload", SendOptions::default())
        .await
        .unwrap();
    let messages = keeper.receive_messages("jobs").await.unwrap();
    assert_eq!(messages[0].body_text(), "payload");
    assert!(messages[0].tracked);

    let items: Vec<DeleteItem> = messages.iter().map(KeeperMessage::delete_item).collect();
    let report: DeleteReport = keeper.delete_messages("jobs", &items).await.unwrap();
    assert!(report.is_complete_success());
    assert!(store.is_empty());
    assert_eq!(keeper.state(), SchedulerState::Stopped);
}
