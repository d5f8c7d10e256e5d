//! Common test utilities for lease-keeper integration tests
//!
//! This module provides:
//! - A client fixture backed by the in-memory queue and object store
//! - A tracing layer that records log events for level assertions

use lease_keeper_core::{KeeperConfig, LeaseKeeper, QueueSettings, SendOptions};
use lease_keeper_runtime::{
    InMemoryObjectStore, InMemoryQueueProvider, MessageId, ObjectStore, QueueUrl,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

pub const ACCOUNT: &str = "123456789012";

// ============================================================================
// Client Fixture
// ============================================================================

/// Configuration with one leased queue `jobs` and one plain queue `events`
#[allow(dead_code)]
pub fn test_config() -> KeeperConfig {
    let mut config = KeeperConfig::default();
    config.aws.account = ACCOUNT.to_string();

    let mut jobs = QueueSettings::new("jobs");
    jobs.visibility_timeout_seconds = 30;
    jobs.wait_time_seconds = 0;

    let mut events = QueueSettings::new("events");
    events.wait_time_seconds = 0;

    config.queues = vec![jobs, events];
    config
}

/// Client wired to in-memory transports that stay reachable for assertions
#[allow(dead_code)]
pub struct TestKeeper {
    pub provider: Arc<InMemoryQueueProvider>,
    pub store: Arc<InMemoryObjectStore>,
    pub keeper: LeaseKeeper,
}

#[allow(dead_code)]
impl TestKeeper {
    pub fn new(config: KeeperConfig) -> Self {
        let provider = Arc::new(InMemoryQueueProvider::new());
        let store = Arc::new(InMemoryObjectStore::new());
        let object_store: Arc<dyn ObjectStore> = store.clone();
        let keeper = LeaseKeeper::new(config, provider.clone(), Some(object_store))
            .expect("test configuration is valid");

        Self {
            provider,
            store,
            keeper,
        }
    }

    pub fn queue_url(&self, name: &str) -> QueueUrl {
        self.keeper.queue_url(name).expect("queue is configured")
    }

    /// Send `count` messages to `queue`
    pub async fn send_many(&self, queue: &str, count: usize) -> Vec<MessageId> {
        let mut ids = Vec::with_capacity(count);
        for index in 0..count {
            let sent = self
                .keeper
                .send_message(queue, format!("message {}", index), SendOptions::default())
                .await
                .expect("send succeeds");
            ids.push(sent.message_id);
        }
        ids
    }
}

// ============================================================================
// Log Capture
// ============================================================================

/// One recorded log event
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct CapturedEvent {
    pub level: Level,
    pub target: String,
    pub message: String,
    pub fields: HashMap<String, String>,
}

/// Tracing layer keeping every event in memory
#[derive(Clone, Default)]
#[allow(dead_code)]
pub struct LogCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

#[allow(dead_code)]
impl LogCapture {
    /// Record events on the current thread until the guard is dropped
    ///
    /// Only reliable with the current-thread runtime `#[tokio::test]` uses
    /// by default.
    pub fn install() -> (Self, tracing::subscriber::DefaultGuard) {
        let capture = Self::default();
        let subscriber = tracing_subscriber::registry().with(capture.clone());
        let guard = tracing::subscriber::set_default(subscriber);
        (capture, guard)
    }

    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn events_at(&self, level: Level) -> Vec<CapturedEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.level == level)
            .collect()
    }

    /// Events whose `field` was recorded with `value`
    pub fn with_field(&self, field: &str, value: &str) -> Vec<CapturedEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.fields.get(field).map(String::as_str) == Some(value))
            .collect()
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        self.events.lock().unwrap().push(CapturedEvent {
            level: *event.metadata().level(),
            target: event.metadata().target().to_string(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}

#[derive(Default)]
#[allow(dead_code)]
struct FieldVisitor {
    message: String,
    fields: HashMap<String, String>,
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields
                .insert(field.name().to_string(), value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields
                .insert(field.name().to_string(), format!("{:?}", value));
        }
    }
}
