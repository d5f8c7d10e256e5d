//! # Lease Keeper Core
//!
//! Keeps received SQS messages invisible for as long as the consumer works on
//! them, and moves message bodies that are too large for the queue into an
//! object store.
//!
//! ## Architecture
//!
//! - [`client::LeaseKeeper`] is the facade used by applications
//! - [`tracker::LeaseTracker`] holds one lease per received message
//! - [`processor::BatchProcessor`] renews due leases in provider-sized batches
//! - [`scheduler::ExtensionScheduler`] runs the processor on a fixed interval
//! - [`codec::OffloadCodec`] swaps large bodies for object-store references
//!
//! All transport access goes through the traits of `lease-keeper-runtime`,
//! so the in-memory providers can stand in for SQS and S3 in tests.
//!
//! ## Usage
//!
//! ```rust
//! use lease_keeper_core::{KeeperConfig, LeaseKeeper, QueueSettings, SendOptions};
//! use lease_keeper_runtime::InMemoryQueueProvider;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), lease_keeper_core::KeeperError> {
//! let mut config = KeeperConfig::default();
//! config.aws.account = "123456789012".to_string();
//! let mut jobs = QueueSettings::new("jobs");
//! jobs.visibility_timeout_seconds = 30;
//! config.queues.push(jobs);
//!
//! let keeper = LeaseKeeper::new(config, Arc::new(InMemoryQueueProvider::new()), None)?;
//! keeper.start();
//!
//! keeper.send_message("jobs", "payload", SendOptions::default()).await?;
//! for message in keeper.receive_messages("jobs").await? {
//!     // ... work on the message while its lease is renewed ...
//!     keeper.delete_messages("jobs", &[message.delete_item()]).await?;
//! }
//!
//! keeper.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod processor;
pub mod queue_url;
pub mod retry;
pub mod scheduler;
pub mod tracker;

pub use client::{DeleteItem, DeleteReport, KeeperMessage, LeaseKeeper, SendOptions, SentMessage};
pub use codec::{OffloadCodec, OutboundBody};
pub use config::{
    AwsSettings, ExtensionSettings, KeeperConfig, OffloadSettings, QueueSettings,
};
pub use error::{CodecError, KeeperError};
pub use processor::{BatchProcessor, TickReport};
pub use queue_url::QueueUrlBuilder;
pub use retry::RenewalRetryPolicy;
pub use scheduler::{ExtensionScheduler, SchedulerState};
pub use tracker::{Lease, LeaseOutcome, LeaseSettings, LeaseStats, LeaseTracker};

/// Result type for lease keeper operations
pub type KeeperResult<T> = Result<T, KeeperError>;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
