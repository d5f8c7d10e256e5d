//! Physical queue URL construction.
//!
//! A logical queue name maps to the physical queue
//! `[local_{prefix}_][test_]{name}[{suffix}][.fifo]` under the account's
//! queue endpoint.

use crate::config::{KeeperConfig, QueueSettings};
use crate::error::KeeperError;
use lease_keeper_runtime::QueueUrl;

#[cfg(test)]
#[path = "queue_url_tests.rs"]
mod tests;

/// Builds queue URLs from the account-wide settings
#[derive(Debug, Clone)]
pub struct QueueUrlBuilder {
    base: String,
    account: String,
    test_mode: bool,
}

impl QueueUrlBuilder {
    pub fn new(config: &KeeperConfig) -> Self {
        let base = match &config.aws.sqs_endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://sqs.{}.amazonaws.com", config.aws.region),
        };

        Self {
            base,
            account: config.aws.account.clone(),
            test_mode: config.test_mode,
        }
    }

    /// Physical queue name for a queue entry
    pub fn physical_name(&self, queue: &QueueSettings) -> String {
        let mut name = String::new();
        if let Some(prefix) = queue.local_prefix.as_deref().filter(|p| !p.is_empty()) {
            name.push_str("local_");
            name.push_str(prefix);
            name.push('_');
        }
        if self.test_mode {
            name.push_str("test_");
        }
        name.push_str(&queue.name);
        if let Some(suffix) = &queue.suffix {
            name.push_str(suffix);
        }
        if queue.fifo {
            name.push_str(".fifo");
        }
        name
    }

    /// Full queue URL for a queue entry
    pub fn build(&self, queue: &QueueSettings) -> Result<QueueUrl, KeeperError> {
        let url = format!(
            "{}/{}/{}",
            self.base,
            self.account,
            self.physical_name(queue)
        );
        QueueUrl::new(url).map_err(|e| KeeperError::InvalidConfiguration {
            message: format!("queue '{}' has no valid URL: {}", queue.name, e),
        })
    }
}
