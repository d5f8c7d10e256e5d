//! Client facade.
//!
//! [`LeaseKeeper`] is what applications use. It resolves logical queue names,
//! offloads large bodies on send, resolves them on receive, registers a lease
//! for every received message of a queue with a visibility timeout, and
//! releases leases and stored bodies again when messages are deleted.

use crate::codec::{OffloadCodec, OutboundBody};
use crate::config::{KeeperConfig, QueueSettings};
use crate::error::KeeperError;
use crate::processor::{BatchProcessor, TickReport};
use crate::queue_url::QueueUrlBuilder;
use crate::retry::RenewalRetryPolicy;
use crate::scheduler::{ExtensionScheduler, SchedulerState};
use crate::tracker::{LeaseSettings, LeaseStats, LeaseTracker};
use bytes::Bytes;
use futures::future::{join_all, try_join_all};
use lease_keeper_runtime::{
    AwsSqsProvider, BatchEntryFailure, DeleteEntry, MessageId, ObjectStore, QueueError, QueueName,
    QueueTransport, QueueUrl, ReceiptHandle, ReceiveRequest, ReceivedMessage, S3ObjectStore,
    SendRequest, Timestamp, VisibilityEntry,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

/// Attribute holding a queue's ARN
pub const QUEUE_ARN_ATTRIBUTE: &str = "QueueArn";

/// Optional send parameters
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// FIFO message group
    pub message_group_id: Option<String>,
    /// FIFO deduplication id
    pub deduplication_id: Option<String>,
    /// Delivery delay in seconds
    pub delay_seconds: Option<u32>,
}

/// Result of a send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub message_id: MessageId,
    /// Object key when the body was offloaded
    pub external_key: Option<String>,
}

/// A received message with its body resolved
#[derive(Debug, Clone)]
pub struct KeeperMessage {
    pub message_id: MessageId,
    pub receipt_handle: ReceiptHandle,
    pub body: Bytes,
    /// Object key of an offloaded body, deleted together with the message
    pub external_key: Option<String>,
    pub attributes: HashMap<String, String>,
    /// Whether the lease is renewed automatically
    ///
    /// `false` for queues without a visibility timeout and when the tracker
    /// was full; the message is still delivered.
    pub tracked: bool,
}

impl KeeperMessage {
    /// Handle needed to delete this message
    pub fn delete_item(&self) -> DeleteItem {
        DeleteItem {
            message_id: self.message_id.clone(),
            receipt_handle: self.receipt_handle.clone(),
            external_key: self.external_key.clone(),
        }
    }

    /// Body as UTF-8 text, with invalid sequences replaced
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Message to delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteItem {
    pub message_id: MessageId,
    pub receipt_handle: ReceiptHandle,
    pub external_key: Option<String>,
}

/// Per-message result of a delete
#[derive(Debug, Clone, Default)]
pub struct DeleteReport {
    pub deleted: Vec<MessageId>,
    pub failed: Vec<BatchEntryFailure>,
}

impl DeleteReport {
    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// A configured queue with everything resolved up front
#[derive(Debug, Clone)]
struct QueueBinding {
    settings: QueueSettings,
    name: QueueName,
    url: QueueUrl,
    lease: Option<LeaseSettings>,
}

/// Queue client with automatic lease renewal and large-body offload
pub struct LeaseKeeper {
    config: KeeperConfig,
    transport: Arc<dyn QueueTransport>,
    codec: Option<OffloadCodec>,
    tracker: Arc<LeaseTracker>,
    scheduler: ExtensionScheduler,
    queues: HashMap<String, QueueBinding>,
}

impl LeaseKeeper {
    /// Build a client on top of the given transports
    ///
    /// `store` resolves offloaded bodies on receive; bodies are only
    /// offloaded on send when offload is enabled in the configuration.
    pub fn new(
        config: KeeperConfig,
        transport: Arc<dyn QueueTransport>,
        store: Option<Arc<dyn ObjectStore>>,
    ) -> Result<Self, KeeperError> {
        config.validate()?;
        if config.offload.enabled && store.is_none() {
            return Err(KeeperError::InvalidConfiguration {
                message: "offload is enabled but no object store was provided".to_string(),
            });
        }

        let url_builder = QueueUrlBuilder::new(&config);
        let mut queues = HashMap::new();
        for settings in &config.queues {
            let name = QueueName::new(settings.name.clone()).map_err(|e| {
                KeeperError::InvalidConfiguration {
                    message: format!("queue '{}': {}", settings.name, e),
                }
            })?;
            let url = url_builder.build(settings)?;
            let lease = settings.tracks_leases().then(|| LeaseSettings {
                queue_url: url.clone(),
                visibility_timeout: settings.visibility_timeout(),
                max_extensions: settings.max_visibility_extensions,
            });

            queues.insert(
                settings.name.clone(),
                QueueBinding {
                    settings: settings.clone(),
                    name,
                    url,
                    lease,
                },
            );
        }

        let tracker = Arc::new(LeaseTracker::new(config.extension.max_concurrent_messages));
        let debug_queues: Vec<QueueName> = queues
            .values()
            .filter(|binding| binding.settings.debug)
            .map(|binding| binding.name.clone())
            .collect();
        let processor = BatchProcessor::new(
            transport.clone(),
            tracker.clone(),
            RenewalRetryPolicy::from_settings(&config.extension),
            config.extension.chunk_delay(),
        )
        .with_debug_queues(debug_queues);
        let scheduler = ExtensionScheduler::new(
            Arc::new(processor),
            tracker.clone(),
            config.extension.tick_interval(),
            config.extension.error_backoff(),
        );

        Ok(Self {
            codec: store.map(OffloadCodec::new),
            config,
            transport,
            tracker,
            scheduler,
            queues,
        })
    }

    /// Build a client talking to SQS and, when a bucket is configured, S3
    ///
    /// A configured bucket is read from even with offload disabled, so
    /// references sent by other producers still resolve.
    pub fn from_config(config: KeeperConfig) -> Result<Self, KeeperError> {
        let aws = config.aws_config();
        let transport =
            AwsSqsProvider::new(&aws).map_err(|e| KeeperError::InvalidConfiguration {
                message: e.to_string(),
            })?;

        let store: Option<Arc<dyn ObjectStore>> = match &config.offload.bucket {
            Some(bucket) => Some(Arc::new(
                S3ObjectStore::new(&aws, bucket.clone()).map_err(|e| {
                    KeeperError::InvalidConfiguration {
                        message: e.to_string(),
                    }
                })?,
            )),
            _ => None,
        };

        Self::new(config, Arc::new(transport), store)
    }

    pub fn config(&self) -> &KeeperConfig {
        &self.config
    }

    fn binding(&self, name: &str) -> Result<&QueueBinding, KeeperError> {
        self.queues
            .get(name)
            .ok_or_else(|| KeeperError::ConfigurationMissing {
                name: name.to_string(),
            })
    }

    /// URL of a configured queue
    pub fn queue_url(&self, name: &str) -> Result<QueueUrl, KeeperError> {
        Ok(self.binding(name)?.url.clone())
    }

    /// Send a message, offloading the body when it is too large
    #[instrument(skip(self, name, body, options), fields(queue = %name))]
    pub async fn send_message(
        &self,
        name: &str,
        body: impl Into<Bytes>,
        options: SendOptions,
    ) -> Result<SentMessage, KeeperError> {
        let binding = self.binding(name)?;
        let body = body.into();

        let outbound = match &self.codec {
            Some(codec) if self.config.offload.enabled => {
                codec
                    .encode(body, self.config.offload.message_threshold_bytes)
                    .await?
            }
            _ => OutboundBody::Inline(body),
        };

        let mut request = SendRequest::new(outbound.wire_body().clone());
        if let Some(group_id) = options.message_group_id {
            request = request.with_message_group_id(group_id);
        }
        if let Some(deduplication_id) = options.deduplication_id {
            request = request.with_deduplication_id(deduplication_id);
        }
        if let Some(delay) = options.delay_seconds {
            request = request.with_delay_seconds(delay);
        }

        if binding.settings.debug {
            info!(
                size = request.body.len(),
                body = %String::from_utf8_lossy(&request.body),
                "Sending message"
            );
        }

        let message_id = match self.transport.send_message(&binding.url, request).await {
            Ok(message_id) => message_id,
            Err(e) => {
                // The stored body would never be referenced.
                if let (Some(codec), Some(key)) = (&self.codec, outbound.external_key()) {
                    codec.delete_external(&[key.to_string()]).await;
                }
                return Err(e.into());
            }
        };

        debug!(
            message_id = %message_id,
            offloaded = outbound.external_key().is_some(),
            "Message sent"
        );
        Ok(SentMessage {
            message_id,
            external_key: outbound.external_key().map(str::to_string),
        })
    }

    /// Receive a batch of messages and start tracking their leases
    #[instrument(skip(self, name), fields(queue = %name))]
    pub async fn receive_messages(&self, name: &str) -> Result<Vec<KeeperMessage>, KeeperError> {
        let binding = self.binding(name)?;
        let request = ReceiveRequest {
            max_messages: binding.settings.batch_size,
            visibility_timeout_seconds: binding
                .settings
                .tracks_leases()
                .then_some(binding.settings.visibility_timeout_seconds),
            wait_time_seconds: binding.settings.wait_time_seconds,
        };

        let received = self
            .transport
            .receive_messages(&binding.url, &request)
            .await?;
        if received.is_empty() {
            return Ok(Vec::new());
        }

        // Stored bodies are fetched concurrently; each failure only degrades
        // its own message.
        let bodies = join_all(received.iter().map(|message| self.resolve_body(message))).await;

        let mut messages = Vec::with_capacity(received.len());
        for (message, (body, external_key)) in received.into_iter().zip(bodies) {
            let tracked = match &binding.lease {
                Some(lease) => {
                    let added = self.tracker.add(
                        message.message_id.clone(),
                        binding.name.clone(),
                        message.receipt_handle.clone(),
                        lease,
                    );
                    if !added {
                        warn!(
                            message_id = %message.message_id,
                            capacity = self.tracker.capacity(),
                            "Lease tracker is full, visibility of this message will not be extended"
                        );
                    }
                    added
                }
                None => false,
            };

            if binding.settings.debug {
                info!(
                    message_id = %message.message_id,
                    tracked,
                    body = %String::from_utf8_lossy(&body),
                    "Received message"
                );
            }

            messages.push(KeeperMessage {
                message_id: message.message_id,
                receipt_handle: message.receipt_handle,
                body,
                external_key,
                attributes: message.attributes,
                tracked,
            });
        }

        debug!(count = messages.len(), "Messages received");
        Ok(messages)
    }

    async fn resolve_body(&self, message: &ReceivedMessage) -> (Bytes, Option<String>) {
        let Some(codec) = &self.codec else {
            return (message.body.clone(), None);
        };

        match codec.decode(message.body.clone()).await {
            Ok(decoded) => (decoded.body, decoded.external_key),
            Err(e) => {
                warn!(
                    message_id = %message.message_id,
                    key = %e.key(),
                    error = %e,
                    "Could not fetch offloaded body, delivering reference"
                );
                (message.body.clone(), Some(e.key().to_string()))
            }
        }
    }

    /// Delete processed messages, release their leases and stored bodies
    ///
    /// Whole-call failures are logged and reported per message when
    /// `suppress_delete_errors` is set, otherwise returned. A lease is released
    /// once its message is deleted or its receipt handle is stale; messages
    /// that could not be deleted for any other reason keep being renewed.
    #[instrument(skip(self, name, items), fields(queue = %name, count = items.len()))]
    pub async fn delete_messages(
        &self,
        name: &str,
        items: &[DeleteItem],
    ) -> Result<DeleteReport, KeeperError> {
        let binding = self.binding(name)?;
        let mut report = DeleteReport::default();
        let mut external_keys = Vec::new();

        for chunk in items.chunks(self.transport.max_batch_size().max(1)) {
            let entries: Vec<DeleteEntry> = chunk
                .iter()
                .map(|item| DeleteEntry {
                    id: item.message_id.clone(),
                    receipt_handle: item.receipt_handle.clone(),
                })
                .collect();

            match self
                .transport
                .delete_message_batch(&binding.url, &entries)
                .await
            {
                Ok(outcome) => {
                    for message_id in outcome.successful {
                        self.tracker.remove(&message_id);
                        if let Some(key) = chunk
                            .iter()
                            .find(|item| item.message_id == message_id)
                            .and_then(|item| item.external_key.clone())
                        {
                            external_keys.push(key);
                        }
                        report.deleted.push(message_id);
                    }
                    for failure in outcome.failed {
                        warn!(
                            message_id = %failure.id,
                            code = %failure.code,
                            message = %failure.message,
                            "Message could not be deleted"
                        );
                        if failure.is_stale_receipt() {
                            self.tracker.remove(&failure.id);
                        }
                        report.failed.push(failure);
                    }
                }
                Err(e) if self.config.suppress_delete_errors => {
                    error!(error = %e, count = chunk.len(), "Delete request failed");
                    report
                        .failed
                        .extend(chunk.iter().map(|item| BatchEntryFailure {
                            id: item.message_id.clone(),
                            code: "RequestFailed".to_string(),
                            message: e.to_string(),
                            sender_fault: false,
                        }));
                }
                Err(e) => {
                    self.delete_external(&external_keys).await;
                    return Err(e.into());
                }
            }
        }

        self.delete_external(&external_keys).await;
        Ok(report)
    }

    async fn delete_external(&self, keys: &[String]) {
        if let Some(codec) = &self.codec {
            codec.delete_external(keys).await;
        }
    }

    /// Set the visibility timeout of one message explicitly
    #[instrument(skip(self, name, receipt_handle), fields(queue = %name))]
    pub async fn change_visibility(
        &self,
        name: &str,
        receipt_handle: &ReceiptHandle,
        visibility_timeout_seconds: u32,
    ) -> Result<(), KeeperError> {
        let binding = self.binding(name)?;
        let entry = VisibilityEntry {
            id: MessageId::new(),
            receipt_handle: receipt_handle.clone(),
            visibility_timeout_seconds,
        };

        let outcome = self
            .transport
            .change_visibility_batch(&binding.url, std::slice::from_ref(&entry))
            .await?;

        match outcome.failed.into_iter().next() {
            Some(failure) => Err(QueueError::from_code(
                self.transport.provider_type().as_str(),
                &failure.code,
                &failure.message,
            )
            .into()),
            None => Ok(()),
        }
    }

    /// Read attributes of a configured queue
    pub async fn queue_attributes(
        &self,
        name: &str,
        attribute_names: &[String],
    ) -> Result<HashMap<String, String>, KeeperError> {
        let binding = self.binding(name)?;
        Ok(self
            .transport
            .get_queue_attributes(&binding.url, attribute_names)
            .await?)
    }

    /// ARN of every configured queue, keyed by logical name
    pub async fn all_lists(&self) -> Result<BTreeMap<String, String>, KeeperError> {
        let names = [QUEUE_ARN_ATTRIBUTE.to_string()];
        let lookups = self.config.queues.iter().map(|queue| {
            let names = &names;
            async move {
                let mut attributes = self.queue_attributes(&queue.name, names).await?;
                let arn = attributes.remove(QUEUE_ARN_ATTRIBUTE).unwrap_or_default();
                Ok::<_, KeeperError>((queue.name.clone(), arn))
            }
        });

        Ok(try_join_all(lookups).await?.into_iter().collect())
    }

    /// Start automatic lease renewal; `false` if already running
    pub fn start(&self) -> bool {
        self.scheduler.start()
    }

    /// Ask the renewal loop to stop after its current tick
    pub fn stop(&self) {
        self.scheduler.stop()
    }

    /// Stop renewal, wait for the loop and forget every lease
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await
    }

    pub fn state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    /// Run one renewal tick now
    pub async fn run_tick(&self, now: Timestamp) -> TickReport {
        self.scheduler.run_tick(now).await
    }

    /// Lease table statistics
    pub fn stats(&self) -> LeaseStats {
        self.tracker.stats(Timestamp::now())
    }

    /// Whether a message currently has a renewed lease
    pub fn is_tracked(&self, message_id: &MessageId) -> bool {
        self.tracker.contains(message_id)
    }
}

impl std::fmt::Debug for LeaseKeeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseKeeper")
            .field("queues", &self.queues.keys().collect::<Vec<_>>())
            .field("provider", &self.transport.provider_type())
            .field("offload", &self.codec.is_some())
            .field("scheduler", &self.scheduler)
            .finish()
    }
}
