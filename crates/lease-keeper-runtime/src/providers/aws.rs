//! AWS SQS provider implementation using the SQS Query API over HTTP.
//!
//! Requests are form-encoded `POST`s to the regional SQS endpoint, signed with
//! AWS Signature V4, and answered with XML documents. Talking HTTP directly
//! keeps the provider testable against mocked responses.
//!
//! ## Batch operations
//!
//! `ChangeMessageVisibilityBatch` and `DeleteMessageBatch` accept up to 10
//! entries. Entries are sent with their position as batch id and mapped back
//! to message ids when the response is parsed, so per-entry failures are
//! reported against the message they belong to.
//!
//! ## Message bodies
//!
//! SQS message bodies are text. Bodies are sent verbatim and must be valid
//! UTF-8; binary payloads should be encoded by the caller.

use crate::client::{QueueTransport, MAX_BATCH_SIZE};
use crate::error::{ConfigurationError, QueueError, SerializationError};
use crate::message::{
    BatchEntryFailure, BatchOutcome, DeleteEntry, MessageId, QueueUrl, ReceiptHandle,
    ReceiveRequest, ReceivedMessage, SendRequest, VisibilityEntry,
};
use crate::provider::{AwsConfig, ProviderType};
use crate::providers::signing::{host_header, sha256_hex, SigV4Signer, SigningRequest};
use crate::providers::xml::{parse_error, XmlElement};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use reqwest::Client as HttpClient;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, instrument};

#[cfg(test)]
#[path = "aws_tests.rs"]
mod tests;

const API_VERSION: &str = "2012-11-05";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";

// ============================================================================
// Error Types
// ============================================================================

/// AWS SQS specific errors
#[derive(Debug, thiserror::Error)]
pub enum AwsError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("SQS service error ({code}): {message}")]
    ServiceError { code: String, message: String },

    #[error("Invalid configuration: {0}")]
    ConfigurationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] SerializationError),
}

impl AwsError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Authentication(_) => false,
            Self::AccessDenied(_) => false,
            Self::NetworkError(_) => true,
            Self::Timeout(_) => true,
            Self::ServiceError { code, message } => {
                QueueError::from_code("AwsSqs", code, message).is_transient()
            }
            Self::ConfigurationError(_) => false,
            Self::SerializationError(_) => false,
        }
    }

    /// Map AWS error to QueueError
    pub fn to_queue_error(self) -> QueueError {
        match self {
            Self::Authentication(msg) => QueueError::AuthenticationFailed { message: msg },
            Self::AccessDenied(operation) => QueueError::PermissionDenied { operation },
            Self::NetworkError(msg) => QueueError::ConnectionFailed { message: msg },
            Self::Timeout(duration) => QueueError::Timeout { duration },
            Self::ServiceError { code, message } => {
                QueueError::from_code("AwsSqs", &code, &message)
            }
            Self::ConfigurationError(msg) => {
                QueueError::ConfigurationError(ConfigurationError::Invalid { message: msg })
            }
            Self::SerializationError(e) => QueueError::SerializationError(e),
        }
    }
}

impl From<AwsError> for QueueError {
    fn from(error: AwsError) -> Self {
        error.to_queue_error()
    }
}

// ============================================================================
// AWS SQS Provider
// ============================================================================

/// AWS SQS queue transport
///
/// The provider is thread-safe and can be shared across async tasks using `Arc`.
pub struct AwsSqsProvider {
    http_client: HttpClient,
    signer: SigV4Signer,
    endpoint: url::Url,
    request_timeout: Duration,
}

impl AwsSqsProvider {
    /// Create new AWS SQS provider
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid, no credentials can be
    /// found, or the HTTP client cannot be built.
    pub fn new(config: &AwsConfig) -> Result<Self, AwsError> {
        config
            .validate()
            .map_err(|e| AwsError::ConfigurationError(e.to_string()))?;

        let credentials = config
            .resolve_credentials()
            .map_err(|e| AwsError::ConfigurationError(e.to_string()))?;
        let signer = SigV4Signer::new(credentials, config.region.clone(), "sqs");

        let endpoint = url::Url::parse(&config.sqs_endpoint())
            .map_err(|e| AwsError::ConfigurationError(format!("Invalid SQS endpoint: {}", e)))?;

        let http_client = HttpClient::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AwsError::NetworkError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            signer,
            endpoint,
            request_timeout: config.request_timeout,
        })
    }

    /// Make a signed Query API call and return the XML response body
    async fn make_request(
        &self,
        action: &str,
        mut params: Vec<(String, String)>,
    ) -> Result<String, AwsError> {
        params.insert(0, ("Action".to_string(), action.to_string()));
        params.push(("Version".to_string(), API_VERSION.to_string()));

        let body = encode_form(&params);
        let payload_hash = sha256_hex(body.as_bytes());
        let host = host_header(&self.endpoint);
        let extra_headers = vec![("content-type".to_string(), FORM_CONTENT_TYPE.to_string())];

        let signed = self.signer.sign(
            &SigningRequest {
                method: "POST",
                host: &host,
                path: self.endpoint.path(),
                query: &[],
                headers: &extra_headers,
                payload_hash: &payload_hash,
            },
            &Utc::now(),
        );

        let mut request = self
            .http_client
            .post(self.endpoint.clone())
            .header("content-type", FORM_CONTENT_TYPE);
        for (key, value) in signed {
            request = request.header(key, value);
        }

        let response = request.body(body).send().await.map_err(|e| {
            if e.is_timeout() {
                AwsError::Timeout(self.request_timeout)
            } else if e.is_connect() {
                AwsError::NetworkError(format!("Connection failed: {}", e))
            } else {
                AwsError::NetworkError(format!("HTTP request failed: {}", e))
            }
        })?;

        let status = response.status();
        let response_body = response
            .text()
            .await
            .map_err(|e| AwsError::NetworkError(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(Self::parse_error_response(&response_body, status.as_u16()));
        }

        Ok(response_body)
    }

    /// Parse error response from XML
    fn parse_error_response(xml: &str, status_code: u16) -> AwsError {
        let (code, message) = parse_error(xml)
            .unwrap_or_else(|| (format!("Http{}", status_code), xml.trim().to_string()));

        match code.as_str() {
            "InvalidClientTokenId"
            | "UnrecognizedClientException"
            | "SignatureDoesNotMatch"
            | "MissingAuthenticationToken"
            | "ExpiredToken" => AwsError::Authentication(format!("{}: {}", code, message)),
            "AccessDenied" | "AccessDeniedException" => AwsError::AccessDenied(message),
            _ if status_code == 401 => AwsError::Authentication(format!("{}: {}", code, message)),
            _ => AwsError::ServiceError { code, message },
        }
    }

    /// Parse SendMessage XML response
    fn parse_send_message_response(xml: &str) -> Result<MessageId, AwsError> {
        let root = XmlElement::parse(xml)?;
        let id = root
            .find_text("MessageId")
            .ok_or_else(|| SerializationError::MissingElement {
                element: "MessageId".to_string(),
            })?;

        MessageId::from_str(id.trim()).map_err(|e| {
            AwsError::SerializationError(SerializationError::MalformedResponse {
                message: e.to_string(),
            })
        })
    }

    /// Parse ReceiveMessage XML response
    fn parse_receive_message_response(xml: &str) -> Result<Vec<ReceivedMessage>, AwsError> {
        let root = XmlElement::parse(xml)?;
        let mut messages = Vec::new();

        for element in root.descendants("Message") {
            let (Some(message_id), Some(receipt_handle), Some(body)) = (
                element.child_text("MessageId"),
                element.child_text("ReceiptHandle"),
                element.child_text("Body"),
            ) else {
                return Err(SerializationError::MissingElement {
                    element: "Message/MessageId|ReceiptHandle|Body".to_string(),
                }
                .into());
            };

            let mut attributes = HashMap::new();
            for attribute in element.children.iter().filter(|c| c.name == "Attribute") {
                if let (Some(name), Some(value)) =
                    (attribute.child_text("Name"), attribute.child_text("Value"))
                {
                    attributes.insert(name.to_string(), value.to_string());
                }
            }

            messages.push(ReceivedMessage {
                message_id: MessageId::from_str(message_id.trim()).map_err(|e| {
                    SerializationError::MalformedResponse {
                        message: e.to_string(),
                    }
                })?,
                receipt_handle: ReceiptHandle::new(receipt_handle.trim().to_string()),
                body: Bytes::from(body.to_string()),
                attributes,
            });
        }

        Ok(messages)
    }

    /// Parse a batch response, mapping positional batch ids back to message ids
    fn parse_batch_response(
        xml: &str,
        result_entry: &str,
        ids: &[MessageId],
    ) -> Result<BatchOutcome, AwsError> {
        let root = XmlElement::parse(xml)?;
        let lookup = |batch_id: &str| -> Result<MessageId, AwsError> {
            batch_id
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(|index| ids.get(index).cloned())
                .ok_or_else(|| {
                    AwsError::SerializationError(SerializationError::MalformedResponse {
                        message: format!("Unknown batch entry id '{}'", batch_id),
                    })
                })
        };

        let mut outcome = BatchOutcome::default();

        for entry in root.descendants(result_entry) {
            let batch_id = entry.child_text("Id").unwrap_or_default();
            outcome.successful.push(lookup(batch_id)?);
        }

        for entry in root.descendants("BatchResultErrorEntry") {
            let batch_id = entry.child_text("Id").unwrap_or_default();
            outcome.failed.push(BatchEntryFailure {
                id: lookup(batch_id)?,
                code: entry.child_text("Code").unwrap_or("Unknown").trim().to_string(),
                message: entry.child_text("Message").unwrap_or_default().to_string(),
                sender_fault: entry
                    .child_text("SenderFault")
                    .map(|v| v.trim() == "true")
                    .unwrap_or(false),
            });
        }

        Ok(outcome)
    }

    /// Parse GetQueueAttributes XML response
    fn parse_attributes_response(xml: &str) -> Result<HashMap<String, String>, AwsError> {
        let root = XmlElement::parse(xml)?;
        let mut attributes = HashMap::new();

        for attribute in root.descendants("Attribute") {
            if let (Some(name), Some(value)) =
                (attribute.child_text("Name"), attribute.child_text("Value"))
            {
                attributes.insert(name.to_string(), value.to_string());
            }
        }

        Ok(attributes)
    }

    fn check_batch_size(len: usize) -> Result<(), QueueError> {
        if len > MAX_BATCH_SIZE {
            return Err(QueueError::BatchTooLarge {
                size: len,
                max_size: MAX_BATCH_SIZE,
            });
        }
        Ok(())
    }
}

impl fmt::Debug for AwsSqsProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsSqsProvider")
            .field("endpoint", &self.endpoint.as_str())
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Form-encode parameters in the given order
fn encode_form(params: &[(String, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

#[async_trait]
impl QueueTransport for AwsSqsProvider {
    #[instrument(skip(self, request), fields(queue = %queue_url.queue_name()))]
    async fn send_message(
        &self,
        queue_url: &QueueUrl,
        request: SendRequest,
    ) -> Result<MessageId, QueueError> {
        let max_size = ProviderType::AwsSqs.max_message_size();
        if request.body.len() > max_size {
            return Err(QueueError::MessageTooLarge {
                size: request.body.len(),
                max_size,
            });
        }

        let body = String::from_utf8(request.body.to_vec())
            .map_err(|_| QueueError::SerializationError(SerializationError::InvalidUtf8))?;

        let mut params = vec![
            ("QueueUrl".to_string(), queue_url.as_str().to_string()),
            ("MessageBody".to_string(), body),
        ];
        if let Some(group_id) = request.message_group_id {
            params.push(("MessageGroupId".to_string(), group_id));
        }
        if let Some(deduplication_id) = request.deduplication_id {
            params.push(("MessageDeduplicationId".to_string(), deduplication_id));
        }
        if let Some(delay) = request.delay_seconds {
            params.push(("DelaySeconds".to_string(), delay.to_string()));
        }

        let response = self.make_request("SendMessage", params).await?;
        let message_id = Self::parse_send_message_response(&response)?;

        debug!(message_id = %message_id, "Message sent");
        Ok(message_id)
    }

    #[instrument(skip(self, request), fields(queue = %queue_url.queue_name()))]
    async fn receive_messages(
        &self,
        queue_url: &QueueUrl,
        request: &ReceiveRequest,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let mut params = vec![
            ("QueueUrl".to_string(), queue_url.as_str().to_string()),
            (
                "MaxNumberOfMessages".to_string(),
                request.max_messages.clamp(1, MAX_BATCH_SIZE as u32).to_string(),
            ),
            (
                "WaitTimeSeconds".to_string(),
                request.wait_time_seconds.min(20).to_string(),
            ),
            ("AttributeName.1".to_string(), "All".to_string()),
        ];
        if let Some(visibility_timeout) = request.visibility_timeout_seconds {
            params.push((
                "VisibilityTimeout".to_string(),
                visibility_timeout.to_string(),
            ));
        }

        let response = self.make_request("ReceiveMessage", params).await?;
        let messages = Self::parse_receive_message_response(&response)?;

        debug!(count = messages.len(), "Messages received");
        Ok(messages)
    }

    #[instrument(skip(self, entries), fields(queue = %queue_url.queue_name(), count = entries.len()))]
    async fn change_visibility_batch(
        &self,
        queue_url: &QueueUrl,
        entries: &[VisibilityEntry],
    ) -> Result<BatchOutcome, QueueError> {
        if entries.is_empty() {
            return Ok(BatchOutcome::default());
        }
        Self::check_batch_size(entries.len())?;

        let mut params = vec![("QueueUrl".to_string(), queue_url.as_str().to_string())];
        for (index, entry) in entries.iter().enumerate() {
            let prefix = format!("ChangeMessageVisibilityBatchRequestEntry.{}", index + 1);
            params.push((format!("{}.Id", prefix), index.to_string()));
            params.push((
                format!("{}.ReceiptHandle", prefix),
                entry.receipt_handle.as_str().to_string(),
            ));
            params.push((
                format!("{}.VisibilityTimeout", prefix),
                entry.visibility_timeout_seconds.to_string(),
            ));
        }

        let response = self
            .make_request("ChangeMessageVisibilityBatch", params)
            .await?;
        let ids: Vec<MessageId> = entries.iter().map(|e| e.id.clone()).collect();

        Ok(Self::parse_batch_response(
            &response,
            "ChangeMessageVisibilityBatchResultEntry",
            &ids,
        )?)
    }

    #[instrument(skip(self, entries), fields(queue = %queue_url.queue_name(), count = entries.len()))]
    async fn delete_message_batch(
        &self,
        queue_url: &QueueUrl,
        entries: &[DeleteEntry],
    ) -> Result<BatchOutcome, QueueError> {
        if entries.is_empty() {
            return Ok(BatchOutcome::default());
        }
        Self::check_batch_size(entries.len())?;

        let mut params = vec![("QueueUrl".to_string(), queue_url.as_str().to_string())];
        for (index, entry) in entries.iter().enumerate() {
            let prefix = format!("DeleteMessageBatchRequestEntry.{}", index + 1);
            params.push((format!("{}.Id", prefix), index.to_string()));
            params.push((
                format!("{}.ReceiptHandle", prefix),
                entry.receipt_handle.as_str().to_string(),
            ));
        }

        let response = self.make_request("DeleteMessageBatch", params).await?;
        let ids: Vec<MessageId> = entries.iter().map(|e| e.id.clone()).collect();

        Ok(Self::parse_batch_response(
            &response,
            "DeleteMessageBatchResultEntry",
            &ids,
        )?)
    }

    async fn get_queue_attributes(
        &self,
        queue_url: &QueueUrl,
        attribute_names: &[String],
    ) -> Result<HashMap<String, String>, QueueError> {
        let mut params = vec![("QueueUrl".to_string(), queue_url.as_str().to_string())];
        if attribute_names.is_empty() {
            params.push(("AttributeName.1".to_string(), "All".to_string()));
        }
        for (index, name) in attribute_names.iter().enumerate() {
            params.push((format!("AttributeName.{}", index + 1), name.clone()));
        }

        let response = self.make_request("GetQueueAttributes", params).await?;
        Ok(Self::parse_attributes_response(&response)?)
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::AwsSqs
    }
}
