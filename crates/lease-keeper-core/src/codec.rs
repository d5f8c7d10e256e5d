//! Large-body offload codec.
//!
//! Bodies above the configured threshold are written to the object store
//! under a fresh UUID key and replaced on the wire by the reference token
//! `s3:{key}`. On receive the token is swapped back for the stored content.

use crate::error::CodecError;
use bytes::Bytes;
use lease_keeper_runtime::ObjectStore;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;

/// Prefix marking a body as a reference to stored content
pub const REFERENCE_MARKER: &str = "s3:";

/// Content type of stored bodies
pub const CONTENT_TYPE: &str = "text/plain";

/// Body ready to be sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundBody {
    /// Sent as is
    Inline(Bytes),
    /// Stored externally; `reference` is sent in its place
    Externalized { reference: Bytes, key: String },
}

impl OutboundBody {
    /// Bytes to put on the wire
    pub fn wire_body(&self) -> &Bytes {
        match self {
            Self::Inline(body) => body,
            Self::Externalized { reference, .. } => reference,
        }
    }

    /// Object key when the body was externalized
    pub fn external_key(&self) -> Option<&str> {
        match self {
            Self::Inline(_) => None,
            Self::Externalized { key, .. } => Some(key),
        }
    }
}

/// Body after reference resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedBody {
    pub body: Bytes,
    /// Key of the stored content, kept for cleanup on delete
    pub external_key: Option<String>,
}

/// Extract the object key from a reference token
///
/// Only the marker followed by a well-formed UUID counts, so inline text that
/// merely starts with `s3:` is left alone.
pub fn parse_reference(body: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(body).ok()?;
    let key = text.strip_prefix(REFERENCE_MARKER)?;
    Uuid::parse_str(key).ok().map(|_| key.to_string())
}

/// Offloads large bodies to an [`ObjectStore`]
#[derive(Clone)]
pub struct OffloadCodec {
    store: Arc<dyn ObjectStore>,
}

impl OffloadCodec {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Externalize `body` when it is larger than `threshold` bytes
    ///
    /// A body that would be read back as a reference is externalized even
    /// below the threshold.
    pub async fn encode(&self, body: Bytes, threshold: usize) -> Result<OutboundBody, CodecError> {
        if body.len() <= threshold && parse_reference(&body).is_none() {
            return Ok(OutboundBody::Inline(body));
        }

        let key = Uuid::new_v4().to_string();
        let size = body.len();
        self.store
            .put_object(&key, body, CONTENT_TYPE)
            .await
            .map_err(|source| CodecError::StorageWriteFailed {
                key: key.clone(),
                source,
            })?;

        debug!(key = %key, size, "Message body offloaded");
        Ok(OutboundBody::Externalized {
            reference: Bytes::from(format!("{}{}", REFERENCE_MARKER, key)),
            key,
        })
    }

    /// Resolve a received body, fetching stored content for references
    pub async fn decode(&self, body: Bytes) -> Result<DecodedBody, CodecError> {
        let Some(key) = parse_reference(&body) else {
            return Ok(DecodedBody {
                body,
                external_key: None,
            });
        };

        let content = self
            .store
            .get_object(&key)
            .await
            .map_err(|source| CodecError::StorageReadFailed {
                key: key.clone(),
                source,
            })?;

        debug!(key = %key, size = content.len(), "Offloaded message body fetched");
        Ok(DecodedBody {
            body: content,
            external_key: Some(key),
        })
    }

    /// Delete stored bodies, logging failures
    pub async fn delete_external(&self, keys: &[String]) {
        if keys.is_empty() {
            return;
        }

        match self.store.delete_objects(keys).await {
            Ok(()) => debug!(count = keys.len(), "Offloaded message bodies deleted"),
            Err(e) => warn!(
                count = keys.len(),
                error = %e,
                "Failed to delete offloaded message bodies"
            ),
        }
    }
}

impl std::fmt::Debug for OffloadCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OffloadCodec").finish_non_exhaustive()
    }
}
