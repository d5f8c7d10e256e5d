//! S3 object store for offloaded message bodies, using the S3 REST API.
//!
//! Objects are addressed virtual-hosted style (`{bucket}.s3.{region}.amazonaws.com`)
//! unless an endpoint override is configured, in which case path-style
//! addressing (`{endpoint}/{bucket}/{key}`) is used as most S3-compatible
//! emulators expect.

use crate::client::ObjectStore;
use crate::error::StorageError;
use crate::provider::AwsConfig;
use crate::providers::signing::{
    host_header, sha256_hex, SigV4Signer, SigningRequest, EMPTY_PAYLOAD_SHA256,
};
use crate::providers::xml::{parse_error, XmlElement};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use chrono::Utc;
use reqwest::{Client as HttpClient, Method};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "s3_tests.rs"]
mod tests;

/// Maximum number of keys accepted by one DeleteObjects call
pub const MAX_DELETE_KEYS: usize = 1000;

/// S3-backed object store
pub struct S3ObjectStore {
    http_client: HttpClient,
    signer: SigV4Signer,
    bucket: String,
    base_url: url::Url,
    path_style: bool,
    request_timeout: Duration,
}

impl S3ObjectStore {
    /// Create new object store for a bucket
    pub fn new(config: &AwsConfig, bucket: impl Into<String>) -> Result<Self, StorageError> {
        let bucket = bucket.into();
        if bucket.is_empty() {
            return Err(StorageError::Configuration {
                message: "Bucket name cannot be empty".to_string(),
            });
        }

        config.validate().map_err(|e| StorageError::Configuration {
            message: e.to_string(),
        })?;
        let credentials = config
            .resolve_credentials()
            .map_err(|e| StorageError::Configuration {
                message: e.to_string(),
            })?;

        let (base, path_style) = match &config.s3_endpoint {
            Some(endpoint) => (endpoint.trim_end_matches('/').to_string(), true),
            None => (
                format!("https://{}.s3.{}.amazonaws.com", bucket, config.region),
                false,
            ),
        };
        let base_url = url::Url::parse(&base).map_err(|e| StorageError::Configuration {
            message: format!("Invalid S3 endpoint: {}", e),
        })?;

        let http_client = HttpClient::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| StorageError::ConnectionFailed {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            http_client,
            signer: SigV4Signer::new(credentials, config.region.clone(), "s3"),
            bucket,
            base_url,
            path_style,
            request_timeout: config.request_timeout,
        })
    }

    /// Bucket this store writes to
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// URL of an object, or of the bucket itself for `None`
    fn url_for(&self, key: Option<&str>) -> url::Url {
        let mut path = String::new();
        if self.path_style {
            path.push('/');
            path.push_str(&urlencoding::encode(&self.bucket));
        }
        path.push('/');
        if let Some(key) = key {
            let encoded: Vec<String> = key
                .split('/')
                .map(|segment| urlencoding::encode(segment).into_owned())
                .collect();
            path.push_str(&encoded.join("/"));
        }

        let mut url = self.base_url.clone();
        url.set_path(&path);
        url
    }

    /// Send a signed request and return status and body
    async fn send(
        &self,
        method: Method,
        url: url::Url,
        query: &[(String, String)],
        mut headers: Vec<(String, String)>,
        body: Option<Bytes>,
    ) -> Result<(u16, Bytes), StorageError> {
        let payload_hash = match &body {
            Some(body) => sha256_hex(body),
            None => EMPTY_PAYLOAD_SHA256.to_string(),
        };
        headers.push(("x-amz-content-sha256".to_string(), payload_hash.clone()));

        let mut url = url;
        if !query.is_empty() {
            // S3 sub-resources such as `?delete` are sent without a value.
            let query_string = query
                .iter()
                .map(|(k, v)| {
                    if v.is_empty() {
                        urlencoding::encode(k).into_owned()
                    } else {
                        format!("{}={}", urlencoding::encode(k), urlencoding::encode(v))
                    }
                })
                .collect::<Vec<_>>()
                .join("&");
            url.set_query(Some(&query_string));
        }

        let host = host_header(&url);
        let signed = self.signer.sign(
            &SigningRequest {
                method: method.as_str(),
                host: &host,
                path: url.path(),
                query,
                headers: &headers,
                payload_hash: &payload_hash,
            },
            &Utc::now(),
        );

        let mut request = self.http_client.request(method, url);
        for (key, value) in headers.into_iter().chain(signed) {
            request = request.header(key, value);
        }
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                StorageError::ConnectionFailed {
                    message: format!("Request timed out after {:?}", self.request_timeout),
                }
            } else {
                StorageError::ConnectionFailed {
                    message: format!("HTTP request failed: {}", e),
                }
            }
        })?;

        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| StorageError::ConnectionFailed {
                message: format!("Failed to read response body: {}", e),
            })?;

        Ok((status, bytes))
    }

    /// Map a non-success response to a storage error
    fn map_error(status: u16, body: &[u8], key: &str) -> StorageError {
        let text = String::from_utf8_lossy(body);
        let (code, message) =
            parse_error(&text).unwrap_or_else(|| (format!("Http{}", status), String::new()));

        match code.as_str() {
            "NoSuchKey" => StorageError::ObjectNotFound {
                key: key.to_string(),
            },
            "InvalidAccessKeyId" | "SignatureDoesNotMatch" | "ExpiredToken" => {
                StorageError::AuthenticationFailed {
                    message: format!("{}: {}", code, message),
                }
            }
            "AccessDenied" => StorageError::PermissionDenied {
                operation: key.to_string(),
            },
            "SlowDown" => StorageError::Throttled { message },
            _ if status == 404 => StorageError::ObjectNotFound {
                key: key.to_string(),
            },
            _ if status == 503 => StorageError::Throttled { message },
            _ => StorageError::ServiceError { code, message },
        }
    }

    /// Build the DeleteObjects request document
    fn delete_document(keys: &[String]) -> String {
        let mut xml = String::from("<Delete><Quiet>true</Quiet>");
        for key in keys {
            xml.push_str("<Object><Key>");
            xml.push_str(&quick_xml::escape::escape(key.as_str()));
            xml.push_str("</Key></Object>");
        }
        xml.push_str("</Delete>");
        xml
    }

    /// Count the per-key errors in a DeleteObjects result
    fn count_delete_errors(body: &[u8]) -> Result<usize, StorageError> {
        let text = String::from_utf8_lossy(body);
        let root = XmlElement::parse(&text).map_err(|e| StorageError::ServiceError {
            code: "MalformedResponse".to_string(),
            message: e.to_string(),
        })?;

        let errors = root.descendants("Error");
        for error in &errors {
            warn!(
                key = error.child_text("Key").unwrap_or_default(),
                code = error.child_text("Code").unwrap_or_default(),
                "Object could not be deleted"
            );
        }
        Ok(errors.len())
    }
}

impl fmt::Debug for S3ObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3ObjectStore")
            .field("bucket", &self.bucket)
            .field("base_url", &self.base_url.as_str())
            .field("path_style", &self.path_style)
            .finish()
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let size = body.len();
        let headers = vec![("content-type".to_string(), content_type.to_string())];
        let (status, response) = self
            .send(Method::PUT, self.url_for(Some(key)), &[], headers, Some(body))
            .await?;

        if !(200..300).contains(&status) {
            return Err(Self::map_error(status, &response, key));
        }

        debug!(bucket = %self.bucket, key = %key, size, "Object stored");
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Bytes, StorageError> {
        let (status, response) = self
            .send(Method::GET, self.url_for(Some(key)), &[], Vec::new(), None)
            .await?;

        if !(200..300).contains(&status) {
            return Err(Self::map_error(status, &response, key));
        }

        debug!(bucket = %self.bucket, key = %key, size = response.len(), "Object fetched");
        Ok(response)
    }

    async fn delete_objects(&self, keys: &[String]) -> Result<(), StorageError> {
        let mut failed = 0;

        for chunk in keys.chunks(MAX_DELETE_KEYS) {
            let document = Bytes::from(Self::delete_document(chunk));
            let checksum = STANDARD.encode(Sha256::digest(&document));
            let headers = vec![
                ("content-type".to_string(), "application/xml".to_string()),
                ("x-amz-checksum-sha256".to_string(), checksum),
            ];
            let query = vec![("delete".to_string(), String::new())];

            let (status, response) = self
                .send(Method::POST, self.url_for(None), &query, headers, Some(document))
                .await?;

            if !(200..300).contains(&status) {
                return Err(Self::map_error(status, &response, &self.bucket));
            }

            failed += Self::count_delete_errors(&response)?;
        }

        if failed > 0 {
            return Err(StorageError::PartialDelete {
                requested: keys.len(),
                failed,
            });
        }

        debug!(bucket = %self.bucket, count = keys.len(), "Objects deleted");
        Ok(())
    }
}
