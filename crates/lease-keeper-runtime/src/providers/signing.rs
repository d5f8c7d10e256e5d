//! AWS Signature Version 4 request signing shared by the SQS and S3 providers.
//!
//! Implements the AWS Signature V4 signing process:
//! 1. Create canonical request (method, URI, query, headers, payload hash)
//! 2. Create string to sign (algorithm, timestamp, scope, request hash)
//! 3. Derive signing key (4-level HMAC chain)
//! 4. Calculate signature and build Authorization header
//!
//! ## References
//!
//! - [AWS Signature V4](https://docs.aws.amazon.com/general/latest/gr/signature-version-4.html)

use crate::provider::AwsCredentials;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Hash of an empty payload
pub const EMPTY_PAYLOAD_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Hex-encoded SHA-256 digest
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// The parts of an HTTP request covered by the signature
#[derive(Debug, Clone)]
pub struct SigningRequest<'a> {
    pub method: &'a str,
    /// Host header value, including the port when it is not the default
    pub host: &'a str,
    /// Already URI-encoded path
    pub path: &'a str,
    /// Unencoded query parameters
    pub query: &'a [(String, String)],
    /// Extra headers to sign besides `host` and `x-amz-date`
    pub headers: &'a [(String, String)],
    /// Hex SHA-256 of the body
    pub payload_hash: &'a str,
}

/// AWS Signature Version 4 signer for request authentication
#[derive(Debug, Clone)]
pub struct SigV4Signer {
    credentials: AwsCredentials,
    region: String,
    service: String,
}

impl SigV4Signer {
    /// Create new signer for a service (`sqs`, `s3`) in a region
    pub fn new(credentials: AwsCredentials, region: String, service: &str) -> Self {
        Self {
            credentials,
            region,
            service: service.to_string(),
        }
    }

    /// Sign a request
    ///
    /// Returns the headers to add to the request: `authorization`,
    /// `x-amz-date` and, for temporary credentials, `x-amz-security-token`.
    pub fn sign(
        &self,
        request: &SigningRequest<'_>,
        timestamp: &DateTime<Utc>,
    ) -> Vec<(String, String)> {
        let date_stamp = timestamp.format("%Y%m%d").to_string();
        let amz_date = timestamp.format("%Y%m%dT%H%M%SZ").to_string();

        let mut headers: Vec<(String, String)> = request
            .headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.trim().to_string()))
            .collect();
        headers.push(("host".to_string(), request.host.to_string()));
        headers.push(("x-amz-date".to_string(), amz_date.clone()));
        if let Some(token) = &self.credentials.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort();

        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();
        let signed_headers = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            request.method,
            request.path,
            canonical_query_string(request.query),
            canonical_headers,
            signed_headers,
            request.payload_hash
        );

        let credential_scope = format!(
            "{}/{}/{}/aws4_request",
            date_stamp, self.region, self.service
        );
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            amz_date,
            credential_scope,
            sha256_hex(canonical_request.as_bytes())
        );

        let signing_key = self.signing_key(&date_stamp);
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

        let authorization = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM, self.credentials.access_key_id, credential_scope, signed_headers, signature
        );

        let mut result = vec![
            ("authorization".to_string(), authorization),
            ("x-amz-date".to_string(), amz_date),
        ];
        if let Some(token) = &self.credentials.session_token {
            result.push(("x-amz-security-token".to_string(), token.clone()));
        }
        result
    }

    /// Derive the signing key for a date
    ///
    /// kSecret = "AWS4" + secret, then HMAC over date, region, service and
    /// the literal `aws4_request`.
    pub(crate) fn signing_key(&self, date_stamp: &str) -> Vec<u8> {
        let k_secret = format!("AWS4{}", self.credentials.secret_access_key());
        let k_date = hmac_sha256(k_secret.as_bytes(), date_stamp.as_bytes());
        let k_region = hmac_sha256(&k_date, self.region.as_bytes());
        let k_service = hmac_sha256(&k_region, self.service.as_bytes());
        hmac_sha256(&k_service, b"aws4_request")
    }
}

/// Sorted, URI-encoded query string
pub fn canonical_query_string(query: &[(String, String)]) -> String {
    let mut pairs: Vec<(String, String)> = query
        .iter()
        .map(|(k, v)| {
            (
                urlencoding::encode(k).into_owned(),
                urlencoding::encode(v).into_owned(),
            )
        })
        .collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Host header value for a URL
pub fn host_header(url: &url::Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

/// Compute HMAC-SHA256
fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

#[cfg(test)]
#[path = "signing_tests.rs"]
mod tests;
