//! Provider types and configuration.

use crate::error::ConfigurationError;
use std::fmt;
use std::time::Duration;
use zeroize::Zeroizing;

/// Enumeration of supported providers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderType {
    AwsSqs,
    AwsS3,
    InMemory,
}

impl ProviderType {
    /// Get maximum inline message size for provider
    pub fn max_message_size(&self) -> usize {
        match self {
            Self::AwsSqs => 256 * 1024,       // 256KB
            Self::AwsS3 => 5 * 1024 * 1024 * 1024, // single PUT limit
            Self::InMemory => 10 * 1024 * 1024, // 10MB
        }
    }

    /// Name used in logs and provider errors
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwsSqs => "AwsSqs",
            Self::AwsS3 => "AwsS3",
            Self::InMemory => "InMemory",
        }
    }
}

/// Static AWS credentials
///
/// The secret key is wiped from memory on drop and never printed.
#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    secret_access_key: Zeroizing<String>,
    pub session_token: Option<String>,
}

impl AwsCredentials {
    /// Create credentials from explicit values
    pub fn new(
        access_key_id: String,
        secret_access_key: String,
        session_token: Option<String>,
    ) -> Self {
        Self {
            access_key_id,
            secret_access_key: Zeroizing::new(secret_access_key),
            session_token,
        }
    }

    /// Read credentials from the standard AWS environment variables
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read credentials through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let access_key_id = lookup("AWS_ACCESS_KEY_ID").filter(|v| !v.is_empty())?;
        let secret_access_key = lookup("AWS_SECRET_ACCESS_KEY").filter(|v| !v.is_empty())?;
        let session_token = lookup("AWS_SESSION_TOKEN").filter(|v| !v.is_empty());

        Some(Self::new(access_key_id, secret_access_key, session_token))
    }

    /// Get secret access key
    pub fn secret_access_key(&self) -> &str {
        self.secret_access_key.as_str()
    }
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Connection settings shared by the SQS and S3 providers
#[derive(Debug, Clone)]
pub struct AwsConfig {
    pub region: String,
    /// Explicit credentials; environment variables are used when absent
    pub credentials: Option<AwsCredentials>,
    /// SQS endpoint override (e.g. a local emulator)
    pub sqs_endpoint: Option<String>,
    /// S3 endpoint override; switches to path-style addressing
    pub s3_endpoint: Option<String>,
    pub request_timeout: Duration,
}

impl AwsConfig {
    /// Create configuration for a region with default endpoints
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            credentials: None,
            sqs_endpoint: None,
            s3_endpoint: None,
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Use explicit credentials
    pub fn with_credentials(mut self, credentials: AwsCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Override the SQS endpoint
    pub fn with_sqs_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.sqs_endpoint = Some(endpoint.into());
        self
    }

    /// Override the S3 endpoint
    pub fn with_s3_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.s3_endpoint = Some(endpoint.into());
        self
    }

    /// Effective SQS endpoint without trailing slash
    pub fn sqs_endpoint(&self) -> String {
        match &self.sqs_endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://sqs.{}.amazonaws.com", self.region),
        }
    }

    /// Credentials to sign with: explicit ones first, then the environment
    pub fn resolve_credentials(&self) -> Result<AwsCredentials, ConfigurationError> {
        if let Some(credentials) = &self.credentials {
            return Ok(credentials.clone());
        }

        AwsCredentials::from_env().ok_or_else(|| ConfigurationError::Missing {
            key: "AWS_ACCESS_KEY_ID/AWS_SECRET_ACCESS_KEY".to_string(),
        })
    }

    /// Validate settings before building a provider
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.region.is_empty() {
            return Err(ConfigurationError::Invalid {
                message: "Region cannot be empty".to_string(),
            });
        }

        for endpoint in [&self.sqs_endpoint, &self.s3_endpoint].into_iter().flatten() {
            url::Url::parse(endpoint).map_err(|e| ConfigurationError::Invalid {
                message: format!("Invalid endpoint '{}': {}", endpoint, e),
            })?;
        }

        Ok(())
    }
}

#[cfg(test)]
#[path = "provider_tests.rs"]
mod tests;
