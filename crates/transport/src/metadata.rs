//! Instance metadata client
//!
//! Fetches the instance identity document and its detached signature. The
//! metadata endpoint is often briefly unreachable right after boot, so
//! transport failures are retried; an HTTP error status is final.

use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_DOCUMENT_URL: &str =
    "http://169.254.169.254/latest/dynamic/instance-identity/document";
pub const DEFAULT_SIGNATURE_URL: &str =
    "http://169.254.169.254/latest/dynamic/instance-identity/pkcs7";

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Fetching {url} failed after {attempts} attempts: {last_error}")]
    Exhausted {
        url: String,
        attempts: u32,
        last_error: String,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Metadata client error: {0}")]
    Client(String),
}

/// A document and its base64 signature, byte-for-byte as served
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedDocument {
    pub document: Vec<u8>,
    pub signature: Vec<u8>,
}

#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn fetch_identity(&self) -> Result<SignedDocument, MetadataError>;
}

pub type SharedMetadataSource = Arc<dyn MetadataSource>;

#[derive(Debug, Clone)]
pub struct MetadataConfig {
    pub document_url: String,

    pub signature_url: String,

    /// Total tries per URL, including the first
    pub max_attempts: u32,

    /// Pause between tries
    pub retry_delay: Duration,

    /// Per-request timeout
    pub request_timeout: Duration,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            document_url: DEFAULT_DOCUMENT_URL.to_string(),
            signature_url: DEFAULT_SIGNATURE_URL.to_string(),
            max_attempts: 10,
            retry_delay: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
        }
    }
}

pub struct HttpMetadataSource {
    client: Client,
    config: MetadataConfig,
}

impl HttpMetadataSource {
    pub fn new(config: MetadataConfig) -> Result<Self, MetadataError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| MetadataError::Client(e.to_string()))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &MetadataConfig {
        &self.config
    }

    async fn get(&self, url: &str) -> Result<Vec<u8>, MetadataError> {
        let attempts = self.config.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        return Err(MetadataError::Status {
                            url: url.to_string(),
                            status: status.as_u16(),
                        });
                    }

                    match response.bytes().await {
                        Ok(body) => {
                            debug!("Fetched {} ({} bytes)", url, body.len());
                            return Ok(body.to_vec());
                        }
                        Err(e) => last_error = e.to_string(),
                    }
                }
                Err(e) => last_error = e.to_string(),
            }

            warn!("Fetching {} failed (attempt {}/{}): {}", url, attempt, attempts, last_error);

            if attempt < attempts {
                tokio::time::sleep(self.config.retry_delay).await;
            }
        }

        Err(MetadataError::Exhausted {
            url: url.to_string(),
            attempts,
            last_error,
        })
    }
}

#[async_trait]
impl MetadataSource for HttpMetadataSource {
    async fn fetch_identity(&self) -> Result<SignedDocument, MetadataError> {
        let document = self.get(&self.config.document_url).await?;
        let signature = self.get(&self.config.signature_url).await?;
        Ok(SignedDocument {
            document,
            signature,
        })
    }
}

/// Serves a fixed document, for hosts without a metadata endpoint
#[derive(Debug, Clone)]
pub struct StaticMetadataSource {
    signed: SignedDocument,
}

impl StaticMetadataSource {
    pub fn new(document: impl Into<Vec<u8>>, signature: impl Into<Vec<u8>>) -> Self {
        Self {
            signed: SignedDocument {
                document: document.into(),
                signature: signature.into(),
            },
        }
    }
}

#[async_trait]
impl MetadataSource for StaticMetadataSource {
    async fn fetch_identity(&self) -> Result<SignedDocument, MetadataError> {
        Ok(self.signed.clone())
    }
}
