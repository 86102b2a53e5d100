//! CLI configuration

use anyhow::Result;
use serde::Deserialize;
use shakehand_protocol::{Claims, DEFAULT_MAX_FRAME_SIZE};
use shakehand_transport::{HandshakeConfig, MetadataConfig, DEFAULT_DOCUMENT_URL, DEFAULT_SIGNATURE_URL};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShakehandConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub handshake: HandshakeSection,

    #[serde(default)]
    pub claims: ClaimsConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub dynamic_cert: DynamicCertConfig,

    #[serde(default)]
    pub instance_identity: InstanceIdentityConfig,
}

impl ShakehandConfig {
    /// Load configuration from file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: ShakehandConfig = toml::from_str(&content)?;
        Ok(config)
    }
}

/// Which credential variant to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    #[default]
    Claims,
    DynamicCert,
    InstanceIdentity,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Address clients dial; also the store key for dynamic certificates
    #[serde(default = "default_address")]
    pub address: String,

    #[serde(default)]
    pub mode: Mode,
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 15611))
}

fn default_address() -> String {
    "127.0.0.1:15611".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            address: default_address(),
            mode: Mode::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HandshakeSection {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

impl Default for HandshakeSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

impl HandshakeSection {
    pub fn handshake_config(&self) -> HandshakeConfig {
        HandshakeConfig {
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClaimsConfig {
    /// Claims `probe` sends
    #[serde(default)]
    pub send: Claims,

    /// Claim the server requires; its value becomes the client identity
    #[serde(default = "default_required_key")]
    pub required_key: String,
}

fn default_required_key() -> String {
    "key".to_string()
}

impl Default for ClaimsConfig {
    fn default() -> Self {
        Self {
            send: Claims::new(),
            required_key: default_required_key(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Directory shared by servers and clients
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("shakehand-store")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DynamicCertConfig {
    /// Lifetime of a minted server certificate
    #[serde(default = "default_valid_days")]
    pub valid_days: u64,
}

fn default_valid_days() -> u64 {
    30
}

impl Default for DynamicCertConfig {
    fn default() -> Self {
        Self {
            valid_days: default_valid_days(),
        }
    }
}

impl DynamicCertConfig {
    pub fn validity(&self) -> Duration {
        Duration::from_secs(self.valid_days * 24 * 3600)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstanceIdentityConfig {
    /// PEM root certificate servers verify documents against, the provider's
    /// own root when unset
    #[serde(default)]
    pub root_certificate: Option<PathBuf>,

    #[serde(default = "default_document_url")]
    pub document_url: String,

    #[serde(default = "default_signature_url")]
    pub signature_url: String,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Present this document instead of querying the metadata endpoint
    #[serde(default)]
    pub document_path: Option<PathBuf>,

    /// Base64 signature accompanying `document_path`
    #[serde(default)]
    pub signature_path: Option<PathBuf>,
}

fn default_document_url() -> String {
    DEFAULT_DOCUMENT_URL.to_string()
}

fn default_signature_url() -> String {
    DEFAULT_SIGNATURE_URL.to_string()
}

fn default_max_attempts() -> u32 {
    10
}

fn default_retry_delay_ms() -> u64 {
    2000
}

impl Default for InstanceIdentityConfig {
    fn default() -> Self {
        Self {
            root_certificate: None,
            document_url: default_document_url(),
            signature_url: default_signature_url(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            document_path: None,
            signature_path: None,
        }
    }
}

impl InstanceIdentityConfig {
    pub fn metadata_config(&self) -> MetadataConfig {
        MetadataConfig {
            document_url: self.document_url.clone(),
            signature_url: self.signature_url.clone(),
            max_attempts: self.max_attempts,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            ..MetadataConfig::default()
        }
    }
}
