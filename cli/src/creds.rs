//! Credential construction from configuration

use anyhow::{Context, Result, bail};
use serde_json::Value;
use shakehand_protocol::Claims;
use shakehand_store::{DirStore, SharedKvStore};
use shakehand_transport::{
    AuthInfo, BoxedCredentials, ClaimsValidator, DynamicCertCredentials, HandshakeCredentials,
    HandshakeOptions, HttpMetadataSource, InstanceIdentityCredentials, SharedMetadataSource,
    StaticMetadataSource, TracingReporter,
};
use std::sync::Arc;
use std::time::SystemTime;

use crate::config::{Mode, ShakehandConfig};

/// Accepts claims carrying `key`; the claim's value is the identity
#[derive(Debug, Clone)]
pub struct RequiredKey(pub String);

impl ClaimsValidator for RequiredKey {
    fn validate(&self, claims: &Claims) -> Result<Value, String> {
        claims
            .get(&self.0)
            .cloned()
            .ok_or_else(|| format!("no {}", self.0))
    }
}

fn options(config: &ShakehandConfig) -> HandshakeOptions {
    HandshakeOptions::new()
        .with_error_reporter(Arc::new(TracingReporter))
        .with_metrics_reporter(Arc::new(TracingReporter))
        .with_max_frame_size(config.handshake.max_frame_size)
}

async fn open_store(config: &ShakehandConfig) -> Result<SharedKvStore> {
    let store = DirStore::open(&config.store.path)
        .await
        .with_context(|| format!("opening store at {}", config.store.path.display()))?;
    Ok(Arc::new(store))
}

pub async fn server_credentials(config: &ShakehandConfig) -> Result<BoxedCredentials> {
    let creds: BoxedCredentials = match config.server.mode {
        Mode::Claims => Box::new(
            HandshakeCredentials::server(RequiredKey(config.claims.required_key.clone()))
                .with_options(options(config)),
        ),
        Mode::DynamicCert => {
            let store = open_store(config).await?;
            let valid_until = SystemTime::now() + config.dynamic_cert.validity();
            Box::new(DynamicCertCredentials::server(store, &config.server.address, valid_until).await?)
        }
        Mode::InstanceIdentity => {
            let creds = match &config.instance_identity.root_certificate {
                Some(path) => {
                    let pem = tokio::fs::read(path)
                        .await
                        .with_context(|| format!("reading root certificate {}", path.display()))?;
                    InstanceIdentityCredentials::server_from_pem(&pem)?
                }
                None => InstanceIdentityCredentials::server_default()?,
            };
            Box::new(creds.with_options(options(config)))
        }
    };
    Ok(creds)
}

pub async fn client_credentials(config: &ShakehandConfig) -> Result<BoxedCredentials> {
    let creds: BoxedCredentials = match config.server.mode {
        Mode::Claims => Box::new(
            HandshakeCredentials::client(config.claims.send.clone()).with_options(options(config)),
        ),
        Mode::DynamicCert => Box::new(DynamicCertCredentials::client(open_store(config).await?)),
        Mode::InstanceIdentity => Box::new(
            InstanceIdentityCredentials::client(metadata_source(config).await?)
                .with_options(options(config)),
        ),
    };
    Ok(creds)
}

async fn metadata_source(config: &ShakehandConfig) -> Result<SharedMetadataSource> {
    let section = &config.instance_identity;
    match (&section.document_path, &section.signature_path) {
        (Some(doc), Some(sig)) => {
            let document = tokio::fs::read(doc)
                .await
                .with_context(|| format!("reading {}", doc.display()))?;
            let signature = tokio::fs::read(sig)
                .await
                .with_context(|| format!("reading {}", sig.display()))?;
            Ok(Arc::new(StaticMetadataSource::new(document, signature)))
        }
        (None, None) => Ok(Arc::new(HttpMetadataSource::new(section.metadata_config())?)),
        _ => bail!("document_path and signature_path must be set together"),
    }
}

/// One-line summary of an established identity
pub fn describe(info: Option<&AuthInfo>) -> String {
    let Some(info) = info else {
        return "no identity".to_string();
    };

    if let Some(identity) = info.handshake_identity() {
        return format!("claims identity {}", identity);
    }
    if let Some(doc) = info.instance_identity() {
        return format!(
            "instance {} (account {}, {})",
            doc.instance_id, doc.account_id, doc.availability_zone
        );
    }
    if let Some(tls) = info.tls_info() {
        return format!("{} session", tls.protocol_version);
    }
    info.auth_type().to_string()
}
