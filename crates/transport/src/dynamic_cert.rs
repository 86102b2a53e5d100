//! Dynamic certificate credentials
//!
//! A server mints a self-signed certificate for its address and publishes the
//! certificate (never the key) to a shared store. Clients look the address up
//! in the store on first dial and from then on trust exactly that certificate
//! for that address.

use async_trait::async_trait;
use dashmap::DashMap;
use shakehand_crypto::{mint_server_certificate, single_pem_certificate};
use shakehand_store::SharedKvStore;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::OnceCell;
use tracing::{debug, error, info};

use crate::tls::root_store;
use crate::{
    BoxedStream, HandshakeError, HandshakeOutput, ProtocolInfo, TlsCredentials,
    TransportCredentials,
};

/// Address → TLS client credentials trusting that address's certificate
type TrustCache = DashMap<String, Arc<OnceCell<TlsCredentials>>>;

#[derive(Clone)]
enum Role {
    Client {
        cache: Arc<TrustCache>,
    },
    Server {
        tls: TlsCredentials,
        address: String,
        fingerprint: String,
    },
}

#[derive(Clone)]
pub struct DynamicCertCredentials {
    store: SharedKvStore,
    role: Role,
    server_name_override: Option<String>,
}

impl DynamicCertCredentials {
    /// Mint a certificate for `address`, publish it, and serve with it
    ///
    /// Fails without publishing anything if minting fails.
    pub async fn server(
        store: SharedKvStore,
        address: &str,
        valid_until: SystemTime,
    ) -> Result<Self, HandshakeError> {
        let minted = mint_server_certificate(address, valid_until)?;
        let fingerprint = minted.fingerprint();

        let tls = TlsCredentials::server(
            vec![minted.certificate_der.clone()],
            minted.private_key_der.clone(),
        )?;

        store.put(address, minted.certificate_pem.as_bytes()).await?;

        info!("Published certificate for {} (sha256 {})", address, fingerprint);

        Ok(Self {
            store,
            role: Role::Server {
                tls,
                address: address.to_string(),
                fingerprint,
            },
            server_name_override: None,
        })
    }

    /// Client credentials resolving trust through `store`
    pub fn client(store: SharedKvStore) -> Self {
        Self {
            store,
            role: Role::Client {
                cache: Arc::new(TrustCache::new()),
            },
            server_name_override: None,
        }
    }

    /// Address the server certificate was published under
    pub fn address(&self) -> Option<&str> {
        match &self.role {
            Role::Server { address, .. } => Some(address),
            Role::Client { .. } => None,
        }
    }

    /// SHA-256 of the published certificate
    pub fn fingerprint(&self) -> Option<&str> {
        match &self.role {
            Role::Server { fingerprint, .. } => Some(fingerprint),
            Role::Client { .. } => None,
        }
    }

    /// Cached credentials for `authority`, fetching them on first use
    async fn trust_for(
        &self,
        cache: &TrustCache,
        authority: &str,
    ) -> Result<TlsCredentials, HandshakeError> {
        let cell = cache.entry(authority.to_string()).or_default().clone();
        let creds = cell.get_or_try_init(|| self.fetch_trust(authority)).await?;
        Ok(creds.clone())
    }

    async fn fetch_trust(&self, authority: &str) -> Result<TlsCredentials, HandshakeError> {
        let pem = self.store.get(authority).await?;
        let der = single_pem_certificate(&pem)?;
        let creds = TlsCredentials::client(root_store(vec![der])?)?;

        debug!("Loaded published certificate for {}", authority);

        Ok(creds)
    }
}

#[async_trait]
impl TransportCredentials for DynamicCertCredentials {
    async fn client_handshake(
        &self,
        authority: &str,
        conn: BoxedStream,
    ) -> Result<HandshakeOutput, HandshakeError> {
        let Role::Client { cache } = &self.role else {
            error!("Dynamic certificate server credentials used to dial {}", authority);
            return Err(HandshakeError::Configuration(
                "server credentials used for a client handshake".to_string(),
            ));
        };

        let mut tls = self.trust_for(cache, authority).await?;
        if let Some(name) = &self.server_name_override {
            tls.override_server_name(name)?;
        }

        tls.client_handshake(authority, conn).await
    }

    async fn server_handshake(&self, conn: BoxedStream) -> Result<HandshakeOutput, HandshakeError> {
        let Role::Server { tls, .. } = &self.role else {
            error!("Dynamic certificate client credentials used to accept a connection");
            return Err(HandshakeError::Configuration(
                "client credentials used for a server handshake".to_string(),
            ));
        };

        tls.server_handshake(conn).await
    }

    fn info(&self) -> ProtocolInfo {
        ProtocolInfo::new("tls", "1.2")
    }

    fn box_clone(&self) -> Box<dyn TransportCredentials> {
        Box::new(self.clone())
    }

    fn override_server_name(&mut self, name: &str) -> Result<(), HandshakeError> {
        self.server_name_override = Some(name.to_string());
        Ok(())
    }
}
