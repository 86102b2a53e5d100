//! Plain TLS credentials over rustls
//!
//! Used directly as an inner credential, and by the dynamic certificate
//! variant once it knows which certificate to trust.

use async_trait::async_trait;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
use rustls::{ClientConfig, CommonState, RootCertStore, ServerConfig};
use shakehand_crypto::{host_of, parse_pem_certificates};
use std::sync::Arc;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::{debug, error};

use crate::{
    AuthInfo, BoxedStream, HandshakeError, HandshakeOutput, ProtocolInfo, TlsInfo,
    TransportCredentials,
};

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn config_error(e: rustls::Error) -> HandshakeError {
    HandshakeError::Configuration(e.to_string())
}

#[derive(Clone)]
enum Side {
    Client(TlsConnector),
    Server(TlsAcceptor),
}

#[derive(Clone)]
pub struct TlsCredentials {
    side: Side,
    server_name_override: Option<String>,
}

impl TlsCredentials {
    /// Client trusting exactly the given roots
    pub fn client(roots: RootCertStore) -> Result<Self, HandshakeError> {
        let config = ClientConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()
            .map_err(config_error)?
            .with_root_certificates(roots)
            .with_no_client_auth();

        Ok(Self::client_with_config(Arc::new(config)))
    }

    /// Client trusting every certificate in a PEM bundle
    pub fn client_from_pem(pem: &[u8]) -> Result<Self, HandshakeError> {
        let certs = parse_pem_certificates(pem)?;
        if certs.is_empty() {
            return Err(HandshakeError::Configuration(
                "no certificates in trust bundle".to_string(),
            ));
        }
        Self::client(root_store(certs)?)
    }

    pub fn client_with_config(config: Arc<ClientConfig>) -> Self {
        Self {
            side: Side::Client(TlsConnector::from(config)),
            server_name_override: None,
        }
    }

    /// Server presenting `cert_chain` (leaf first) with a PKCS#8 key
    pub fn server(cert_chain: Vec<Vec<u8>>, private_key_pkcs8: Vec<u8>) -> Result<Self, HandshakeError> {
        let certs: Vec<CertificateDer<'static>> =
            cert_chain.into_iter().map(CertificateDer::from).collect();
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(private_key_pkcs8));

        let config = ServerConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()
            .map_err(config_error)?
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(config_error)?;

        Ok(Self::server_with_config(Arc::new(config)))
    }

    pub fn server_with_config(config: Arc<ServerConfig>) -> Self {
        Self {
            side: Side::Server(TlsAcceptor::from(config)),
            server_name_override: None,
        }
    }

    fn server_name(&self, authority: &str) -> Result<ServerName<'static>, HandshakeError> {
        let name = match &self.server_name_override {
            Some(name) => name.clone(),
            None => host_of(authority).to_string(),
        };
        ServerName::try_from(name.as_str())
            .map(|n| n.to_owned())
            .map_err(|e| HandshakeError::Configuration(format!("invalid server name: {}", e)))
    }
}

/// Root store holding exactly `certs`
pub fn root_store(certs: Vec<Vec<u8>>) -> Result<RootCertStore, HandshakeError> {
    let mut roots = RootCertStore::empty();
    for der in certs {
        roots.add(CertificateDer::from(der)).map_err(config_error)?;
    }
    Ok(roots)
}

fn session_info(state: &CommonState, server_name: Option<&str>) -> TlsInfo {
    TlsInfo {
        protocol_version: state
            .protocol_version()
            .map(|v| format!("{:?}", v))
            .unwrap_or_default(),
        peer_certificates: state
            .peer_certificates()
            .map(|certs| certs.iter().map(|c| c.to_vec()).collect())
            .unwrap_or_default(),
        server_name: server_name.map(str::to_string),
    }
}

#[async_trait]
impl TransportCredentials for TlsCredentials {
    async fn client_handshake(
        &self,
        authority: &str,
        conn: BoxedStream,
    ) -> Result<HandshakeOutput, HandshakeError> {
        let Side::Client(connector) = &self.side else {
            error!("TLS server credentials used to dial {}", authority);
            return Err(HandshakeError::Configuration(
                "server credentials used for a client handshake".to_string(),
            ));
        };

        let server_name = self.server_name(authority)?;
        let stream = connector.connect(server_name, conn).await?;

        let info = session_info(&stream.get_ref().1, None);
        debug!("TLS client handshake with {} done ({})", authority, info.protocol_version);

        Ok((Box::new(stream), Some(AuthInfo::Tls(info))))
    }

    async fn server_handshake(&self, conn: BoxedStream) -> Result<HandshakeOutput, HandshakeError> {
        let Side::Server(acceptor) = &self.side else {
            error!("TLS client credentials used to accept a connection");
            return Err(HandshakeError::Configuration(
                "client credentials used for a server handshake".to_string(),
            ));
        };

        let stream = acceptor.accept(conn).await?;

        let (_, session) = stream.get_ref();
        let info = session_info(session, session.server_name());
        debug!("TLS server handshake done ({})", info.protocol_version);

        Ok((Box::new(stream), Some(AuthInfo::Tls(info))))
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
