//! Instance identity credentials
//!
//! The client presents the provider-signed identity document of the instance
//! it runs on. The server checks the signature against a single fixed root
//! certificate, by default the provider's own, and answers with an explicit
//! verdict frame.

use async_trait::async_trait;
use shakehand_crypto::{DocumentVerifier, InvalidDocument};
use shakehand_protocol::{
    HandshakeResponse, IdentityHandshake, InstanceIdentityDocument, read_frame, write_frame,
};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::credentials::{close, wrapped_client_handshake, wrapped_server_handshake};
use crate::reporters::keys;
use crate::{
    AuthInfo, BoxedCredentials, BoxedStream, HandshakeError, HandshakeOptions, HandshakeOutput,
    ProtocolInfo, SharedMetadataSource, TransportCredentials,
};

/// Verify `signature` over the raw `document` bytes, then parse the document
///
/// Every failure, including a well-signed but unparseable document, is the
/// same opaque `InvalidDocument`.
pub fn verify_document(
    verifier: &DocumentVerifier,
    document: &[u8],
    signature: &[u8],
) -> Result<InstanceIdentityDocument, InvalidDocument> {
    verifier.verify(document, signature)?;
    InstanceIdentityDocument::from_json(document).map_err(|_| InvalidDocument)
}

#[derive(Clone)]
enum Role {
    Client { source: SharedMetadataSource },
    Server { verifier: Arc<DocumentVerifier> },
}

#[derive(Clone)]
pub struct InstanceIdentityCredentials {
    role: Role,
    inner: Option<BoxedCredentials>,
    options: HandshakeOptions,
}

impl InstanceIdentityCredentials {
    /// Client credentials presenting the document from `source`
    pub fn client(source: SharedMetadataSource) -> Self {
        Self {
            role: Role::Client { source },
            inner: None,
            options: HandshakeOptions::default(),
        }
    }

    /// Server credentials trusting only `verifier`'s root
    pub fn server(verifier: DocumentVerifier) -> Self {
        Self {
            role: Role::Server {
                verifier: Arc::new(verifier),
            },
            inner: None,
            options: HandshakeOptions::default(),
        }
    }

    /// Server credentials trusting the compiled-in provider root
    pub fn server_default() -> Result<Self, HandshakeError> {
        Ok(Self::server(DocumentVerifier::provider()?))
    }

    pub fn server_from_pem(root_pem: &[u8]) -> Result<Self, HandshakeError> {
        Ok(Self::server(DocumentVerifier::from_pem(root_pem)?))
    }

    pub fn wrapping(mut self, inner: impl TransportCredentials + 'static) -> Self {
        self.inner = Some(Box::new(inner));
        self
    }

    pub fn with_options(mut self, options: HandshakeOptions) -> Self {
        self.options = options;
        self
    }

    fn fail(&self, err: HandshakeError) -> HandshakeError {
        self.options.reporters.error(&err);
        err
    }

    async fn present(
        &self,
        conn: &mut BoxedStream,
        message: &IdentityHandshake,
    ) -> Result<(), HandshakeError> {
        write_frame(conn, message).await?;

        let response: HandshakeResponse = read_frame(conn, self.options.max_frame_size).await?;
        response.into_result().map_err(HandshakeError::Rejected)
    }
}

#[async_trait]
impl TransportCredentials for InstanceIdentityCredentials {
    async fn client_handshake(
        &self,
        authority: &str,
        conn: BoxedStream,
    ) -> Result<HandshakeOutput, HandshakeError> {
        let Role::Client { source } = &self.role else {
            error!("Instance identity server credentials used to dial {}", authority);
            return Err(self.fail(HandshakeError::Configuration(
                "server credentials used for a client handshake".to_string(),
            )));
        };

        // Fetched before touching the connection
        let signed = source
            .fetch_identity()
            .await
            .map_err(|e| self.fail(e.into()))?;

        let (mut conn, inner_info) =
            match wrapped_client_handshake(self.inner.as_deref(), authority, conn).await {
                Ok(out) => out,
                Err(e) => {
                    self.options.reporters.count(keys::CLIENT_WRAPPED_ERRORS, 1);
                    return Err(self.fail(e));
                }
            };

        let message = IdentityHandshake {
            doc: signed.document,
            sig: signed.signature,
        };

        match self.present(&mut conn, &message).await {
            Ok(()) => {
                debug!("Identity document accepted by {}", authority);
                Ok((conn, inner_info))
            }
            Err(e) => {
                if let HandshakeError::Rejected(reason) = &e {
                    warn!("Identity document rejected by {}: {}", authority, reason);
                    self.options.reporters.count(keys::CLIENT_UNSUCCESSFUL, 1);
                }
                close(conn).await;
                Err(self.fail(e))
            }
        }
    }

    async fn server_handshake(&self, conn: BoxedStream) -> Result<HandshakeOutput, HandshakeError> {
        let Role::Server { verifier } = &self.role else {
            error!("Instance identity client credentials used to accept a connection");
            return Err(self.fail(HandshakeError::Configuration(
                "client credentials used for a server handshake".to_string(),
            )));
        };

        let (mut conn, inner_info) = match wrapped_server_handshake(self.inner.as_deref(), conn).await {
            Ok(out) => out,
            Err(e) => {
                self.options.reporters.count(keys::SERVER_WRAPPED_ERRORS, 1);
                return Err(self.fail(e));
            }
        };

        let message: IdentityHandshake = match read_frame(&mut conn, self.options.max_frame_size).await {
            Ok(message) => message,
            Err(e) => {
                close(conn).await;
                return Err(self.fail(e.into()));
            }
        };

        match verify_document(verifier, &message.doc, &message.sig) {
            Ok(document) => {
                if let Err(e) = write_frame(&mut conn, &HandshakeResponse::accepted()).await {
                    close(conn).await;
                    return Err(self.fail(e.into()));
                }

                debug!(
                    "Accepted instance {} in {}",
                    document.instance_id, document.region
                );

                let info = AuthInfo::InstanceIdentity {
                    document,
                    wrapped: inner_info.map(Box::new),
                };
                Ok((conn, Some(info)))
            }
            Err(invalid) => {
                // Detail stays local; the peer only learns that it failed
                warn!(
                    "Invalid identity document ({} bytes, signature {} bytes)",
                    message.doc.len(),
                    message.sig.len()
                );
                self.options
                    .reporters
                    .count(keys::INSTANCE_IDENTITY_SERVER_INVALID, 1);

                let response = HandshakeResponse::rejected(invalid.to_string());
                if let Err(e) = write_frame(&mut conn, &response).await {
                    debug!("Could not deliver rejection: {}", e);
                }
                close(conn).await;
                Err(self.fail(HandshakeError::InvalidDocument))
            }
        }
    }

    fn info(&self) -> ProtocolInfo {
        match &self.inner {
            Some(inner) => inner.info(),
            None => ProtocolInfo::new("instance-identity", "1"),
        }
    }

    fn box_clone(&self) -> Box<dyn TransportCredentials> {
        Box::new(self.clone())
    }

    fn override_server_name(&mut self, name: &str) -> Result<(), HandshakeError> {
        match &mut self.inner {
            Some(inner) => inner.override_server_name(name),
            None => Ok(()),
        }
    }
}
