//! The credential contract shared by every handshake variant

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::{AuthInfo, HandshakeError};

/// Any bidirectional byte stream a handshake can run over
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// Stream to hand to the caller, plus the identity this handshake established
pub type HandshakeOutput = (BoxedStream, Option<AuthInfo>);

/// Security protocol a credential reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolInfo {
    pub security_protocol: String,
    pub security_version: String,
}

impl ProtocolInfo {
    pub fn new(protocol: &str, version: &str) -> Self {
        Self {
            security_protocol: protocol.to_string(),
            security_version: version.to_string(),
        }
    }
}

/// Transport credentials: one handshake per connection, per side
///
/// A credential may wrap one inner credential; the inner handshake always
/// completes before the outer exchange begins.
#[async_trait]
pub trait TransportCredentials: Send + Sync {
    /// Authenticate the server behind `authority` (`host:port`) over `conn`
    async fn client_handshake(
        &self,
        authority: &str,
        conn: BoxedStream,
    ) -> Result<HandshakeOutput, HandshakeError>;

    /// Authenticate the client on an accepted connection
    async fn server_handshake(&self, conn: BoxedStream) -> Result<HandshakeOutput, HandshakeError>;

    fn info(&self) -> ProtocolInfo;

    fn box_clone(&self) -> Box<dyn TransportCredentials>;

    /// Name to verify the server certificate against, instead of the dial host
    fn override_server_name(&mut self, name: &str) -> Result<(), HandshakeError>;
}

impl Clone for Box<dyn TransportCredentials> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

pub type BoxedCredentials = Box<dyn TransportCredentials>;

/// Run `inner`'s client handshake, or pass `conn` through untouched
pub(crate) async fn wrapped_client_handshake(
    inner: Option<&dyn TransportCredentials>,
    authority: &str,
    conn: BoxedStream,
) -> Result<HandshakeOutput, HandshakeError> {
    match inner {
        Some(creds) => creds.client_handshake(authority, conn).await,
        None => Ok((conn, None)),
    }
}

pub(crate) async fn wrapped_server_handshake(
    inner: Option<&dyn TransportCredentials>,
    conn: BoxedStream,
) -> Result<HandshakeOutput, HandshakeError> {
    match inner {
        Some(creds) => creds.server_handshake(conn).await,
        None => Ok((conn, None)),
    }
}

/// Best-effort close; the stream is dropped afterwards either way
pub(crate) async fn close(mut conn: BoxedStream) {
    if let Err(e) = conn.shutdown().await {
        trace!("Shutdown after failed handshake: {}", e);
    }
}
