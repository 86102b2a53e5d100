//! Peer identity and its propagation to calls
//!
//! A successful handshake yields at most one `AuthInfo`. Credentials that wrap
//! another credential nest the inner identity under `wrapped`, so the chain
//! mirrors the credential chain. Accessors walk it and match on the tag.

use serde_json::Value;
use shakehand_protocol::InstanceIdentityDocument;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::BoxedStream;

/// Negotiated TLS session details
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TlsInfo {
    /// e.g. `TLSv1_3`
    pub protocol_version: String,

    /// Peer chain, leaf first, DER-encoded
    pub peer_certificates: Vec<Vec<u8>>,

    /// SNI the client sent (server side only)
    pub server_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthInfo {
    /// Value returned by the server's claims validator
    Handshake {
        identity: Value,
        wrapped: Option<Box<AuthInfo>>,
    },

    Tls(TlsInfo),

    /// A verified instance identity document
    InstanceIdentity {
        document: InstanceIdentityDocument,
        wrapped: Option<Box<AuthInfo>>,
    },
}

impl AuthInfo {
    pub fn auth_type(&self) -> &'static str {
        match self {
            AuthInfo::Handshake { .. } => "handshake",
            AuthInfo::Tls(_) => "tls",
            AuthInfo::InstanceIdentity { .. } => "instance-identity",
        }
    }

    pub fn wrapped(&self) -> Option<&AuthInfo> {
        match self {
            AuthInfo::Handshake { wrapped, .. } | AuthInfo::InstanceIdentity { wrapped, .. } => {
                wrapped.as_deref()
            }
            AuthInfo::Tls(_) => None,
        }
    }

    /// This identity followed by every identity it wraps, outermost first
    pub fn chain(&self) -> impl Iterator<Item = &AuthInfo> {
        std::iter::successors(Some(self), |info| info.wrapped())
    }

    pub fn handshake_identity(&self) -> Option<&Value> {
        self.chain().find_map(|info| match info {
            AuthInfo::Handshake { identity, .. } => Some(identity),
            _ => None,
        })
    }

    pub fn instance_identity(&self) -> Option<&InstanceIdentityDocument> {
        self.chain().find_map(|info| match info {
            AuthInfo::InstanceIdentity { document, .. } => Some(document),
            _ => None,
        })
    }

    pub fn tls_info(&self) -> Option<&TlsInfo> {
        self.chain().find_map(|info| match info {
            AuthInfo::Tls(tls) => Some(tls),
            _ => None,
        })
    }
}

/// The other end of a connection
#[derive(Debug, Clone, Default)]
pub struct Peer {
    pub addr: Option<SocketAddr>,
    pub auth_info: Option<Arc<AuthInfo>>,
}

/// Per-call context handed to request handlers
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    peer: Peer,
}

impl CallContext {
    pub fn new(peer: Peer) -> Self {
        Self { peer }
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    pub fn auth_info(&self) -> Option<&AuthInfo> {
        self.peer.auth_info.as_deref()
    }
}

/// Identity attached by a claims handshake, if any
pub fn handshake_identity(ctx: &CallContext) -> Option<&Value> {
    ctx.auth_info().and_then(AuthInfo::handshake_identity)
}

/// Document attached by an instance identity handshake, if any
pub fn instance_identity(ctx: &CallContext) -> Option<&InstanceIdentityDocument> {
    ctx.auth_info().and_then(AuthInfo::instance_identity)
}

pub fn tls_info(ctx: &CallContext) -> Option<&TlsInfo> {
    ctx.auth_info().and_then(AuthInfo::tls_info)
}

/// A handshaken connection with its peer identity attached
pub struct SecureConn {
    stream: BoxedStream,
    peer: Peer,
}

impl SecureConn {
    pub fn new(stream: BoxedStream, peer: Peer) -> Self {
        Self { stream, peer }
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    pub fn auth_info(&self) -> Option<&AuthInfo> {
        self.peer.auth_info.as_deref()
    }

    /// Context for a call arriving on this connection
    pub fn context(&self) -> CallContext {
        CallContext::new(self.peer.clone())
    }

    pub fn into_parts(self) -> (BoxedStream, Peer) {
        (self.stream, self.peer)
    }
}

impl std::fmt::Debug for SecureConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureConn")
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

impl AsyncRead for SecureConn {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for SecureConn {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}
