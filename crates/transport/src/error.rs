//! Handshake error taxonomy

use shakehand_crypto::CertError;
use shakehand_protocol::FrameError;
use shakehand_store::StoreError;
use std::io;
use thiserror::Error;

use crate::MetadataError;

#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("Transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("Protocol error: {0}")]
    Protocol(FrameError),

    /// Reason as supplied by the validating side
    #[error("Handshake rejected: {0}")]
    Rejected(String),

    #[error("invalid identity document")]
    InvalidDocument,

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Certificate error: {0}")]
    Certificate(#[from] CertError),

    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Handshake deadline exceeded")]
    DeadlineExceeded,
}

impl From<FrameError> for HandshakeError {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::Io(io) => HandshakeError::Transport(io),
            other => HandshakeError::Protocol(other),
        }
    }
}

impl HandshakeError {
    /// True when the peer answered with a verdict rather than the exchange breaking
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            HandshakeError::Rejected(_) | HandshakeError::InvalidDocument
        )
    }
}
