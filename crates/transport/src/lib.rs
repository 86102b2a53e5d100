//! Shakehand Transport - handshake credentials
//!
//! This crate provides:
//! - The `TransportCredentials` contract and credential composition
//! - Claims handshake credentials
//! - Dynamic certificate credentials (trust via a shared store)
//! - Instance identity credentials (provider-signed documents)
//! - Plain TLS credentials
//! - Peer identity propagation and TCP dial/accept helpers

mod credentials;
mod dial;
mod dynamic_cert;
mod error;
mod handshake;
mod instance_identity;
mod metadata;
mod peer;
pub mod reporters;
mod tls;

pub use credentials::{
    AsyncStream, BoxedCredentials, BoxedStream, HandshakeOutput, ProtocolInfo,
    TransportCredentials,
};
pub use dial::*;
pub use dynamic_cert::*;
pub use error::*;
pub use handshake::*;
pub use instance_identity::*;
pub use metadata::*;
pub use peer::*;
pub use reporters::{
    ErrorReporter, MetricsReporter, SharedErrorReporter, SharedMetricsReporter, TracingReporter,
};
pub use tls::{TlsCredentials, root_store};
