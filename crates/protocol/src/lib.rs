//! shakehand protocol - handshake wire format
//!
//! This crate defines what travels over a connection before any RPC traffic:
//! - Length-prefixed JSON frames (`[u32 LE length][payload]`)
//! - `Claims` / `HandshakeResponse`: the generic claims exchange
//! - `IdentityHandshake`: a signed instance identity document
//! - `InstanceIdentityDocument`: the parsed attestation fields

mod document;
mod frame;
mod handshake;

pub use document::*;
pub use frame::*;
pub use handshake::*;
