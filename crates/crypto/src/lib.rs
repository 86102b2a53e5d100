//! shakehand crypto - trust material for handshake credentials
//!
//! This crate provides:
//! - Self-signed server certificates for store-bootstrapped TLS
//! - PEM parsing and certificate fingerprints
//! - Detached signature verification of instance identity documents
//!   against a single root certificate (PKCS#7 SignedData or raw), with
//!   the provider's root compiled in
//! - A document signer for issuing test and local attestation roots

mod ber;
mod cert;
mod document;
mod pkcs7;

pub use cert::*;
pub use document::*;
