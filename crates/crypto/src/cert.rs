//! Self-signed server certificates and PEM handling

use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose,
};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::SystemTime;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::debug;

#[derive(Error, Debug)]
pub enum CertError {
    #[error("Certificate generation failed: {0}")]
    Generation(#[from] rcgen::Error),

    #[error("Certificate expiry is not in the future")]
    ExpiryInPast,

    #[error("Invalid PEM: {0}")]
    InvalidPem(String),

    #[error("Expected exactly one certificate, found {0}")]
    CertificateCount(usize),

    #[error("Certificate parse failed: {0}")]
    Parse(String),

    #[error("Unsupported root key algorithm: {0}")]
    UnsupportedKey(String),

    #[error("Private key rejected: {0}")]
    KeyRejected(String),

    #[error("Signing failed")]
    SigningFailed,
}

/// A freshly minted server certificate and its private key
pub struct ServerCertificate {
    /// DER-encoded certificate
    pub certificate_der: Vec<u8>,

    /// Same certificate, PEM-encoded (what gets published)
    pub certificate_pem: String,

    /// PKCS#8 private key, never published
    pub private_key_der: Vec<u8>,
}

impl ServerCertificate {
    /// SHA-256 fingerprint of the certificate
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.certificate_der)
    }
}

impl fmt::Debug for ServerCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerCertificate")
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

/// Mint a self-signed server certificate for `address`
///
/// The subject CN is the full address; the SAN is its host part (IP or DNS
/// name) so standard hostname verification passes for clients dialing it.
pub fn mint_server_certificate(
    address: &str,
    valid_until: SystemTime,
) -> Result<ServerCertificate, CertError> {
    let now = OffsetDateTime::now_utc();
    let not_after = OffsetDateTime::from(valid_until);
    if not_after <= now {
        return Err(CertError::ExpiryInPast);
    }

    let key_pair = KeyPair::generate()?;

    let mut params = CertificateParams::new(vec![host_of(address).to_string()])?;

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, address);
    dn.push(DnType::OrganizationName, "shakehand");
    dn.push(DnType::OrganizationalUnitName, "dynamiccert");
    params.distinguished_name = dn;

    // Pinned directly as a trust anchor, so it must not claim to be a CA
    params.is_ca = IsCa::NoCa;
    params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

    params.not_before = now;
    params.not_after = not_after;
    params.serial_number = Some((now.unix_timestamp_nanos() as u64).into());

    let certificate = params.self_signed(&key_pair)?;

    debug!("Minted certificate for {}", address);

    Ok(ServerCertificate {
        certificate_der: certificate.der().to_vec(),
        certificate_pem: certificate.pem(),
        private_key_der: key_pair.serialize_der(),
    })
}

/// Host part of `host:port`, `[v6]:port`, or a bare host
pub fn host_of(address: &str) -> &str {
    if let Some(rest) = address.strip_prefix('[') {
        if let Some((host, _)) = rest.split_once(']') {
            return host;
        }
    }

    match address.rsplit_once(':') {
        Some((host, port))
            if !host.contains(':') && !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) =>
        {
            host
        }
        _ => address,
    }
}

/// All certificates in a PEM bundle, DER-encoded
pub fn parse_pem_certificates(pem: &[u8]) -> Result<Vec<Vec<u8>>, CertError> {
    rustls_pemfile::certs(&mut &pem[..])
        .map(|cert| {
            cert.map(|c| c.to_vec())
                .map_err(|e| CertError::InvalidPem(e.to_string()))
        })
        .collect()
}

/// The single certificate in a PEM document
pub fn single_pem_certificate(pem: &[u8]) -> Result<Vec<u8>, CertError> {
    let mut certs = parse_pem_certificates(pem)?;
    if certs.len() != 1 {
        return Err(CertError::CertificateCount(certs.len()));
    }
    Ok(certs.remove(0))
}

/// Hex SHA-256 of DER bytes
pub fn fingerprint(der: &[u8]) -> String {
    hex::encode(Sha256::digest(der))
}
