//! Detached signatures over instance identity documents
//!
//! Two signature forms are accepted, both base64: a PKCS#7 SignedData as the
//! provider's metadata service serves it, and a raw signature over the
//! document bytes as produced by [`DocumentSigner`].

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use pkcs8::DecodePublicKey;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    KeyUsagePurpose,
};
use ring::rand::SystemRandom;
use ring::signature::{
    self, ECDSA_P256_SHA256_ASN1_SIGNING, EcdsaKeyPair, UnparsedPublicKey, VerificationAlgorithm,
};
use ::signature::hazmat::PrehashVerifier;
use std::fmt;
use std::time::SystemTime;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::debug;

use crate::pkcs7::{DigestAlgorithm, SignedData, SignerInfo, strip_leading_zeros};
use crate::{CertError, single_pem_certificate};

/// Root certificate behind the provider's instance identity signatures
pub const PROVIDER_ROOT_PEM: &str = include_str!("../certs/provider-identity-root.pem");

const OID_RSA_ENCRYPTION: &str = "1.2.840.113549.1.1.1";
const OID_EC_PUBLIC_KEY: &str = "1.2.840.10045.2.1";
const OID_ED25519: &str = "1.3.101.112";
const OID_DSA: &str = "1.2.840.10040.4.1";

/// Uncompressed SEC1 point sizes
const P256_POINT_LEN: usize = 65;
const P384_POINT_LEN: usize = 97;

/// Verification failed
///
/// Carries no detail about which check failed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("invalid identity document")]
pub struct InvalidDocument;

enum RootKey {
    Rsa(Vec<u8>),
    P256(Vec<u8>),
    P384(Vec<u8>),
    Ed25519(Vec<u8>),
    Dsa(dsa::VerifyingKey),
}

impl RootKey {
    /// Signature made directly over `message`
    fn verify_raw(&self, message: &[u8], sig: &[u8]) -> bool {
        match self {
            RootKey::Rsa(key) => ring_verify(&signature::RSA_PKCS1_2048_8192_SHA256, key, message, sig),
            RootKey::P256(key) => ring_verify(&signature::ECDSA_P256_SHA256_ASN1, key, message, sig),
            RootKey::P384(key) => ring_verify(&signature::ECDSA_P384_SHA384_ASN1, key, message, sig),
            RootKey::Ed25519(key) => ring_verify(&signature::ED25519, key, message, sig),
            RootKey::Dsa(key) => dsa_verify(key, &DigestAlgorithm::Sha1.digest(message), sig),
        }
    }

    /// Signature made over `message` hashed with `digest`
    fn verify_digested(&self, digest: DigestAlgorithm, message: &[u8], sig: &[u8]) -> bool {
        match (self, digest) {
            (RootKey::Rsa(key), DigestAlgorithm::Sha1) => ring_verify(
                &signature::RSA_PKCS1_2048_8192_SHA1_FOR_LEGACY_USE_ONLY,
                key,
                message,
                sig,
            ),
            (RootKey::Rsa(key), DigestAlgorithm::Sha256) => {
                ring_verify(&signature::RSA_PKCS1_2048_8192_SHA256, key, message, sig)
            }
            (RootKey::Rsa(key), DigestAlgorithm::Sha384) => {
                ring_verify(&signature::RSA_PKCS1_2048_8192_SHA384, key, message, sig)
            }
            (RootKey::P256(key), DigestAlgorithm::Sha256) => {
                ring_verify(&signature::ECDSA_P256_SHA256_ASN1, key, message, sig)
            }
            (RootKey::P384(key), DigestAlgorithm::Sha384) => {
                ring_verify(&signature::ECDSA_P384_SHA384_ASN1, key, message, sig)
            }
            (RootKey::Dsa(key), digest) => dsa_verify(key, &digest.digest(message), sig),
            _ => false,
        }
    }
}

fn ring_verify(
    algorithm: &'static dyn VerificationAlgorithm,
    key: &[u8],
    message: &[u8],
    sig: &[u8],
) -> bool {
    UnparsedPublicKey::new(algorithm, key).verify(message, sig).is_ok()
}

fn dsa_verify(key: &dsa::VerifyingKey, prehash: &[u8], sig: &[u8]) -> bool {
    let Ok(sig) = dsa::Signature::try_from(sig) else {
        return false;
    };
    key.verify_prehash(prehash, &sig).is_ok()
}

/// Verifies document signatures against a single root certificate
pub struct DocumentVerifier {
    key: RootKey,
    issuer: Vec<u8>,
    serial: Vec<u8>,
    subject: String,
}

impl DocumentVerifier {
    /// Verifier trusting only the provider's identity root
    pub fn provider() -> Result<Self, CertError> {
        Self::from_pem(PROVIDER_ROOT_PEM.as_bytes())
    }

    /// Build from a PEM document holding exactly one certificate
    pub fn from_pem(root_pem: &[u8]) -> Result<Self, CertError> {
        let der = single_pem_certificate(root_pem)?;
        Self::from_der(&der)
    }

    /// Build from a DER certificate
    ///
    /// Supported root keys: RSA, P-256, P-384, Ed25519 and DSA.
    pub fn from_der(der: &[u8]) -> Result<Self, CertError> {
        let (_, cert) =
            x509_parser::parse_x509_certificate(der).map_err(|e| CertError::Parse(e.to_string()))?;

        let spki = cert.public_key();
        let public_key = spki.subject_public_key.data.to_vec();
        let key_oid = spki.algorithm.algorithm.to_id_string();

        let key = match key_oid.as_str() {
            OID_RSA_ENCRYPTION => RootKey::Rsa(public_key),
            OID_ED25519 => RootKey::Ed25519(public_key),
            OID_EC_PUBLIC_KEY => match public_key.len() {
                P256_POINT_LEN => RootKey::P256(public_key),
                P384_POINT_LEN => RootKey::P384(public_key),
                len => {
                    return Err(CertError::UnsupportedKey(format!(
                        "EC public key of {} bytes",
                        len
                    )));
                }
            },
            OID_DSA => RootKey::Dsa(
                dsa::VerifyingKey::from_public_key_der(spki.raw)
                    .map_err(|e| CertError::UnsupportedKey(format!("DSA key: {}", e)))?,
            ),
            other => return Err(CertError::UnsupportedKey(other.to_string())),
        };

        Ok(Self {
            key,
            issuer: cert.tbs_certificate.issuer.as_raw().to_vec(),
            serial: strip_leading_zeros(cert.tbs_certificate.raw_serial()).to_vec(),
            subject: cert.subject().to_string(),
        })
    }

    /// Subject of the trust anchor
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Verify a base64 signature over the raw document bytes
    ///
    /// PKCS#7 signatures must name this root as their signer and vouch for
    /// exactly `document`; the content they embed is ignored.
    pub fn verify(&self, document: &[u8], signature: &[u8]) -> Result<(), InvalidDocument> {
        let raw = decode_signature(signature).ok_or(InvalidDocument)?;

        let verified = match SignedData::parse(&raw) {
            Some(signed) => self.verify_signed_data(document, &signed),
            None => self.key.verify_raw(document, &raw),
        };

        if verified { Ok(()) } else { Err(InvalidDocument) }
    }

    fn verify_signed_data(&self, document: &[u8], signed: &SignedData<'_>) -> bool {
        !signed.signers.is_empty()
            && signed
                .signers
                .iter()
                .all(|signer| self.verify_signer(document, signer))
    }

    fn verify_signer(&self, document: &[u8], signer: &SignerInfo<'_>) -> bool {
        if signer.issuer != self.issuer.as_slice() || signer.serial != self.serial.as_slice() {
            debug!("PKCS#7 signer is not {}", self.subject);
            return false;
        }

        let Some(message) = signer.signed_bytes(document) else {
            return false;
        };
        self.key
            .verify_digested(signer.digest_algorithm, &message, signer.signature)
    }
}

impl fmt::Debug for DocumentVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentVerifier")
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}

/// Metadata services wrap base64 at 64/76 columns
fn decode_signature(encoded: &[u8]) -> Option<Vec<u8>> {
    let compact: Vec<u8> = encoded
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    STANDARD.decode(compact).ok()
}

/// Signs documents with an ECDSA P-256 key
pub struct DocumentSigner {
    key_pair: EcdsaKeyPair,
    rng: SystemRandom,
}

impl DocumentSigner {
    /// Load from a PKCS#8 DER key
    pub fn from_pkcs8(pkcs8: &[u8]) -> Result<Self, CertError> {
        let rng = SystemRandom::new();
        let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, pkcs8, &rng)
            .map_err(|e| CertError::KeyRejected(e.to_string()))?;
        Ok(Self { key_pair, rng })
    }

    /// Load the first PKCS#8 key in a PEM document
    pub fn from_pem(pem: &[u8]) -> Result<Self, CertError> {
        let mut reader = pem;
        while let Some(item) =
            rustls_pemfile::read_one(&mut reader).map_err(|e| CertError::InvalidPem(e.to_string()))?
        {
            if let rustls_pemfile::Item::Pkcs8Key(key) = item {
                return Self::from_pkcs8(key.secret_pkcs8_der());
            }
        }
        Err(CertError::InvalidPem("no PKCS#8 private key found".to_string()))
    }

    /// Base64 detached signature over `document`
    pub fn sign(&self, document: &[u8]) -> Result<String, CertError> {
        let sig = self
            .key_pair
            .sign(&self.rng, document)
            .map_err(|_| CertError::SigningFailed)?;
        Ok(STANDARD.encode(sig.as_ref()))
    }
}

/// A self-signed signing root, for local attestation setups and tests
pub struct SigningRoot {
    pub certificate_pem: String,
    pub private_key_pem: String,
    signer: DocumentSigner,
}

impl SigningRoot {
    /// Generate a fresh root valid from now until `valid_until`
    pub fn generate(common_name: &str, valid_until: SystemTime) -> Result<Self, CertError> {
        let now = OffsetDateTime::now_utc();
        let not_after = OffsetDateTime::from(valid_until);
        if not_after <= now {
            return Err(CertError::ExpiryInPast);
        }

        let key_pair = KeyPair::generate()?;

        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, common_name);
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature, KeyUsagePurpose::KeyCertSign];
        params.not_before = now;
        params.not_after = not_after;

        let certificate = params.self_signed(&key_pair)?;
        let signer = DocumentSigner::from_pkcs8(&key_pair.serialize_der())?;

        Ok(Self {
            certificate_pem: certificate.pem(),
            private_key_pem: key_pair.serialize_pem(),
            signer,
        })
    }

    pub fn signer(&self) -> &DocumentSigner {
        &self.signer
    }

    pub fn verifier(&self) -> Result<DocumentVerifier, CertError> {
        DocumentVerifier::from_pem(self.certificate_pem.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const DOCUMENT: &str = r#"{
  "privateIp" : "172.31.54.249",
  "availabilityZone" : "us-east-1a",
  "instanceId" : "i-0e90d494ecf1ea4bc",
  "accountId" : "712349860883",
  "pendingTime" : "2016-06-09T02:25:28Z",
  "region" : "us-east-1"
}"#;

    const OTHER_DOCUMENT: &str = r#"{
  "privateIp" : "172.31.56.245",
  "availabilityZone" : "us-east-1a",
  "instanceId" : "i-066cf709397b787d9",
  "accountId" : "712349860883",
  "pendingTime" : "2016-06-09T02:37:45Z",
  "region" : "us-east-1"
}"#;

    const UNRELATED_RSA_PEM: &str = include_str!("../testdata/unrelated-rsa.pem");
    const COMDIRECT_PEM: &str = include_str!("../testdata/comdirect.pem");
    const INSTANCE1_DOCUMENT: &[u8] = include_bytes!("../testdata/instance1-document.json");
    const INSTANCE1_PKCS7: &str = include_str!("../testdata/instance1.pkcs7");
    const INSTANCE2_PKCS7: &str = include_str!("../testdata/instance2.pkcs7");

    fn root() -> SigningRoot {
        SigningRoot::generate("test identity root", SystemTime::now() + Duration::from_secs(3600))
            .unwrap()
    }

    #[test]
    fn test_valid_signature() {
        let root = root();
        let sig = root.signer().sign(DOCUMENT.as_bytes()).unwrap();

        let verifier = root.verifier().unwrap();
        assert!(verifier.subject().contains("test identity root"));
        assert!(verifier.verify(DOCUMENT.as_bytes(), sig.as_bytes()).is_ok());
    }

    #[test]
    fn test_wrapped_base64_signature() {
        let root = root();
        let sig = root.signer().sign(DOCUMENT.as_bytes()).unwrap();
        let (head, tail) = sig.split_at(20);
        let wrapped = format!("{}\n{}\n", head, tail);

        let verifier = root.verifier().unwrap();
        assert!(verifier.verify(DOCUMENT.as_bytes(), wrapped.as_bytes()).is_ok());
    }

    #[test]
    fn test_any_single_byte_mutation_fails() {
        let root = root();
        let sig = root.signer().sign(DOCUMENT.as_bytes()).unwrap();
        let verifier = root.verifier().unwrap();

        for i in 0..DOCUMENT.len() {
            let mut mutated = DOCUMENT.as_bytes().to_vec();
            mutated[i] ^= 0x01;
            assert_eq!(
                verifier.verify(&mutated, sig.as_bytes()),
                Err(InvalidDocument),
                "mutation at byte {} verified",
                i
            );
        }
    }

    #[test]
    fn test_appended_byte_fails() {
        let root = root();
        let sig = root.signer().sign(DOCUMENT.as_bytes()).unwrap();
        let verifier = root.verifier().unwrap();

        let mut extended = DOCUMENT.as_bytes().to_vec();
        extended.push(b'\n');
        assert_eq!(verifier.verify(&extended, sig.as_bytes()), Err(InvalidDocument));
    }

    #[test]
    fn test_signature_for_other_document_fails() {
        let root = root();
        let other_sig = root.signer().sign(OTHER_DOCUMENT.as_bytes()).unwrap();
        let verifier = root.verifier().unwrap();

        assert_eq!(
            verifier.verify(DOCUMENT.as_bytes(), other_sig.as_bytes()),
            Err(InvalidDocument)
        );
    }

    #[test]
    fn test_substituted_root_fails() {
        let root = root();
        let sig = root.signer().sign(DOCUMENT.as_bytes()).unwrap();

        let other_root = self::root().verifier().unwrap();
        assert_eq!(
            other_root.verify(DOCUMENT.as_bytes(), sig.as_bytes()),
            Err(InvalidDocument)
        );

        let rsa_root = DocumentVerifier::from_pem(UNRELATED_RSA_PEM.as_bytes()).unwrap();
        assert_eq!(
            rsa_root.verify(DOCUMENT.as_bytes(), sig.as_bytes()),
            Err(InvalidDocument)
        );
    }

    #[test]
    fn test_garbage_signature_fails() {
        let verifier = root().verifier().unwrap();
        assert_eq!(
            verifier.verify(DOCUMENT.as_bytes(), b"not base64!"),
            Err(InvalidDocument)
        );
        assert_eq!(verifier.verify(DOCUMENT.as_bytes(), b""), Err(InvalidDocument));
    }

    #[test]
    fn test_provider_signed_document() {
        let verifier = DocumentVerifier::provider().unwrap();
        assert!(verifier.subject().contains("Amazon Web Services LLC"));

        assert!(
            verifier
                .verify(INSTANCE1_DOCUMENT, INSTANCE1_PKCS7.as_bytes())
                .is_ok()
        );
    }

    #[test]
    fn test_provider_signature_for_other_instance_fails() {
        let verifier = DocumentVerifier::provider().unwrap();
        assert_eq!(
            verifier.verify(INSTANCE1_DOCUMENT, INSTANCE2_PKCS7.as_bytes()),
            Err(InvalidDocument)
        );
    }

    #[test]
    fn test_provider_signature_mutations_fail() {
        let verifier = DocumentVerifier::provider().unwrap();

        let mut extended = INSTANCE1_DOCUMENT.to_vec();
        extended.push(b'\n');
        assert_eq!(
            verifier.verify(&extended, INSTANCE1_PKCS7.as_bytes()),
            Err(InvalidDocument)
        );

        let mut flipped = INSTANCE1_DOCUMENT.to_vec();
        flipped[20] ^= 0x01;
        assert_eq!(
            verifier.verify(&flipped, INSTANCE1_PKCS7.as_bytes()),
            Err(InvalidDocument)
        );
    }

    #[test]
    fn test_provider_signature_under_other_root_fails() {
        let comdirect = DocumentVerifier::from_pem(COMDIRECT_PEM.as_bytes()).unwrap();
        assert_eq!(
            comdirect.verify(INSTANCE1_DOCUMENT, INSTANCE1_PKCS7.as_bytes()),
            Err(InvalidDocument)
        );

        let generated = root().verifier().unwrap();
        assert_eq!(
            generated.verify(INSTANCE1_DOCUMENT, INSTANCE1_PKCS7.as_bytes()),
            Err(InvalidDocument)
        );
    }

    #[test]
    fn test_raw_signature_under_provider_root_fails() {
        let root = root();
        let sig = root.signer().sign(DOCUMENT.as_bytes()).unwrap();

        let provider = DocumentVerifier::provider().unwrap();
        assert_eq!(provider.verify(DOCUMENT.as_bytes(), sig.as_bytes()), Err(InvalidDocument));
    }

    #[test]
    fn test_signer_from_pem() {
        let root = root();
        let signer = DocumentSigner::from_pem(root.private_key_pem.as_bytes()).unwrap();
        let sig = signer.sign(DOCUMENT.as_bytes()).unwrap();

        let verifier = root.verifier().unwrap();
        assert!(verifier.verify(DOCUMENT.as_bytes(), sig.as_bytes()).is_ok());
    }
}
