//! PKCS#7 SignedData, as served by instance metadata endpoints
//!
//! Only what detached verification needs is extracted: who signed, which
//! digest was used, the authenticated attributes and the signature. The
//! encapsulated content is ignored; the document is supplied separately.

use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384};

use crate::ber::{self, TAG_INTEGER, TAG_OCTET_STRING, TAG_OID, TAG_SEQUENCE, TAG_SET, Tlv};

/// 1.2.840.113549.1.7.2
const OID_SIGNED_DATA: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x02];
/// 1.2.840.113549.1.9.4
const OID_MESSAGE_DIGEST: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x09, 0x04];
/// 1.3.14.3.2.26
const OID_SHA1: &[u8] = &[0x2b, 0x0e, 0x03, 0x02, 0x1a];
/// 2.16.840.1.101.3.4.2.1
const OID_SHA256: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01];
/// 2.16.840.1.101.3.4.2.2
const OID_SHA384: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x02];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Sha1,
    Sha256,
    Sha384,
}

impl DigestAlgorithm {
    fn from_oid(oid: &[u8]) -> Option<Self> {
        match oid {
            OID_SHA1 => Some(Self::Sha1),
            OID_SHA256 => Some(Self::Sha256),
            OID_SHA384 => Some(Self::Sha384),
            _ => None,
        }
    }

    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha1 => Sha1::digest(data).to_vec(),
            Self::Sha256 => Sha256::digest(data).to_vec(),
            Self::Sha384 => Sha384::digest(data).to_vec(),
        }
    }
}

/// One signer of a SignedData
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerInfo<'a> {
    /// Issuer `Name`, full DER encoding
    pub issuer: &'a [u8],
    /// Serial number octets, leading zeros stripped
    pub serial: &'a [u8],
    pub digest_algorithm: DigestAlgorithm,
    /// Authenticated attributes re-tagged as a SET, i.e. the signed bytes
    pub signed_attributes: Option<Vec<u8>>,
    /// Value of the messageDigest attribute
    pub message_digest: Option<&'a [u8]>,
    pub signature: &'a [u8],
}

impl SignerInfo<'_> {
    /// Bytes the signature covers when `content` is the signed document
    ///
    /// `None` when the authenticated attributes do not vouch for `content`.
    pub fn signed_bytes(&self, content: &[u8]) -> Option<Vec<u8>> {
        match &self.signed_attributes {
            Some(attributes) => {
                let expected = self.message_digest?;
                if self.digest_algorithm.digest(content) != expected {
                    return None;
                }
                Some(attributes.clone())
            }
            None => Some(content.to_vec()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedData<'a> {
    pub signers: Vec<SignerInfo<'a>>,
}

impl<'a> SignedData<'a> {
    /// Parse a BER `ContentInfo` carrying SignedData
    ///
    /// `None` for anything else, including trailing bytes.
    pub fn parse(input: &'a [u8]) -> Option<Self> {
        let (content_info, rest) = ber::read(input)?;
        if !rest.is_empty() {
            return None;
        }

        let fields = content_info.expect(TAG_SEQUENCE)?;
        let [content_type, content, ..] = fields.as_slice() else {
            return None;
        };
        if content_type.tag != TAG_OID || content_type.content != OID_SIGNED_DATA {
            return None;
        }

        let signed_data = content.expect(ber::context(0))?;
        let body = signed_data.first()?.expect(TAG_SEQUENCE)?;

        // version, digestAlgorithms, encapContentInfo, [0] certificates,
        // [1] crls, signerInfos: the signer set is always last
        if body.len() < 4 {
            return None;
        }
        let signer_set = body.last()?;

        let signers = signer_set
            .expect(TAG_SET)?
            .iter()
            .map(parse_signer)
            .collect::<Option<Vec<_>>>()?;

        Some(Self { signers })
    }
}

fn parse_signer<'a>(tlv: &Tlv<'a>) -> Option<SignerInfo<'a>> {
    let fields = tlv.expect(TAG_SEQUENCE)?;
    let mut fields = fields.iter();

    let version = fields.next()?;
    if version.tag != TAG_INTEGER {
        return None;
    }

    // Only IssuerAndSerialNumber identifies signers here
    let sid = fields.next()?.expect(TAG_SEQUENCE)?;
    let [issuer, serial] = sid.as_slice() else {
        return None;
    };
    if issuer.tag != TAG_SEQUENCE || serial.tag != TAG_INTEGER {
        return None;
    }

    let digest_algorithm = algorithm_oid(fields.next()?).and_then(DigestAlgorithm::from_oid)?;

    let mut next = fields.next()?;
    let (signed_attributes, message_digest) = if next.tag == ber::context(0) {
        let parsed = parse_signed_attributes(next)?;
        next = fields.next()?;
        (Some(parsed.0), parsed.1)
    } else {
        (None, None)
    };

    // signatureAlgorithm: the root key decides the scheme
    if next.tag != TAG_SEQUENCE {
        return None;
    }

    let signature = fields.next()?;
    if signature.tag != TAG_OCTET_STRING {
        return None;
    }

    Some(SignerInfo {
        issuer: issuer.raw,
        serial: strip_leading_zeros(serial.content),
        digest_algorithm,
        signed_attributes,
        message_digest,
        signature: signature.content,
    })
}

/// Re-tag `[0] IMPLICIT` attributes as a SET and find the messageDigest
fn parse_signed_attributes<'a>(tlv: &Tlv<'a>) -> Option<(Vec<u8>, Option<&'a [u8]>)> {
    // The signed form must be DER
    if tlv.is_indefinite() {
        return None;
    }

    let mut message_digest = None;
    for attribute in tlv.children()? {
        let parts = attribute.expect(TAG_SEQUENCE)?;
        let [oid, values] = parts.as_slice() else {
            return None;
        };
        if oid.tag == TAG_OID && oid.content == OID_MESSAGE_DIGEST {
            let values = values.expect(TAG_SET)?;
            let [value] = values.as_slice() else {
                return None;
            };
            if value.tag != TAG_OCTET_STRING {
                return None;
            }
            message_digest = Some(value.content);
        }
    }

    let mut encoded = tlv.raw.to_vec();
    encoded[0] = TAG_SET;
    Some((encoded, message_digest))
}

fn algorithm_oid<'a>(tlv: &Tlv<'a>) -> Option<&'a [u8]> {
    let parts = tlv.expect(TAG_SEQUENCE)?;
    let oid = parts.first()?;
    (oid.tag == TAG_OID).then_some(oid.content)
}

pub fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    const INSTANCE1_PKCS7: &str = include_str!("../testdata/instance1.pkcs7");
    const INSTANCE1_DOCUMENT: &[u8] = include_bytes!("../testdata/instance1-document.json");

    fn decode(text: &str) -> Vec<u8> {
        let compact: String = text.split_whitespace().collect();
        STANDARD.decode(compact).unwrap()
    }

    #[test]
    fn test_parse_provider_signature() {
        let der = decode(INSTANCE1_PKCS7);
        let signed = SignedData::parse(&der).unwrap();

        assert_eq!(signed.signers.len(), 1);
        let signer = &signed.signers[0];
        assert_eq!(signer.digest_algorithm, DigestAlgorithm::Sha1);
        assert_eq!(hex::encode(signer.serial), "96ba48d9e55e1a67");
        assert_eq!(signer.signed_attributes.as_ref().unwrap()[0], TAG_SET);

        // The attributes vouch for exactly this document
        assert!(signer.signed_bytes(INSTANCE1_DOCUMENT).is_some());
        let mut extended = INSTANCE1_DOCUMENT.to_vec();
        extended.push(b' ');
        assert!(signer.signed_bytes(&extended).is_none());
    }

    #[test]
    fn test_rejects_other_structures() {
        let der = decode(INSTANCE1_PKCS7);

        let mut trailing = der.clone();
        trailing.push(0);
        assert!(SignedData::parse(&trailing).is_none());

        assert!(SignedData::parse(&der[..der.len() / 2]).is_none());

        // A raw ECDSA signature is a SEQUENCE of two INTEGERs
        assert!(SignedData::parse(&[0x30, 0x06, 0x02, 0x01, 0x01, 0x02, 0x01, 0x01]).is_none());
        assert!(SignedData::parse(&[]).is_none());
    }

    #[test]
    fn test_strip_leading_zeros() {
        assert_eq!(strip_leading_zeros(&[0, 0, 1, 0]), &[1, 0]);
        assert_eq!(strip_leading_zeros(&[0]), &[] as &[u8]);
    }
}
