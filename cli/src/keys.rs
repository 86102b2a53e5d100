//! `shakehand mint-root` and `shakehand sign-document`

use anyhow::{Context, Result};
use shakehand_crypto::{DocumentSigner, SigningRoot};
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::info;

/// Write a fresh signing root certificate and its private key
pub async fn mint_root(common_name: &str, valid_days: u64, cert_out: &Path, key_out: &Path) -> Result<()> {
    let valid_until = SystemTime::now() + Duration::from_secs(valid_days * 24 * 3600);
    let root = SigningRoot::generate(common_name, valid_until)?;

    tokio::fs::write(cert_out, &root.certificate_pem)
        .await
        .with_context(|| format!("writing {}", cert_out.display()))?;
    tokio::fs::write(key_out, &root.private_key_pem)
        .await
        .with_context(|| format!("writing {}", key_out.display()))?;

    info!(
        "Wrote signing root {} to {} (key: {})",
        root.verifier()?.subject(),
        cert_out.display(),
        key_out.display()
    );
    Ok(())
}

/// Base64 signature over the exact bytes of `document`
pub async fn sign_document(document: &Path, key: &Path) -> Result<String> {
    let doc = tokio::fs::read(document)
        .await
        .with_context(|| format!("reading {}", document.display()))?;
    let key_pem = tokio::fs::read(key)
        .await
        .with_context(|| format!("reading {}", key.display()))?;

    let signer = DocumentSigner::from_pem(&key_pem)?;
    Ok(signer.sign(&doc)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shakehand_crypto::DocumentVerifier;

    #[tokio::test]
    async fn test_mint_then_sign() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("root.pem");
        let key = dir.path().join("root.key");
        let doc = dir.path().join("doc.json");

        mint_root("local root", 1, &cert, &key).await.unwrap();
        tokio::fs::write(&doc, br#"{"instanceId":"i-1"}"#).await.unwrap();

        let signature = sign_document(&doc, &key).await.unwrap();

        let verifier = DocumentVerifier::from_pem(&std::fs::read(&cert).unwrap()).unwrap();
        assert!(verifier.verify(br#"{"instanceId":"i-1"}"#, signature.as_bytes()).is_ok());
    }
}
