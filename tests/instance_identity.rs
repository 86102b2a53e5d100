//! Instance identity credentials over real TCP connections
//!
//! The client fetches its document from a mock metadata service, as it
//! would from the provider's link-local endpoint.


use integration_harness::*;
use shakehand_crypto::{SigningRoot, mint_server_certificate};
use shakehand_protocol::InstanceIdentityDocument;
use shakehand_transport::{
    HandshakeConfig, HandshakeError, HttpMetadataSource, InstanceIdentityCredentials,
    MetadataConfig, MetadataError, TlsCredentials, dial, root_store,
};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DOCUMENT_PATH: &str = "/latest/dynamic/instance-identity/document";
const SIGNATURE_PATH: &str = "/latest/dynamic/instance-identity/pkcs7";

const DOCUMENT: &str = r#"{
  "devpayProductCodes" : null,
  "privateIp" : "10.1.2.3",
  "availabilityZone" : "eu-west-1b",
  "version" : "2017-09-30",
  "instanceId" : "i-0123456789abcdef0",
  "billingProducts" : null,
  "instanceType" : "m5.large",
  "accountId" : "123456789012",
  "imageId" : "ami-0abcdef1234567890",
  "pendingTime" : "2024-03-01T12:00:00Z",
  "architecture" : "x86_64",
  "region" : "eu-west-1"
}"#;

const PROVIDER_DOCUMENT: &[u8] = include_bytes!("../crates/crypto/testdata/instance1-document.json");
const PROVIDER_PKCS7: &str = include_str!("../crates/crypto/testdata/instance1.pkcs7");
const OTHER_PROVIDER_PKCS7: &str = include_str!("../crates/crypto/testdata/instance2.pkcs7");

fn signing_root() -> SigningRoot {
    SigningRoot::generate("integration root", SystemTime::now() + Duration::from_secs(3600)).unwrap()
}

/// Metadata service answering with `document` and `signature`
async fn metadata_service(document: &[u8], signature: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(DOCUMENT_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(document.to_vec()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(SIGNATURE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(signature))
        .mount(&server)
        .await;
    server
}

fn client_for(metadata: &MockServer) -> InstanceIdentityCredentials {
    let config = MetadataConfig {
        document_url: format!("{}{}", metadata.uri(), DOCUMENT_PATH),
        signature_url: format!("{}{}", metadata.uri(), SIGNATURE_PATH),
        max_attempts: 2,
        retry_delay: Duration::from_millis(10),
        request_timeout: Duration::from_secs(2),
    };
    InstanceIdentityCredentials::client(Arc::new(HttpMetadataSource::new(config).unwrap()))
}

#[tokio::test]
async fn test_signed_document_accepted() {
    let root = signing_root();
    let signature = root.signer().sign(DOCUMENT.as_bytes()).unwrap();
    let metadata = metadata_service(DOCUMENT.as_bytes(), &signature).await;

    let mut server =
        spawn_echo_server(InstanceIdentityCredentials::server(root.verifier().unwrap())).await;

    let mut conn = dial(&server.address(), &client_for(&metadata), &HandshakeConfig::default())
        .await
        .unwrap();
    assert_eq!(roundtrip(&mut conn, b"attested\n").await.unwrap(), b"attested\n");

    let info = server.next_accepted().await.unwrap().unwrap();
    let document = info.instance_identity().unwrap();
    assert_eq!(document, &InstanceIdentityDocument::from_json(DOCUMENT.as_bytes()).unwrap());
    assert_eq!(document.instance_id, "i-0123456789abcdef0");
    assert_eq!(document.account_id, "123456789012");
    assert_eq!(document.private_ip, "10.1.2.3");
    assert_eq!(document.availability_zone, "eu-west-1b");
}

#[tokio::test]
async fn test_provider_document_accepted_by_default_server() {
    let metadata = metadata_service(PROVIDER_DOCUMENT, PROVIDER_PKCS7).await;
    let mut server = spawn_echo_server(InstanceIdentityCredentials::server_default().unwrap()).await;

    let mut conn = dial(&server.address(), &client_for(&metadata), &HandshakeConfig::default())
        .await
        .unwrap();
    assert_eq!(roundtrip(&mut conn, b"provider\n").await.unwrap(), b"provider\n");

    let info = server.next_accepted().await.unwrap().unwrap();
    let document = info.instance_identity().unwrap();
    assert_eq!(document.instance_id, "i-0e90d494ecf1ea4bc");
    assert_eq!(document.account_id, "712349860883");
    assert_eq!(document.region, "us-east-1");
}

#[tokio::test]
async fn test_provider_signature_for_other_instance_rejected() {
    let metadata = metadata_service(PROVIDER_DOCUMENT, OTHER_PROVIDER_PKCS7).await;
    let mut server = spawn_echo_server(InstanceIdentityCredentials::server_default().unwrap()).await;

    let result = dial(&server.address(), &client_for(&metadata), &HandshakeConfig::default()).await;
    assert!(matches!(result, Err(HandshakeError::Rejected(_))));
    assert!(server.next_accepted().await.is_err());
}

#[tokio::test]
async fn test_appended_byte_rejected() {
    let root = signing_root();
    let signature = root.signer().sign(DOCUMENT.as_bytes()).unwrap();

    let mut tampered = DOCUMENT.as_bytes().to_vec();
    tampered.push(b'\n');
    let metadata = metadata_service(&tampered, &signature).await;

    let mut server =
        spawn_echo_server(InstanceIdentityCredentials::server(root.verifier().unwrap())).await;

    let result = dial(&server.address(), &client_for(&metadata), &HandshakeConfig::default()).await;
    match result {
        Err(HandshakeError::Rejected(reason)) => assert_eq!(reason, "invalid identity document"),
        other => panic!("expected rejection, got {:?}", other.map(|_| ())),
    }

    assert!(server.next_accepted().await.is_err());
}

#[tokio::test]
async fn test_substituted_root_rejected() {
    let trusted = signing_root();
    let impostor = signing_root();
    let signature = impostor.signer().sign(DOCUMENT.as_bytes()).unwrap();
    let metadata = metadata_service(DOCUMENT.as_bytes(), &signature).await;

    let mut server =
        spawn_echo_server(InstanceIdentityCredentials::server(trusted.verifier().unwrap())).await;

    let result = dial(&server.address(), &client_for(&metadata), &HandshakeConfig::default()).await;
    assert!(matches!(result, Err(HandshakeError::Rejected(_))));
    assert!(server.next_accepted().await.is_err());
}

#[tokio::test]
async fn test_metadata_outage_never_reaches_server() {
    let root = signing_root();
    let metadata = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&metadata)
        .await;

    let server =
        spawn_echo_server(InstanceIdentityCredentials::server(root.verifier().unwrap())).await;

    let result = dial(&server.address(), &client_for(&metadata), &HandshakeConfig::default()).await;
    assert!(matches!(
        result,
        Err(HandshakeError::Metadata(MetadataError::Status { .. }))
    ));
}

#[tokio::test]
async fn test_identity_over_tls() {
    let root = signing_root();
    let signature = root.signer().sign(DOCUMENT.as_bytes()).unwrap();
    let metadata = metadata_service(DOCUMENT.as_bytes(), &signature).await;

    let listener = bind().await;
    let address = listener.local_addr().unwrap().to_string();
    let cert = mint_server_certificate(&address, SystemTime::now() + Duration::from_secs(3600)).unwrap();

    let tls_server =
        TlsCredentials::server(vec![cert.certificate_der.clone()], cert.private_key_der.clone()).unwrap();
    let tls_client = TlsCredentials::client(root_store(vec![cert.certificate_der.clone()]).unwrap()).unwrap();

    let mut server = spawn_echo_server_on(
        listener,
        InstanceIdentityCredentials::server(root.verifier().unwrap()).wrapping(tls_server),
    );
    let client = client_for(&metadata).wrapping(tls_client);

    let mut conn = dial(&address, &client, &HandshakeConfig::default()).await.unwrap();
    assert!(conn.auth_info().unwrap().tls_info().is_some());
    assert_eq!(roundtrip(&mut conn, b"both\n").await.unwrap(), b"both\n");

    let info = server.next_accepted().await.unwrap().unwrap();
    assert_eq!(info.instance_identity().unwrap().region, "eu-west-1");
    assert!(info.wrapped().and_then(|inner| inner.tls_info()).is_some());
}
