//! TCP dial/accept with a bounded handshake

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::{AsyncStream, HandshakeError, Peer, SecureConn, TransportCredentials};

#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Upper bound on connect plus handshake
    pub timeout: Duration,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
        }
    }
}

/// Connect to `addr` and run the client side of `creds`
pub async fn dial(
    addr: &str,
    creds: &dyn TransportCredentials,
    config: &HandshakeConfig,
) -> Result<SecureConn, HandshakeError> {
    let attempt = async {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let peer_addr = stream.peer_addr().ok();

        let (conn, auth_info) = creds.client_handshake(addr, Box::new(stream)).await?;

        Ok::<_, HandshakeError>(SecureConn::new(
            conn,
            Peer {
                addr: peer_addr,
                auth_info: auth_info.map(Arc::new),
            },
        ))
    };

    match timeout(config.timeout, attempt).await {
        Ok(result) => {
            if result.is_ok() {
                debug!("Connected to {}", addr);
            }
            result
        }
        Err(_) => {
            warn!("Handshake with {} exceeded {:?}", addr, config.timeout);
            Err(HandshakeError::DeadlineExceeded)
        }
    }
}

/// Accept one connection and run the server side of `creds`
///
/// Waiting for the connection is unbounded; only the handshake is timed.
pub async fn accept(
    listener: &TcpListener,
    creds: &dyn TransportCredentials,
    config: &HandshakeConfig,
) -> Result<SecureConn, HandshakeError> {
    let (stream, peer_addr) = listener.accept().await?;
    stream.set_nodelay(true)?;
    handshake_server(stream, peer_addr, creds, config).await
}

/// Server handshake on an already-accepted stream
pub async fn handshake_server<S>(
    stream: S,
    peer_addr: SocketAddr,
    creds: &dyn TransportCredentials,
    config: &HandshakeConfig,
) -> Result<SecureConn, HandshakeError>
where
    S: AsyncStream + 'static,
{
    match timeout(config.timeout, creds.server_handshake(Box::new(stream))).await {
        Ok(Ok((conn, auth_info))) => {
            debug!("Handshake with {} completed", peer_addr);
            Ok(SecureConn::new(
                conn,
                Peer {
                    addr: Some(peer_addr),
                    auth_info: auth_info.map(Arc::new),
                },
            ))
        }
        Ok(Err(e)) => {
            debug!("Handshake with {} failed: {}", peer_addr, e);
            Err(e)
        }
        Err(_) => {
            warn!("Handshake with {} exceeded {:?}", peer_addr, config.timeout);
            Err(HandshakeError::DeadlineExceeded)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{HandshakeCredentials, handshake_identity};
    use serde_json::{Value, json};
    use shakehand_protocol::Claims;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn short() -> HandshakeConfig {
        HandshakeConfig {
            timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn test_dial_accept_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server_task = tokio::spawn(async move {
            let server = HandshakeCredentials::server(|claims: &Claims| -> Result<Value, String> {
                claims.get("key").cloned().ok_or_else(|| "no key".to_string())
            });
            let mut conn = accept(&listener, &server, &HandshakeConfig::default())
                .await
                .unwrap();
            let identity = handshake_identity(&conn.context()).cloned();

            let mut buf = [0u8; 4];
            conn.read_exact(&mut buf).await.unwrap();
            conn.write_all(&buf).await.unwrap();
            identity
        });

        let claims = json!({"key": "v"}).as_object().cloned().unwrap();
        let client = HandshakeCredentials::client(claims);
        let mut conn = dial(&addr, &client, &HandshakeConfig::default()).await.unwrap();
        assert_eq!(conn.peer().addr.map(|a| a.to_string()), Some(addr));

        conn.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        assert_eq!(server_task.await.unwrap(), Some(json!("v")));
    }

    #[tokio::test]
    async fn test_dial_deadline() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        // Accepts, then never answers
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let client = HandshakeCredentials::client(Claims::new());
        let result = dial(&addr, &client, &short()).await;
        assert!(matches!(result, Err(HandshakeError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn test_accept_deadline() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Connects, then never sends claims
        let silent = tokio::spawn(async move {
            let stream = TcpStream::connect(addr).await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let server = HandshakeCredentials::server(|_: &Claims| -> Result<Value, String> { Ok(Value::Null) });
        let result = accept(&listener, &server, &short()).await;
        assert!(matches!(result, Err(HandshakeError::DeadlineExceeded)));

        silent.abort();
    }

    #[tokio::test]
    async fn test_dial_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let client = HandshakeCredentials::client(Claims::new());
        let result = dial(&addr, &client, &short()).await;
        assert!(matches!(result, Err(HandshakeError::Transport(_))));
    }
}
