//! `shakehand serve`: accept, authenticate, echo

use anyhow::Result;
use shakehand_transport::{SecureConn, TransportCredentials, handshake_server};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::config::ShakehandConfig;
use crate::creds::{describe, server_credentials};

pub async fn run(config: &ShakehandConfig) -> Result<()> {
    let creds: Arc<dyn TransportCredentials> = Arc::from(server_credentials(config).await?);
    let handshake = config.handshake.handshake_config();

    let listener = TcpListener::bind(config.server.bind).await?;
    info!(
        "Listening on {} ({:?} mode, advertised as {})",
        config.server.bind, config.server.mode, config.server.address
    );

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer_addr) = accepted?;
                let creds = creds.clone();
                let handshake = handshake.clone();

                tokio::spawn(async move {
                    match handshake_server(stream, peer_addr, creds.as_ref(), &handshake).await {
                        Ok(conn) => {
                            info!("{} authenticated: {}", peer_addr, describe(conn.auth_info()));
                            if let Err(e) = echo(conn).await {
                                debug!("Connection from {} ended: {}", peer_addr, e);
                            }
                        }
                        Err(e) => warn!("Handshake with {} failed: {}", peer_addr, e),
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                return Ok(());
            }
        }
    }
}

async fn echo(conn: SecureConn) -> std::io::Result<u64> {
    let (mut reader, mut writer) = tokio::io::split(conn);
    tokio::io::copy(&mut reader, &mut writer).await
}
