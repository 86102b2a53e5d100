//! `shakehand probe`: dial, authenticate, round-trip one line

use anyhow::{Result, bail};
use shakehand_transport::dial;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::info;

use crate::config::ShakehandConfig;
use crate::creds::{client_credentials, describe};

pub async fn run(config: &ShakehandConfig, addr: Option<String>, message: &str) -> Result<()> {
    let addr = addr.unwrap_or_else(|| config.server.address.clone());
    let creds = client_credentials(config).await?;

    let mut conn = dial(&addr, creds.as_ref(), &config.handshake.handshake_config()).await?;
    info!("Connected to {}: {}", addr, describe(conn.auth_info()));

    let line = format!("{}\n", message);
    conn.write_all(line.as_bytes()).await?;
    conn.flush().await?;

    let mut echoed = vec![0u8; line.len()];
    conn.read_exact(&mut echoed).await?;
    if echoed != line.as_bytes() {
        bail!("server echoed {:?}", String::from_utf8_lossy(&echoed));
    }

    println!("{} ok ({} byte round trip)", addr, line.len());
    Ok(())
}
