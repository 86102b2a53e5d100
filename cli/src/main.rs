//! shakehand CLI
//!
//! Runs a handshake-authenticated echo server, probes one, and manages the
//! signing material used by instance identity handshakes.

mod config;
mod creds;
mod keys;
mod probe;
mod serve;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use config::ShakehandConfig;

#[derive(Parser, Debug)]
#[command(name = "shakehand")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run in verbose mode
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Accept connections, authenticate them, echo their bytes
    Serve,

    /// Dial a server, authenticate, and round-trip one line
    Probe {
        /// Server address (defaults to [server] address)
        addr: Option<String>,

        #[arg(long, default_value = "ping")]
        message: String,
    },

    /// Generate a document signing root certificate and key
    MintRoot {
        #[arg(long, default_value = "shakehand identity root")]
        common_name: String,

        #[arg(long, default_value = "365")]
        valid_days: u64,

        #[arg(long, default_value = "root.pem")]
        cert_out: PathBuf,

        #[arg(long, default_value = "root.key")]
        key_out: PathBuf,
    },

    /// Sign an identity document, printing the base64 signature
    SignDocument {
        /// Document to sign, used byte-for-byte
        document: PathBuf,

        /// PKCS#8 PEM private key
        #[arg(long)]
        key: PathBuf,

        /// Write the signature here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let config = match &args.config {
        Some(path) => {
            let config = ShakehandConfig::load(path).await?;
            info!("Loaded configuration from {}", path.display());
            config
        }
        None => ShakehandConfig::default(),
    };

    match args.command {
        Commands::Serve => serve::run(&config).await?,
        Commands::Probe { addr, message } => probe::run(&config, addr, &message).await?,
        Commands::MintRoot {
            common_name,
            valid_days,
            cert_out,
            key_out,
        } => keys::mint_root(&common_name, valid_days, &cert_out, &key_out).await?,
        Commands::SignDocument { document, key, out } => {
            let signature = keys::sign_document(&document, &key).await?;
            match out {
                Some(path) => tokio::fs::write(&path, &signature).await?,
                None => println!("{}", signature),
            }
        }
    }

    Ok(())
}
