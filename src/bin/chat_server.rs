//! Chat server front-end.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{info, Level};

use chat_protocol::config::{parse_port, NetworkConfig};
use chat_protocol::server::Server;
use chat_protocol::utils::logging;

/// Example chat server. Don't use this for a real chat system.
#[derive(Parser)]
#[command(name = "chat-server")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Base TCP port; TLS listens on port + 1. Accepts 0x-prefixed hex.
    #[arg(short, long, value_parser = parse_port)]
    port: Option<u16>,

    /// Bind to all interfaces instead of loopback
    #[arg(short, long)]
    global: bool,

    /// Buffer binary frames into a single write
    #[arg(short)]
    buffered: bool,

    /// PEM certificate chain for the TLS listener
    #[arg(short, long, requires = "key")]
    cert: Option<PathBuf>,

    /// PEM private key matching --cert
    #[arg(short, long, requires = "cert")]
    key: Option<PathBuf>,

    /// Write a self-signed certificate to --cert/--key before starting
    #[arg(long, requires = "cert")]
    generate_cert: bool,

    /// TOML configuration file; flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log as JSON
    #[arg(long)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => NetworkConfig::from_file(path)?,
        None => NetworkConfig::from_env()?,
    };
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    config.server.global_bind |= cli.global;
    config.server.buffered |= cli.buffered;
    if cli.cert.is_some() {
        config.server.cert_path = cli.cert.clone();
        config.server.key_path = cli.key.clone();
    }
    config.logging.json_format |= cli.json;
    if cli.verbose {
        config.logging.log_level = Level::DEBUG;
    }

    logging::init(&config.logging)?;
    config
        .server
        .prepare(cli.generate_cert)
        .context("invalid server configuration")?;

    let server = Server::bind(&config.server, &config.udp)
        .await
        .context("failed to start listeners")?;
    for (transport, addr) in server.local_addrs() {
        info!(transport, %addr, "Server listening");
    }

    server.run().await?;
    info!("Server stopped");
    Ok(())
}
