use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use ml_logger::codec::Codec;
use ml_logger::{Server, ServerConfig};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Experiment logging server
#[derive(Parser, Debug)]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Root directory for record logs (overrides the config file)
    #[arg(long, alias = "log-dir")]
    root: Option<PathBuf>,

    /// Address to bind to
    #[arg(long)]
    host: Option<IpAddr>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Compression for new record frames: plain, lz4 or zstd
    #[arg(long)]
    codec: Option<Codec>,

    /// Largest accepted request body in bytes
    #[arg(long)]
    max_body: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    let args = Cli::parse();

    let mut config = if let Some(path) = &args.config {
        debug!("loading config from {:?}", path);
        ServerConfig::load(path)
            .await
            .with_context(|| format!("failed to load {}", path.display()))?
    } else {
        debug!("using default config");
        ServerConfig::default()
    };
    if let Some(root) = args.root {
        config.root = root;
    }
    if let Some(host) = args.host {
        config.bind_addr = Some(host);
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(codec) = args.codec {
        config.codec = codec;
    }
    if let Some(max_body) = args.max_body {
        config.max_body = max_body;
    }

    let server = Server::spawn(config).await?;
    info!("serving at {}", server.url());

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    server.shutdown().await?;
    Ok(())
}
