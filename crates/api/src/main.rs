//! CoTravel Daemon
//!
//! Serves the escrow HTTP API over the configured Stellar network.

use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod server;

use cotravel_engine::{Engine, EngineConfig};

#[derive(Parser)]
#[command(name = "cotraveld")]
#[command(about = "CoTravel daemon - group-funding invoice escrow on Stellar")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "~/.cotravel/config.toml")]
    config: PathBuf,

    /// Store directory
    #[arg(short, long)]
    store: Option<PathBuf>,

    /// API listen address
    #[arg(short, long)]
    listen: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn expand_home(path: &std::path::Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("CoTravel daemon v{}", env!("CARGO_PKG_VERSION"));

    let mut config = EngineConfig::load(&expand_home(&cli.config))?;
    if let Some(store) = cli.store {
        config.store_path = store;
    }
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }

    // Ensure store directory exists
    tokio::fs::create_dir_all(&config.store_path).await?;

    let engine = Engine::open(&config)?;
    info!("Network: {}", config.network.rpc_url);

    let addr: std::net::SocketAddr = config.listen.parse()?;
    server::serve(addr, engine).await
}
