use std::{
    io::IsTerminal,
    net::{Ipv4Addr, SocketAddr},
    path::PathBuf,
};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use multicast_broker::{config::CoordinatorConfig, server::Server};

/// Run the multicast coordinator.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file: listen port on line 1, retention timeout in seconds on line 2.
    config: PathBuf,
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(std::io::stdout().is_terminal())
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = CoordinatorConfig::load(&cli.config)?;

    let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port)))
        .await
        .with_context(|| format!("failed to bind port {}", config.port))?;
    let server = Server::new(listener, &config);
    let addr = server.local_addr()?;
    info!("coordinator listening on {}", addr);
    info!(
        retention_secs = config.retention.as_secs(),
        "buffering messages for inactive participants"
    );

    if let Err(err) = server.run_until_ctrl_c().await {
        warn!("coordinator exited with error: {err:?}");
        return Err(err);
    }
    Ok(())
}
