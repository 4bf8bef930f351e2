use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use multicast_broker::{config::ParticipantConfig, participant};

/// Run a participant: type commands, receive multicasts into the log file.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file: id, log file path, and `<coordinator-ip> <coordinator-port>`.
    config: PathBuf,
}

// Logs go to stderr so stdout carries only command replies.
fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = ParticipantConfig::load(&cli.config)?;
    participant::run(config).await
}
