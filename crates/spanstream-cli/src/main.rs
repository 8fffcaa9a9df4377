//! Spanstream replay CLI

mod cli;
mod replay;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Cli;
use spanstream_core::EventKind;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout carries only event frames
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("spanstream={0},spanstream_core={0}", cli.log_level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match replay::run(&cli).await? {
        EventKind::Done => Ok(()),
        other => anyhow::bail!("stream ended with {}", other.as_str()),
    }
}
