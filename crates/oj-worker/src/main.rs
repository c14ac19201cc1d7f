use anyhow::Result;
use clap::Parser;

mod cli;
mod client;
mod config;

use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing (output to stderr, initialize only once)
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    let config = config::WorkerConfig::load(&cli.config)?;

    let client = client::DispatcherClient::new(config);
    client.run().await
}
