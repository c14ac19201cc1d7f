use std::path::PathBuf;

use clap::Parser;

/// Judge worker: subscribes to the dispatcher, compiles and runs
/// submissions under the sandbox, and streams results back.
#[derive(Debug, Parser)]
#[command(name = "oj-worker", version, about)]
pub struct Cli {
    /// Path to the worker configuration file.
    #[arg(short, long, default_value = "oj-worker.toml")]
    pub config: PathBuf,
}
