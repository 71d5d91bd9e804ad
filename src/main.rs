//! Photon - unified CLI entrypoint.
//!
//! Usage:
//!   photon start --config config/photon.toml
//!   photon check --config config/photon.toml
//!   photon fetch --service pubsub.example.org --node news
//!   photon publish --service pubsub.example.org --node news --content "hi"

use anyhow::Result;
use clap::Parser;
use photon::cli::commands::{run_check, run_fetch, run_publish, run_start};
use photon::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start(args) => run_start(args).await,
        Commands::Check(args) => run_check(args),
        Commands::Fetch(args) => run_fetch(args).await,
        Commands::Publish(args) => run_publish(args).await,
    }
}
