//! CLI argument definitions using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Photon - HTTP gateway to asynchronous pubsub messaging.
#[derive(Parser)]
#[command(name = "photon")]
#[command(version)]
#[command(about = "Photon pubsub gateway and client tools")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the gateway
    Start(StartArgs),

    /// Validate a configuration file and exit
    Check(CheckArgs),

    /// Fetch a feed through a running gateway (kcat-style reader)
    Fetch(FetchArgs),

    /// Publish an entry through a running gateway (kcat-style writer)
    Publish(PublishArgs),
}

// -----------------------------------------------------------------------------
// Start / Check
// -----------------------------------------------------------------------------

#[derive(Args)]
pub struct StartArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/photon.toml")]
    pub config: PathBuf,
}

#[derive(Args)]
pub struct CheckArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/photon.toml")]
    pub config: PathBuf,
}

// -----------------------------------------------------------------------------
// Fetch / Publish client commands
// -----------------------------------------------------------------------------

/// Connection arguments shared by the client commands.
#[derive(Args, Clone)]
pub struct ClientArgs {
    /// Base URL of a running gateway
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    pub gateway: String,

    /// Pubsub service address, e.g. pubsub.example.org
    #[arg(long)]
    pub service: String,

    /// Topic path on the service
    #[arg(long)]
    pub node: String,

    /// Session id from a previous response, for connection reuse
    #[arg(long)]
    pub session: Option<String>,

    /// Account address for authenticated requests
    #[arg(long)]
    pub user: Option<String>,

    /// Password for authenticated requests
    #[arg(long)]
    pub password: Option<String>,
}

#[derive(Args)]
pub struct FetchArgs {
    #[command(flatten)]
    pub client: ClientArgs,

    /// Request the Atom rendering instead of JSON
    #[arg(long)]
    pub atom: bool,
}

#[derive(Args)]
pub struct PublishArgs {
    #[command(flatten)]
    pub client: ClientArgs,

    /// Entry content; read from stdin when omitted
    #[arg(long)]
    pub content: Option<String>,

    /// Optional entry title
    #[arg(long)]
    pub title: Option<String>,
}
