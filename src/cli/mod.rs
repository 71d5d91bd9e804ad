//! Photon CLI - unified command-line interface.
//!
//! Single binary entry point for:
//! - `photon start` - Start the gateway
//! - `photon check` - Validate configuration
//! - `photon fetch` - Read a feed through a running gateway
//! - `photon publish` - Publish an entry through a running gateway

mod args;
pub mod commands;

pub use args::{CheckArgs, Cli, ClientArgs, Commands, FetchArgs, PublishArgs, StartArgs};
