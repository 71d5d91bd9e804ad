//! Start command - launches the Photon gateway.

use crate::cli::args::{CheckArgs, StartArgs};
use crate::core::config::Config;
use crate::core::runtime::Runtime;
use crate::core::time::SystemClock;
use crate::ops::telemetry;
use anyhow::Result;
use std::env;

pub async fn run_start(args: StartArgs) -> Result<()> {
    // Route the config path through the environment so Config::load_from_env
    // applies the same overrides a bare start would.
    env::set_var("PHOTON_CONFIG", args.config.display().to_string());

    let config = Config::load_from_env()?;
    let log_handle = telemetry::init_tracing(config.telemetry.log_level.as_deref())?;
    let clock = SystemClock;
    let mut runtime = Runtime::new(config, clock, Some(log_handle))?;
    runtime.run().await
}

pub fn run_check(args: CheckArgs) -> Result<()> {
    let config = Config::load(&args.config)?;
    config.validate()?;
    println!("configuration ok: {}", args.config.display());
    Ok(())
}
