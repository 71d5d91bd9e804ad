//! Core runtime infrastructure: configuration, orchestration, and time.

pub mod config;
pub mod runtime;
pub mod time;

pub use config::*;
pub use runtime::*;
pub use time::*;
