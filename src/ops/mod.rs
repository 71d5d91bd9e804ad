//! Operations and observability.

pub mod telemetry;

pub use telemetry::{init_tracing, start_http, LogHandle, TelemetrySources};
