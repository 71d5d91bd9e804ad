#![deny(clippy::all)]
// Module naming: common pattern in domain-driven code
#![allow(clippy::module_name_repetitions)]
// Documentation style: many terms don't need backticks
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
// API ergonomics: prefer simplicity over must_use annotations
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
// Format strings: allow non-inlined for readability
#![allow(clippy::uninlined_format_args)]
// Passing style
#![allow(clippy::needless_pass_by_value)]
// Option/Result patterns
#![allow(clippy::unnecessary_wraps)]

//! Photon - HTTP gateway to asynchronous pubsub messaging.
//!
//! Photon bridges stateless HTTP requests to a stateful, connection-oriented
//! pubsub protocol: it keeps persistent protocol connections alive across
//! independent HTTP calls, correlates outbound queries with asynchronous
//! replies, tracks subscriptions per topic, and forwards newly observed feed
//! items to an external real-time distribution service.
//!
//! # Module Organization
//!
//! ## Core
//! - `core::config` - Configuration parsing and validation
//! - `core::runtime` - Runtime orchestration
//! - `core::time` - Deterministic time utilities
//!
//! ## Caching
//! - `cache::ttl` - TTL cache backing sessions, correlation, subscriptions
//!
//! ## Wire
//! - `wire::jid` - Protocol addressing
//! - `wire::stanza` - Typed stanzas and pubsub payloads
//! - `wire::codec` - Length-prefixed frame codec
//! - `wire::connection` - Connections and the connect handshake
//!
//! ## Sessions
//! - `session::session` - Query correlation, demux, subscribe, lifecycle
//! - `session::subscription` - Per-topic subscription state machine
//! - `session::provider` - Session resolution for inbound requests
//! - `session::context` - Process-wide context (anonymous session, presence)
//!
//! ## Feeds & Fan-out
//! - `feed` - Feed entries and Atom/JSON rendering
//! - `fanout` - Best-effort push to the distribution service
//!
//! ## Surfaces
//! - `gateway` - The HTTP gateway
//! - `ops::telemetry` - Tracing setup and the ops endpoint
//!
//! ## CLI
//! - `cli` - clap-based command-line interface

// Core infrastructure
pub mod core;

// Caching
pub mod cache;

// Wire protocol
pub mod wire;

// Sessions
pub mod session;

// Feeds & fan-out
pub mod fanout;
pub mod feed;

// Surfaces
pub mod gateway;
pub mod ops;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::{config, runtime, time};
pub use cache::TtlCache;
pub use fanout::Forwarder;
pub use ops::telemetry;
pub use session::{GatewayContext, Session, SessionProvider};
pub use wire::{Connection, Connector, Jid, Stanza};
