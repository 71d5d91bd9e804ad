//! Expiring caches shared by the session, correlation, and subscription layers.

pub mod ttl;

pub use ttl::TtlCache;
