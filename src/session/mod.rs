//! The session, subscription, and correlation layer.

pub mod context;
pub mod provider;
pub mod session;
pub mod subscription;

pub use context::{GatewayContext, PresenceLedger};
pub use provider::{ProviderError, Resolved, SessionProvider};
pub use session::{QueryError, Session, SessionTimeouts, SubscribeError};
pub use subscription::{subscription_key, SharedSubscription, Subscription, SubscriptionData};
