//! Session resolution for inbound HTTP requests.
//!
//! Resolution order: a presented session id wins on a cache hit (and the hit
//! refreshes the entry by re-insertion); otherwise credentials create and
//! cache a fresh session under a newly generated id; otherwise requests share
//! the process-wide anonymous session, created lazily through the same
//! connect path and retried on each request after a failed creation.

use crate::cache::TtlCache;
use crate::core::time::Clock;
use crate::fanout::Forwarder;
use crate::session::context::GatewayContext;
use crate::session::session::{Session, SessionTimeouts};
use crate::wire::{ConnectAuth, ConnectError, Connector, Credentials};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("authentication rejected by the pubsub server")]
    Unauthorized,
    #[error("could not reach the pubsub server: {0}")]
    Connection(String),
}

/// Outcome of resolving a request to a session. `assigned_id` is set only
/// when a new credentialed session was created; the caller returns it so the
/// client can reuse the session.
pub struct Resolved<C: Clock> {
    pub session: Session<C>,
    pub assigned_id: Option<String>,
}

/// Selects or creates the session serving one inbound request.
pub struct SessionProvider<N: Connector, C: Clock> {
    connector: N,
    clock: C,
    context: Arc<GatewayContext<C>>,
    sessions: Arc<Mutex<TtlCache<Session<C>>>>,
    forwarder: Option<Arc<Forwarder>>,
    timeouts: SessionTimeouts,
}

impl<N: Connector, C: Clock> SessionProvider<N, C> {
    pub fn new(
        connector: N,
        clock: C,
        context: Arc<GatewayContext<C>>,
        session_ttl: Duration,
        timeouts: SessionTimeouts,
        forwarder: Option<Arc<Forwarder>>,
    ) -> Self {
        let sessions = TtlCache::new(session_ttl).with_expiry_handler(
            |id: &str, session: Session<C>| {
                tracing::info!(session = id, "session expired; closing its connection");
                session.end();
            },
        );
        Self {
            connector,
            clock,
            context,
            sessions: Arc::new(Mutex::new(sessions)),
            forwarder,
            timeouts,
        }
    }

    /// Resolve a session for a request. A stale presented id is silently
    /// discarded when credentials allow creating a replacement.
    pub async fn resolve(
        &self,
        session_id: Option<&str>,
        credentials: Option<&Credentials>,
    ) -> Result<Resolved<C>, ProviderError> {
        if let Some(id) = session_id {
            let hit = {
                let mut cache = self.sessions.lock();
                let now = self.clock.now();
                let found = cache.get_at(id, now).cloned();
                if let Some(session) = &found {
                    // Refresh the TTL; `get` alone does not extend it.
                    cache.put_at(id, session.clone(), now);
                }
                found
            };
            if let Some(session) = hit {
                return Ok(Resolved {
                    session,
                    assigned_id: None,
                });
            }
        }

        if let Some(creds) = credentials {
            let connection = self
                .connector
                .connect(ConnectAuth::Credentials(creds))
                .await
                .map_err(classify)?;
            let (id, session) = {
                let mut cache = self.sessions.lock();
                let id = cache.generate_key();
                let session = Session::new(
                    Some(id.clone()),
                    connection,
                    self.clock.clone(),
                    self.context.presence(),
                    self.forwarder.clone(),
                    self.timeouts.clone(),
                );
                cache.put_at(id.clone(), session.clone(), self.clock.now());
                (id, session)
            };
            return Ok(Resolved {
                session,
                assigned_id: Some(id),
            });
        }

        // Anonymous fallback. The slot lock is held across the connect so
        // concurrent first requests serialize on one attempt, and a failed
        // attempt leaves the slot empty for the next request to retry.
        let mut slot = self.context.anonymous_slot().await;
        if let Some(session) = slot.as_ref() {
            return Ok(Resolved {
                session: session.clone(),
                assigned_id: None,
            });
        }
        let connection = self
            .connector
            .connect(ConnectAuth::Anonymous)
            .await
            .map_err(classify)?;
        let session = Session::new(
            None,
            connection,
            self.clock.clone(),
            self.context.presence(),
            self.forwarder.clone(),
            self.timeouts.clone(),
        );
        *slot = Some(session.clone());
        Ok(Resolved {
            session,
            assigned_id: None,
        })
    }

    /// Number of cached (non-anonymous) sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Sum of subscription entries across cached sessions.
    pub fn subscription_count(&self) -> usize {
        self.sessions
            .lock()
            .values()
            .map(Session::subscription_count)
            .sum()
    }

    pub fn context(&self) -> Arc<GatewayContext<C>> {
        self.context.clone()
    }

    /// Periodically evict expired sessions until shutdown is signaled.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let provider = self.clone();
        let ttl = { provider.sessions.lock().ttl() };
        let tick = (ttl / 4).clamp(Duration::from_millis(100), Duration::from_secs(30));
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = provider.clock.sleep(tick) => {
                        let now = provider.clock.now();
                        provider.sessions.lock().sweep_at(now);
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}

fn classify(err: ConnectError) -> ProviderError {
    match err {
        ConnectError::Unauthorized => ProviderError::Unauthorized,
        ConnectError::Transport(detail) => ProviderError::Connection(detail),
    }
}
