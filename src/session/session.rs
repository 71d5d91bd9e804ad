//! One session: a persistent protocol connection plus every piece of
//! correlation and subscription state scoped to it.
//!
//! Inbound stanzas are demultiplexed in a fixed order: publish-event
//! notifications feed the matching subscription (and the fan-out forwarder),
//! then reply correlation resolves at most one pending query, then raw
//! observers run in arrival order. Queries have no retry: a reply either
//! arrives before the correlation window elapses or the caller receives a
//! synthesized `service-unavailable` error.

use crate::cache::TtlCache;
use crate::core::time::Clock;
use crate::fanout::{Emission, Forwarder};
use crate::session::context::PresenceLedger;
use crate::session::subscription::{subscription_key, SharedSubscription, Subscription};
use crate::wire::{
    Connection, ErrorCondition, Iq, IqBody, Jid, Message, Presence, PubsubEvent, PubsubRequest,
    Stanza, StanzaError,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

type StanzaObserver = Box<dyn FnMut(&Stanza) -> bool + Send>;

/// Expiration windows for the per-session caches.
#[derive(Debug, Clone)]
pub struct SessionTimeouts {
    /// How long a query waits for its reply.
    pub reply_ttl: Duration,
    /// How long a subscription entry lives without re-insertion.
    pub subscription_ttl: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            reply_ttl: Duration::from_secs(15),
            subscription_ttl: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("connection closed before the query could be sent")]
    ConnectionClosed,
    #[error("session ended while awaiting the reply")]
    SessionEnded,
}

#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error("subscribe request rejected: {0}")]
    Rejected(StanzaError),
    #[error("subscription entry evicted before the subscription resolved")]
    Evicted,
}

/// Handle to one live session. Cheap to clone; the last clone dropping does
/// not close the connection — that happens via [`Session::end`] or session
/// cache eviction.
#[derive(Clone)]
pub struct Session<C: Clock> {
    inner: Arc<SessionInner<C>>,
}

struct SessionInner<C: Clock> {
    id: Option<String>,
    jid: Jid,
    clock: C,
    connection: Connection,
    replies: Mutex<TtlCache<oneshot::Sender<Stanza>>>,
    subscriptions: Mutex<TtlCache<Arc<Mutex<Subscription>>>>,
    observers: Mutex<Vec<StanzaObserver>>,
    presence: Arc<PresenceLedger>,
    forwarder: Option<Arc<Forwarder>>,
}

impl<C: Clock> Session<C> {
    pub fn new(
        id: Option<String>,
        mut connection: Connection,
        clock: C,
        presence: Arc<PresenceLedger>,
        forwarder: Option<Arc<Forwarder>>,
        timeouts: SessionTimeouts,
    ) -> Self {
        let inbound = connection
            .take_inbound()
            .expect("a session is built from a fresh connection");
        let jid = connection.jid().clone();

        let replies = TtlCache::new(timeouts.reply_ttl).with_expiry_handler(
            |id: &str, pending: oneshot::Sender<Stanza>| {
                tracing::debug!(correlation = id, "no reply before the window elapsed");
                let _ = pending.send(Stanza::reply_timeout(id));
            },
        );
        let subscriptions = TtlCache::new(timeouts.subscription_ttl).with_expiry_handler(
            |key: &str, _entry: Arc<Mutex<Subscription>>| {
                // No unsubscribe is sent and no presence count is released
                // here; see DESIGN.md.
                tracing::debug!(topic = key, "subscription entry expired");
            },
        );

        let inner = Arc::new(SessionInner {
            id,
            jid,
            clock,
            connection,
            replies: Mutex::new(replies),
            subscriptions: Mutex::new(subscriptions),
            observers: Mutex::new(Vec::new()),
            presence,
            forwarder,
        });
        SessionInner::spawn_demux(&inner, inbound);
        SessionInner::spawn_sweeper(&inner, &timeouts);
        Session { inner }
    }

    /// The session-cache key, absent for the anonymous session.
    pub fn id(&self) -> Option<&str> {
        self.inner.id.as_deref()
    }

    /// The address the connection is bound to.
    pub fn jid(&self) -> &Jid {
        &self.inner.jid
    }

    /// Issue a query and await the correlated reply. The reply is either the
    /// stanza echoing our generated id — success and error replies resolve
    /// the same way — or, if nothing arrives inside the reply window, a
    /// synthesized `service-unavailable` error indistinguishable from a
    /// genuine one.
    pub async fn send_query(&self, to: Jid, body: IqBody) -> Result<Stanza, QueryError> {
        if self.inner.connection.is_closed() {
            return Err(QueryError::SessionEnded);
        }
        let (id, rx) = {
            let mut cache = self.inner.replies.lock();
            let id = cache.generate_key();
            let (tx, rx) = oneshot::channel();
            cache.put_at(id.clone(), tx, self.inner.clock.now());
            (id, rx)
        };
        let stanza = Stanza::Iq(Iq {
            id: id.clone(),
            from: Some(self.inner.jid.clone()),
            to: Some(to),
            body,
        });
        if self.inner.connection.sender().send(stanza).await.is_err() {
            self.inner.replies.lock().remove(&id);
            return Err(QueryError::ConnectionClosed);
        }
        rx.await.map_err(|_| QueryError::SessionEnded)
    }

    /// Answer a query the remote peer initiated: unsolicited success
    /// acknowledgment correlated to the request's id and addressing.
    pub async fn reply_to_query(&self, request: &Iq) -> Result<(), QueryError> {
        self.inner
            .connection
            .sender()
            .send(Stanza::Iq(Iq::acknowledge(request)))
            .await
            .map_err(|_| QueryError::ConnectionClosed)
    }

    /// Register an observer for every inbound stanza. Returning true marks
    /// the observer done and deregisters it; this is the mechanism for
    /// one-off waits outside the query/reply pattern.
    pub fn on_stanza(&self, observer: impl FnMut(&Stanza) -> bool + Send + 'static) {
        self.inner.observers.lock().push(Box::new(observer));
    }

    /// Subscribe to a topic. The first caller for a topic issues the one
    /// protocol request; callers arriving while it is in flight share its
    /// outcome, and callers arriving after success resolve immediately with
    /// the same accumulated record.
    pub async fn subscribe(
        &self,
        service: &Jid,
        node: &str,
    ) -> Result<SharedSubscription, SubscribeError> {
        let key = subscription_key(service.domain_part(), node);
        let (tx, rx) = oneshot::channel();
        let initiated = {
            let mut cache = self.inner.subscriptions.lock();
            let now = self.inner.clock.now();
            match cache.get_at(&key, now) {
                Some(entry) => {
                    entry.clone().lock().push_waiter(tx);
                    false
                }
                None => {
                    let entry = Arc::new(Mutex::new(Subscription::subscribing(tx)));
                    cache.put_at(key.clone(), entry, now);
                    true
                }
            }
        };

        if initiated {
            self.drive_subscribe(service, node, &key).await;
        }

        match rx.await {
            Ok(Ok(data)) => Ok(data),
            Ok(Err(err)) => Err(SubscribeError::Rejected(err)),
            Err(_) => Err(SubscribeError::Evicted),
        }
    }

    /// Close the underlying connection. Safe to call repeatedly; operations
    /// issued after this fail rather than hang.
    pub fn end(&self) {
        self.inner.connection.close();
    }

    /// Number of live subscription entries; telemetry only.
    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.lock().len()
    }

    async fn drive_subscribe(&self, service: &Jid, node: &str, key: &str) {
        // Presence toward a domain precedes its first subscription. The
        // count is not rolled back if the subscribe fails below.
        if self.inner.presence.announce(service.domain_part()) {
            let presence = Stanza::Presence(Presence {
                from: Some(self.inner.jid.clone()),
                to: Some(Jid::domain(service.domain_part())),
            });
            if self.inner.connection.sender().send(presence).await.is_err() {
                self.fail_subscribe(
                    key,
                    StanzaError::new(ErrorCondition::ServiceUnavailable)
                        .with_text("connection closed"),
                );
                return;
            }
        }
        let outcome = self
            .send_query(
                service.clone(),
                IqBody::Set(PubsubRequest::Subscribe {
                    node: node.to_string(),
                }),
            )
            .await;
        match classify_subscribe_reply(outcome) {
            Ok(()) => {
                let entry = {
                    let mut cache = self.inner.subscriptions.lock();
                    cache.get_at(key, self.inner.clock.now()).cloned()
                };
                // An entry evicted while the request was in flight leaves
                // nothing to confirm; its waiters observe the eviction.
                if let Some(entry) = entry {
                    let (data, waiters) = { entry.lock().confirm(node) };
                    for waiter in waiters {
                        let _ = waiter.send(Ok(data.clone()));
                    }
                }
            }
            Err(err) => self.fail_subscribe(key, err),
        }
    }

    fn fail_subscribe(&self, key: &str, err: StanzaError) {
        let removed = self.inner.subscriptions.lock().remove(key);
        if let Some(entry) = removed {
            for waiter in { entry.lock().take_waiters() } {
                let _ = waiter.send(Err(err.clone()));
            }
        }
    }
}

impl<C: Clock> std::fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("jid", &self.inner.jid)
            .finish()
    }
}

impl<C: Clock> SessionInner<C> {
    fn spawn_demux(inner: &Arc<Self>, mut inbound: mpsc::Receiver<Stanza>) {
        let inner = inner.clone();
        let mut shutdown = inner.connection.shutdown_watch();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    next = inbound.recv() => match next {
                        Some(stanza) => inner.dispatch(stanza),
                        None => break,
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            // Unblock callers still awaiting replies: dropping their pending
            // senders surfaces as a session-ended error, not a hang.
            inner.replies.lock().drain();
        });
    }

    fn spawn_sweeper(inner: &Arc<Self>, timeouts: &SessionTimeouts) {
        let inner = inner.clone();
        let mut shutdown = inner.connection.shutdown_watch();
        let tick = (timeouts.reply_ttl / 4)
            .clamp(Duration::from_millis(10), Duration::from_secs(1));
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = inner.clock.sleep(tick) => {
                        let now = inner.clock.now();
                        inner.replies.lock().sweep_at(now);
                        inner.subscriptions.lock().sweep_at(now);
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        });
    }

    /// Demultiplex one inbound stanza: (a) publish events, (b) reply
    /// correlation, then raw observers.
    fn dispatch(&self, stanza: Stanza) {
        if let Stanza::Message(message) = &stanza {
            if let Some(event) = &message.event {
                self.observe_event(message, event);
            }
        }
        if let Some(id) = stanza.id() {
            let pending = self.replies.lock().remove(id);
            if let Some(tx) = pending {
                let _ = tx.send(stanza.clone());
            }
        }
        let mut observers = self.observers.lock();
        observers.retain_mut(|observer| !observer(&stanza));
    }

    fn observe_event(&self, message: &Message, event: &PubsubEvent) {
        let Some(sender) = &message.from else { return };
        let key = subscription_key(sender.domain_part(), &event.node);
        let entry = {
            let mut cache = self.subscriptions.lock();
            cache.get_at(&key, self.clock.now()).cloned()
        };
        let Some(entry) = entry else { return };
        let Some(data) = entry.lock().data() else { return };

        let mut emissions = Vec::with_capacity(event.items.len());
        {
            let mut record = data.lock();
            if record.origin.is_none() {
                record.origin = Some(sender.clone());
            }
            for item in &event.items {
                record.items.push(item.clone());
                let id = Forwarder::item_id(item);
                let prev = record.last_id.take();
                record.prev_id = prev.clone();
                record.last_id = Some(id.clone());
                emissions.push(Emission {
                    id,
                    prev_id: prev,
                    entry: item.clone(),
                });
            }
        }
        if let Some(forwarder) = &self.forwarder {
            forwarder.publish(&self.jid, &event.node, &emissions);
        }
    }
}

fn classify_subscribe_reply(outcome: Result<Stanza, QueryError>) -> Result<(), StanzaError> {
    match outcome {
        Ok(Stanza::Iq(iq)) => match iq.body {
            IqBody::Result(_) => Ok(()),
            IqBody::Error(err) => Err(err),
            _ => Err(unexpected_reply()),
        },
        Ok(_) => Err(unexpected_reply()),
        Err(_) => Err(StanzaError::new(ErrorCondition::ServiceUnavailable)
            .with_text("connection closed")),
    }
}

fn unexpected_reply() -> StanzaError {
    StanzaError::new(ErrorCondition::ServiceUnavailable).with_text("unexpected reply shape")
}
