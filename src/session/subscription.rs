//! Per-topic subscription state machine.
//!
//! A topic is `unsubscribed` when the cache has no entry for it. The first
//! `subscribe` call creates an entry in `Subscribing` and issues the one and
//! only protocol request; callers arriving while the request is in flight
//! join the pending waiter list instead of issuing duplicates. A success
//! reply moves the entry to `Subscribed`, handing every waiter the same
//! shared data record; a failure removes the entry and fails every waiter.

use crate::feed::FeedEntry;
use crate::wire::{Jid, StanzaError};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Cache key for a subscription: messaging domain plus topic path.
pub fn subscription_key(domain: &str, node: &str) -> String {
    format!("{domain}/{node}")
}

/// Accumulated state for a subscribed topic. Every caller that subscribed
/// during the `Subscribing` window holds the same record, so items pushed
/// later are visible to all of them.
#[derive(Debug)]
pub struct SubscriptionData {
    /// Topic path this record accumulates for.
    pub node: String,
    /// Sender address of the first observed notification.
    pub origin: Option<Jid>,
    /// Items observed on the topic, in arrival order.
    pub items: Vec<FeedEntry>,
    /// Fan-out causal chain: the id emitted before `last_id`.
    pub prev_id: Option<String>,
    /// Fan-out causal chain: the most recently emitted id.
    pub last_id: Option<String>,
}

impl SubscriptionData {
    fn new(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            origin: None,
            items: Vec::new(),
            prev_id: None,
            last_id: None,
        }
    }
}

pub type SharedSubscription = Arc<Mutex<SubscriptionData>>;

/// A waiter parked while the subscribe request is in flight. Fulfilled with
/// the shared data record on success or the protocol error on failure.
pub type Waiter = oneshot::Sender<Result<SharedSubscription, StanzaError>>;

enum State {
    Subscribing { waiters: Vec<Waiter> },
    Subscribed { data: SharedSubscription },
}

/// One topic's subscription entry.
pub struct Subscription {
    state: State,
}

impl Subscription {
    /// Fresh entry for the caller that initiates the protocol request.
    pub fn subscribing(first: Waiter) -> Self {
        Self {
            state: State::Subscribing {
                waiters: vec![first],
            },
        }
    }

    /// Join an existing entry. While `Subscribing` the waiter is parked and
    /// `None` is returned; once `Subscribed` the shared record is returned
    /// for immediate fulfillment and the waiter is untouched by this entry.
    pub fn push_waiter(&mut self, waiter: Waiter) -> Option<SharedSubscription> {
        match &mut self.state {
            State::Subscribing { waiters } => {
                waiters.push(waiter);
                None
            }
            State::Subscribed { data } => {
                let data = data.clone();
                let _ = waiter.send(Ok(data.clone()));
                Some(data)
            }
        }
    }

    /// Transition to `Subscribed`, returning the shared record and the
    /// waiters to fulfill, in registration order.
    pub fn confirm(&mut self, node: &str) -> (SharedSubscription, Vec<Waiter>) {
        match &mut self.state {
            State::Subscribing { waiters } => {
                let drained = std::mem::take(waiters);
                let data: SharedSubscription = Arc::new(Mutex::new(SubscriptionData::new(node)));
                self.state = State::Subscribed { data: data.clone() };
                (data, drained)
            }
            State::Subscribed { data } => (data.clone(), Vec::new()),
        }
    }

    /// Drain the pending waiters for the failure path. The caller removes
    /// the cache entry first, so the topic reverts to absent.
    pub fn take_waiters(&mut self) -> Vec<Waiter> {
        match &mut self.state {
            State::Subscribing { waiters } => std::mem::take(waiters),
            State::Subscribed { .. } => Vec::new(),
        }
    }

    /// The shared record, once subscribed.
    pub fn data(&self) -> Option<SharedSubscription> {
        match &self.state {
            State::Subscribed { data } => Some(data.clone()),
            State::Subscribing { .. } => None,
        }
    }

    pub fn is_subscribed(&self) -> bool {
        matches!(self.state, State::Subscribed { .. })
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            State::Subscribing { waiters } => format!("subscribing({} waiting)", waiters.len()),
            State::Subscribed { .. } => "subscribed".to_string(),
        };
        f.debug_struct("Subscription").field("state", &state).finish()
    }
}
