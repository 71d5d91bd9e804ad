//! Process-wide shared state, held in one explicit context object instead of
//! free-floating module globals: the anonymous session singleton and the
//! presence reference counts.

use crate::core::time::Clock;
use crate::session::Session;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Reference counts of active subscribers per messaging domain. A domain's
/// first subscriber triggers a presence announcement; later subscribers only
/// bump the count. Counts are never decremented: subscribe failures do not
/// roll back (a preserved quirk of this system, see DESIGN.md) and eviction
/// performs no protocol cleanup.
#[derive(Debug, Default)]
pub struct PresenceLedger {
    counts: Mutex<HashMap<String, u64>>,
}

impl PresenceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one more subscriber for the domain. Returns true when this is
    /// the domain's first, i.e. presence must be announced.
    pub fn announce(&self, domain: &str) -> bool {
        let mut counts = self.counts.lock();
        let count = counts.entry(domain.to_string()).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Current subscriber count for a domain.
    pub fn active(&self, domain: &str) -> u64 {
        *self.counts.lock().get(domain).unwrap_or(&0)
    }
}

/// Everything that outlives individual sessions: the presence ledger and the
/// slot for the shared anonymous session. The anonymous session is never
/// stored in the session cache, so it cannot expire independently of the
/// process; a failed creation attempt leaves the slot empty so the next
/// request retries.
pub struct GatewayContext<C: Clock> {
    presence: Arc<PresenceLedger>,
    anonymous: tokio::sync::Mutex<Option<Session<C>>>,
}

impl<C: Clock> GatewayContext<C> {
    pub fn new() -> Self {
        Self {
            presence: Arc::new(PresenceLedger::new()),
            anonymous: tokio::sync::Mutex::new(None),
        }
    }

    pub fn presence(&self) -> Arc<PresenceLedger> {
        self.presence.clone()
    }

    /// Lock the anonymous-session slot. The lock is held across creation so
    /// concurrent anonymous requests serialize on one connect attempt.
    pub async fn anonymous_slot(&self) -> tokio::sync::MutexGuard<'_, Option<Session<C>>> {
        self.anonymous.lock().await
    }

    pub fn has_anonymous(&self) -> bool {
        self.anonymous.try_lock().map(|s| s.is_some()).unwrap_or(true)
    }
}

impl<C: Clock> Default for GatewayContext<C> {
    fn default() -> Self {
        Self::new()
    }
}
