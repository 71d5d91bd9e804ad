//! Time-to-live cache with eviction notification.
//!
//! One generic cache backs three different concerns: session lookup,
//! query/reply correlation, and subscription bookkeeping. Entries expire a
//! fixed duration after their last insertion; expiry is detected lazily on
//! access and by periodic sweeps. An optional handler observes each eviction
//! exactly once, synchronously with removal. Explicit `remove` never fires
//! the handler.

use std::collections::HashMap;
use std::time::{Duration, Instant};

type ExpiryHandler<V> = Box<dyn Fn(&str, V) + Send + Sync>;

/// Mapping from opaque string keys to values with per-entry expiration.
pub struct TtlCache<V> {
    entries: HashMap<String, Entry<V>>,
    ttl: Duration,
    on_expired: Option<ExpiryHandler<V>>,
}

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

impl<V> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            on_expired: None,
        }
    }

    /// Install the eviction handler. The handler receives ownership of the
    /// evicted value, so single-shot completions can be fulfilled from it.
    pub fn with_expiry_handler(
        mut self,
        handler: impl Fn(&str, V) + Send + Sync + 'static,
    ) -> Self {
        self.on_expired = Some(Box::new(handler));
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store or refresh an entry; a refresh restarts the expiration window.
    /// Returns the value previously stored under the key, without notifying
    /// the eviction handler.
    pub fn put(&mut self, key: impl Into<String>, value: V) -> Option<V> {
        self.put_at(key, value, Instant::now())
    }

    /// `put` against an explicit clock reading.
    pub fn put_at(&mut self, key: impl Into<String>, value: V, now: Instant) -> Option<V> {
        self.entries
            .insert(
                key.into(),
                Entry {
                    value,
                    inserted_at: now,
                },
            )
            .map(|e| e.value)
    }

    /// Look up a live entry. Expired entries are evicted (handler notified)
    /// and reported as absent. A hit does not extend the entry's lifetime;
    /// callers that want a refresh re-insert explicitly.
    pub fn get(&mut self, key: &str) -> Option<&V> {
        self.get_at(key, Instant::now())
    }

    /// `get` against an explicit clock reading.
    pub fn get_at(&mut self, key: &str, now: Instant) -> Option<&V> {
        if self.entry_expired(key, now) {
            self.evict(key);
            return None;
        }
        self.entries.get(key).map(|e| &e.value)
    }

    /// Delete unconditionally. Never fires the eviction handler.
    pub fn remove(&mut self, key: &str) -> Option<V> {
        self.entries.remove(key).map(|e| e.value)
    }

    /// Generate an unguessable key not currently present in the cache.
    /// Both session identifiers and reply-correlation tokens come from here,
    /// so predictability would be a security defect rather than a nuisance.
    pub fn generate_key(&self) -> String {
        loop {
            let key = uuid::Uuid::new_v4().simple().to_string();
            if !self.entries.contains_key(&key) {
                return key;
            }
        }
    }

    /// Evict every expired entry, notifying the handler for each.
    /// Returns the number of evictions.
    pub fn sweep(&mut self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// `sweep` against an explicit clock reading.
    pub fn sweep_at(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| now.saturating_duration_since(e.inserted_at) >= self.ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.evict(key);
        }
        expired.len()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate live values without expiry checks; sweeps keep this honest.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.values().map(|e| &e.value)
    }

    /// Remove every entry without notifying the eviction handler. Used at
    /// teardown, when entries must be dropped rather than reported expired.
    pub fn drain(&mut self) -> Vec<(String, V)> {
        self.entries
            .drain()
            .map(|(k, e)| (k, e.value))
            .collect()
    }

    fn entry_expired(&self, key: &str, now: Instant) -> bool {
        self.entries
            .get(key)
            .is_some_and(|e| now.saturating_duration_since(e.inserted_at) >= self.ttl)
    }

    fn evict(&mut self, key: &str) {
        if let Some(entry) = self.entries.remove(key) {
            if let Some(handler) = &self.on_expired {
                handler(key, entry.value);
            }
        }
    }
}

impl<V> std::fmt::Debug for TtlCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("len", &self.entries.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[test]
    fn get_returns_value_until_ttl_elapses() {
        let mut cache = TtlCache::new(Duration::from_secs(10));
        let t0 = Instant::now();
        cache.put_at("k", 7u32, t0);

        assert_eq!(cache.get_at("k", t0 + Duration::from_secs(9)), Some(&7));
        assert_eq!(cache.get_at("k", t0 + Duration::from_secs(10)), None);
        assert!(!cache.contains_key("k"));
    }

    #[test]
    fn eviction_handler_fires_exactly_once_with_key_and_value() {
        let seen: Arc<Mutex<Vec<(String, u32)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut cache = TtlCache::new(Duration::from_secs(5))
            .with_expiry_handler(move |k, v| sink.lock().unwrap().push((k.to_string(), v)));

        let t0 = Instant::now();
        cache.put_at("a", 1, t0);
        cache.put_at("b", 2, t0);

        assert_eq!(cache.sweep_at(t0 + Duration::from_secs(5)), 2);
        // A later sweep must not re-report.
        assert_eq!(cache.sweep_at(t0 + Duration::from_secs(60)), 0);

        let mut seen = seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec![("a".to_string(), 1), ("b".to_string(), 2)]);
    }

    #[test]
    fn explicit_remove_does_not_notify() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let mut cache = TtlCache::new(Duration::from_secs(5))
            .with_expiry_handler(move |_, _: u32| {
                counter.fetch_add(1, Ordering::SeqCst);
            });

        cache.put("k", 3);
        assert_eq!(cache.remove("k"), Some(3));
        assert_eq!(cache.remove("k"), None);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn get_does_not_extend_lifetime_but_put_does() {
        let mut cache = TtlCache::new(Duration::from_secs(10));
        let t0 = Instant::now();
        cache.put_at("k", 1u32, t0);

        // Reads inside the window do not restart it.
        assert!(cache.get_at("k", t0 + Duration::from_secs(9)).is_some());
        assert!(cache.get_at("k", t0 + Duration::from_secs(11)).is_none());

        // Re-insertion does.
        cache.put_at("k", 1, t0);
        cache.put_at("k", 2, t0 + Duration::from_secs(9));
        assert_eq!(cache.get_at("k", t0 + Duration::from_secs(15)), Some(&2));
    }

    #[test]
    fn generate_key_avoids_present_keys() {
        let mut cache = TtlCache::new(Duration::from_secs(60));
        let mut keys = std::collections::HashSet::new();
        for _ in 0..64 {
            let key = cache.generate_key();
            assert!(!cache.contains_key(&key));
            assert!(keys.insert(key.clone()));
            cache.put(key, 0u8);
        }
    }

    #[test]
    fn refresh_returns_previous_value_silently() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let mut cache = TtlCache::new(Duration::from_secs(5))
            .with_expiry_handler(move |_, _: u32| {
                counter.fetch_add(1, Ordering::SeqCst);
            });

        assert_eq!(cache.put("k", 1), None);
        assert_eq!(cache.put("k", 2), Some(1));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
