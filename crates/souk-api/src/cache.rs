//! Small time-bounded cache for lookups that are hit on every keystroke,
//! such as referral code validation on the sign-up form.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use crate::clock::Clock;

pub struct TtlCache<K, V> {
    entries: Mutex<HashMap<K, (V, DateTime<Utc>)>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    /// Returns the cached value unless it has expired. Expired entries are
    /// dropped on the way out.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let mut entries = self.lock();
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > now => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: K, value: V) {
        let expires_at = self.clock.now() + self.ttl;
        self.lock().insert(key, (value, expires_at));
    }

    pub fn invalidate(&self, key: &K) {
        self.lock().remove(key);
    }

    /// Drops every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<K, (V, DateTime<Utc>)>> {
        // A panic while holding the lock cannot leave the map half-updated
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn cache(ttl_secs: i64) -> (Arc<ManualClock>, TtlCache<String, bool>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = TtlCache::new(Duration::seconds(ttl_secs), clock.clone() as Arc<dyn Clock>);
        (clock, cache)
    }

    #[test]
    fn entries_live_until_the_ttl_elapses() {
        let (clock, cache) = cache(60);
        cache.insert("ABCD2345".into(), true);

        clock.advance(Duration::seconds(59));
        assert_eq!(cache.get(&"ABCD2345".to_string()), Some(true));

        clock.advance(Duration::seconds(1));
        assert_eq!(cache.get(&"ABCD2345".to_string()), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn reinserting_restarts_the_window() {
        let (clock, cache) = cache(10);
        cache.insert("K".into(), false);
        clock.advance(Duration::seconds(8));
        cache.insert("K".into(), true);
        clock.advance(Duration::seconds(8));
        assert_eq!(cache.get(&"K".to_string()), Some(true));
    }

    #[test]
    fn purge_only_drops_expired_entries() {
        let (clock, cache) = cache(30);
        cache.insert("old".into(), true);
        clock.advance(Duration::seconds(20));
        cache.insert("new".into(), true);
        clock.advance(Duration::seconds(15));

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"new".to_string()), Some(true));
    }

    #[test]
    fn invalidate_removes_immediately() {
        let (_clock, cache) = cache(300);
        cache.insert("K".into(), true);
        cache.invalidate(&"K".to_string());
        assert_eq!(cache.get(&"K".to_string()), None);
    }
}
