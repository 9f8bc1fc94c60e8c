//! Expiring channel cache

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// A small TTL cache keyed by string
///
/// Entries expire lazily on read; there is no sweeper. Good enough for the
/// handful of platform channels the bridge touches.
pub(crate) struct TtlCache<V> {
    ttl: Duration,
    entries: RwLock<HashMap<String, (Instant, V)>>,
}

impl<V: Clone> TtlCache<V> {
    pub(crate) fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn get(&self, key: &str) -> Option<V> {
        {
            let entries = self.entries.read().unwrap();
            match entries.get(key) {
                Some((stored_at, value)) if stored_at.elapsed() < self.ttl => {
                    return Some(value.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }
        // Expired; drop it so the map does not grow unbounded.
        self.entries.write().unwrap().remove(key);
        None
    }

    pub(crate) fn insert(&self, key: impl Into<String>, value: V) {
        self.entries
            .write()
            .unwrap()
            .insert(key.into(), (Instant::now(), value));
    }

    pub(crate) fn remove(&self, key: &str) {
        self.entries.write().unwrap().remove(key);
    }
}
