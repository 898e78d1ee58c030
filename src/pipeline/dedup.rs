//! Process-lifetime record of delivered identity keys.
//!
//! A key moves through two states: *claimed* (queued or being sent) and
//! *delivered*. Claiming is an atomic test-and-reserve, so two polls that
//! see the same key concurrently can never both enqueue it, and a key only
//! counts as delivered once the delivery worker commits it.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Keys {
    delivered: HashSet<String>,
    in_flight: HashSet<String>,
}

/// Thread-safe set of delivered keys plus the keys currently in flight.
#[derive(Debug, Default)]
pub struct DedupStore {
    keys: Mutex<Keys>,
}

impl DedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with keys delivered by an earlier run.
    pub fn from_keys(keys: impl IntoIterator<Item = String>) -> Self {
        Self {
            keys: Mutex::new(Keys {
                delivered: keys.into_iter().collect(),
                in_flight: HashSet::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Keys> {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the key has been delivered.
    pub fn has(&self, key: &str) -> bool {
        self.lock().delivered.contains(key)
    }

    /// Record the key as delivered, ending any claim on it.
    pub fn mark_delivered(&self, key: &str) {
        let mut keys = self.lock();
        keys.in_flight.remove(key);
        keys.delivered.insert(key.to_string());
    }

    /// Reserve the key for delivery.
    ///
    /// Returns `false` when the key is already delivered or claimed.
    pub fn try_claim(&self, key: &str) -> bool {
        let mut keys = self.lock();
        if keys.delivered.contains(key) || keys.in_flight.contains(key) {
            return false;
        }
        keys.in_flight.insert(key.to_string())
    }

    /// Drop a claim without delivering, so a later poll can retry the key.
    pub fn release(&self, key: &str) {
        self.lock().in_flight.remove(key);
    }

    /// Number of delivered keys.
    pub fn len(&self) -> usize {
        self.lock().delivered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys claimed but not yet delivered.
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight.len()
    }

    /// Sorted copy of the delivered keys.
    pub fn snapshot(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().delivered.iter().cloned().collect();
        keys.sort();
        keys
    }
}
