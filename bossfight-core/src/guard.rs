//! Re-entrancy guards for periodic work.
//!
//! A flush or pool tick must never overlap with another of the same kind
//! (for the same scope). Guards are RAII: the slot frees itself on drop,
//! including on early return through `?`.

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

/// Single-slot in-flight flag.
#[derive(Debug, Default)]
pub struct InFlight {
    busy: AtomicBool,
}

impl InFlight {
    /// Create an idle flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot, or `None` if work is already running.
    pub fn try_begin(&self) -> Option<InFlightGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard { flag: &self.busy })
    }

    /// Whether work is currently running.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Releases an [`InFlight`] slot on drop.
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Per-key in-flight set.
#[derive(Debug)]
pub struct KeyedInFlight<K: Eq + Hash + Copy> {
    keys: Mutex<HashSet<K>>,
}

impl<K: Eq + Hash + Copy> Default for KeyedInFlight<K> {
    fn default() -> Self {
        Self {
            keys: Mutex::new(HashSet::new()),
        }
    }
}

impl<K: Eq + Hash + Copy> KeyedInFlight<K> {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key`, or `None` if work for it is already running.
    pub fn try_begin(&self, key: K) -> Option<KeyedGuard<'_, K>> {
        if self.keys.lock().insert(key) {
            Some(KeyedGuard { owner: self, key })
        } else {
            None
        }
    }
}

/// Releases a [`KeyedInFlight`] key on drop.
#[derive(Debug)]
pub struct KeyedGuard<'a, K: Eq + Hash + Copy> {
    owner: &'a KeyedInFlight<K>,
    key: K,
}

impl<K: Eq + Hash + Copy> Drop for KeyedGuard<'_, K> {
    fn drop(&mut self) {
        self.owner.keys.lock().remove(&self.key);
    }
}
