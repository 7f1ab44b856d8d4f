//! Message Cooldown Gate.
//!
//! One counted message per user per cooldown window. The gate runs before
//! [`crate::live::LiveCounterStore::add_message`] and only decides; it never
//! touches the counters itself.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::types::{ScopeId, Timestamp, UserId};

/// Per-(scope, user) message throttle.
#[derive(Debug)]
pub struct MessageCooldownGate {
    cooldown_secs: i64,
    last_counted: Mutex<HashMap<(ScopeId, UserId), Timestamp>>,
    dirty: AtomicBool,
}

impl MessageCooldownGate {
    /// Create a gate with the given cooldown window.
    #[must_use]
    pub fn new(cooldown_secs: i64) -> Self {
        Self {
            cooldown_secs,
            last_counted: Mutex::new(HashMap::new()),
            dirty: AtomicBool::new(false),
        }
    }

    /// Returns `true` and records `now` if the user is outside the cooldown
    /// window; otherwise returns `false` and changes nothing.
    pub fn try_count_message(&self, scope: ScopeId, user: UserId, now: Timestamp) -> bool {
        let mut map = self.last_counted.lock();
        if let Some(&last) = map.get(&(scope, user)) {
            if now.seconds_since(last) < self.cooldown_secs {
                return false;
            }
        }
        map.insert((scope, user), now);
        self.dirty.store(true, Ordering::Release);
        true
    }

    /// When the user last had a message counted.
    #[must_use]
    pub fn last_counted(&self, scope: ScopeId, user: UserId) -> Option<Timestamp> {
        self.last_counted.lock().get(&(scope, user)).copied()
    }

    /// Every recorded (scope, user, last counted time).
    #[must_use]
    pub fn snapshot(&self) -> Vec<(ScopeId, UserId, Timestamp)> {
        let map = self.last_counted.lock();
        map.iter().map(|(&(s, u), &t)| (s, u, t)).collect()
    }

    /// Full bookkeeping snapshot, if anything changed since the last call.
    /// Call [`Self::mark_dirty`] if persisting the snapshot fails.
    pub fn take_dirty_snapshot(&self) -> Option<Vec<(ScopeId, UserId, Timestamp)>> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return None;
        }
        Some(self.snapshot())
    }

    /// Force the next snapshot to be taken.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Reload persisted bookkeeping after a restart.
    pub fn restore<I: IntoIterator<Item = (ScopeId, UserId, Timestamp)>>(&self, rows: I) {
        let mut map = self.last_counted.lock();
        for (scope, user, ts) in rows {
            map.insert((scope, user), ts);
        }
    }

    /// Forget all bookkeeping for a retired scope.
    pub fn forget_scope(&self, scope: ScopeId) {
        self.last_counted.lock().retain(|(s, _), _| *s != scope);
    }
}
