//! Live Counter Store: unflushed per-(scope, user, day) deltas.
//!
//! Increments never block on I/O: each call takes a short `parking_lot`
//! lock on the current generation and bumps a field. The flush scheduler
//! swaps the entire generation for an empty one in a single locked step
//! ([`LiveCounterStore::take_generation`]), so any increment racing with a
//! flush lands either in the generation being flushed or in the fresh one,
//! never in neither.
//!
//! If the durable merge of a taken generation fails, the flush hands it
//! back through [`LiveCounterStore::restore_generation`], which adds it on
//! top of whatever arrived in the meantime.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::ledger::LedgerEntry;
use crate::registry::ScopeRegistry;
use crate::types::{DailyKey, DayKey, ScopeId, UserId};

/// Accumulated deltas for one key since the last flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveCounterEntry {
    /// Counted messages.
    pub messages: i64,
    /// Full-rate voice seconds.
    pub voice_seconds: i64,
    /// Idle-decayed voice seconds.
    pub voice_reduced_seconds: i64,
    /// Ritual completed during this interval.
    pub ritual_done: bool,
    /// Tokens spent.
    pub tokens_spent: i64,
    /// Amount wagered.
    pub wager_total: i64,
    /// Net wagering result.
    pub wager_net: i64,
}

impl LiveCounterEntry {
    /// Whether the entry carries nothing to persist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Fold another entry into this one: sums for counters, OR for the ritual flag.
    pub fn merge(&mut self, other: &Self) {
        self.messages += other.messages;
        self.voice_seconds += other.voice_seconds;
        self.voice_reduced_seconds += other.voice_reduced_seconds;
        self.ritual_done |= other.ritual_done;
        self.tokens_spent += other.tokens_spent;
        self.wager_total += other.wager_total;
        self.wager_net += other.wager_net;
    }
}

/// Everything accumulated between two flushes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Generation {
    /// Counter deltas keyed by (scope, user, day).
    pub entries: HashMap<DailyKey, LiveCounterEntry>,
    /// Pending token ledger rows, in arrival order.
    pub ledger: Vec<LedgerEntry>,
}

impl Generation {
    /// Whether the generation carries nothing to persist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ledger.is_empty() && self.entries.values().all(LiveCounterEntry::is_empty)
    }
}

/// In-memory counter store shared by ingestion, the voice tracker and the
/// flush scheduler.
#[derive(Debug)]
pub struct LiveCounterStore {
    registry: ScopeRegistry,
    current: Mutex<Generation>,
}

impl LiveCounterStore {
    /// Create an empty store that only accepts activity for scopes active in `registry`.
    #[must_use]
    pub fn new(registry: ScopeRegistry) -> Self {
        Self {
            registry,
            current: Mutex::new(Generation::default()),
        }
    }

    /// The registry this store filters against.
    #[must_use]
    pub fn registry(&self) -> &ScopeRegistry {
        &self.registry
    }

    /// Apply `f` to the entry for `key`. Returns `false` (and does nothing)
    /// for an inactive scope.
    fn with_entry(&self, key: DailyKey, f: impl FnOnce(&mut LiveCounterEntry)) -> bool {
        if !self.registry.is_active(key.scope) {
            return false;
        }
        let mut current = self.current.lock();
        f(current.entries.entry(key).or_default());
        true
    }

    /// Count one message.
    pub fn add_message(&self, scope: ScopeId, user: UserId, day: DayKey) -> bool {
        self.with_entry(DailyKey { scope, user, day }, |e| e.messages += 1)
    }

    /// Credit voice presence seconds, full-rate or reduced.
    pub fn add_voice_seconds(
        &self,
        scope: ScopeId,
        user: UserId,
        day: DayKey,
        seconds: i64,
        reduced: bool,
    ) -> bool {
        self.with_entry(DailyKey { scope, user, day }, |e| {
            if reduced {
                e.voice_reduced_seconds += seconds;
            } else {
                e.voice_seconds += seconds;
            }
        })
    }

    /// Record a resolved wager.
    pub fn add_wager(
        &self,
        scope: ScopeId,
        user: UserId,
        day: DayKey,
        amount: i64,
        net: i64,
    ) -> bool {
        self.with_entry(DailyKey { scope, user, day }, |e| {
            e.wager_total += amount;
            e.wager_net += net;
        })
    }

    /// Record tokens spent.
    pub fn add_tokens_spent(&self, scope: ScopeId, user: UserId, day: DayKey, amount: i64) -> bool {
        self.with_entry(DailyKey { scope, user, day }, |e| e.tokens_spent += amount)
    }

    /// Mark the daily ritual as completed.
    pub fn mark_ritual_done(&self, scope: ScopeId, user: UserId, day: DayKey) -> bool {
        self.with_entry(DailyKey { scope, user, day }, |e| e.ritual_done = true)
    }

    /// Queue a ledger row for the next flush.
    pub fn record_ledger(&self, entry: LedgerEntry) -> bool {
        if !self.registry.is_active(entry.scope) {
            return false;
        }
        self.current.lock().ledger.push(entry);
        true
    }

    /// Swap the current generation for an empty one and return it.
    pub fn take_generation(&self) -> Generation {
        std::mem::take(&mut *self.current.lock())
    }

    /// Add a previously taken generation back on top of the current one.
    /// Bypasses the registry: data accepted while a scope was active is never dropped.
    pub fn restore_generation(&self, generation: Generation) {
        let mut current = self.current.lock();
        for (key, entry) in generation.entries {
            current.entries.entry(key).or_default().merge(&entry);
        }
        if !generation.ledger.is_empty() {
            let newer = std::mem::replace(&mut current.ledger, generation.ledger);
            current.ledger.extend(newer);
        }
    }

    /// Copy of the pending entry for `key`, if any.
    #[must_use]
    pub fn peek(&self, key: &DailyKey) -> Option<LiveCounterEntry> {
        self.current.lock().entries.get(key).copied()
    }

    /// Number of keys with pending deltas.
    #[must_use]
    pub fn len(&self) -> usize {
        self.current.lock().entries.len()
    }

    /// Whether nothing is waiting to be flushed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.current.lock().is_empty()
    }
}
