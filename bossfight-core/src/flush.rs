//! Flush Scheduler: drains live counters into durable daily records.
//!
//! ## Algorithm
//!
//! 1. Claim the in-flight slot; a flush already running means this one is
//!    skipped.
//! 2. Swap out the live generation and take dirty cooldown/refresh snapshots.
//! 3. Convert voice seconds to whole minutes. Sub-minute remainders are kept
//!    aside as a carry.
//! 4. In one transaction: add every row onto its `daily_stats` record, append
//!    queued ledger rows, upsert bookkeeping, commit.
//! 5. On success, hand the carry back to the live store. On failure, hand back
//!    the whole generation and re-mark the snapshots dirty so the next cycle
//!    retries everything.
//!
//! A cycle with nothing live and no dirty bookkeeping performs no writes.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::cooldown::MessageCooldownGate;
use crate::error::Result;
use crate::guard::InFlight;
use crate::ledger::LedgerEntry;
use crate::live::{Generation, LiveCounterEntry, LiveCounterStore};
use crate::metrics::EngineCounters;
use crate::persistence::Store;
use crate::types::{DailyCounters, DailyKey, ScopeId, Timestamp, UserId, VoiceRefreshState};
use crate::voice::VoicePresenceTracker;

/// Result of one flush cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing to write.
    Idle,
    /// Another flush was still running.
    Skipped,
    /// Changes committed.
    Flushed {
        /// Daily records touched.
        rows: usize,
        /// Ledger rows appended.
        ledger_entries: usize,
    },
}

/// Periodic writer of live counters and restart bookkeeping.
#[derive(Debug)]
pub struct FlushScheduler {
    live: Arc<LiveCounterStore>,
    gate: Arc<MessageCooldownGate>,
    voice: Arc<VoicePresenceTracker>,
    counters: Arc<EngineCounters>,
    in_flight: InFlight,
}

impl FlushScheduler {
    /// Wire the scheduler to the components whose state it persists.
    #[must_use]
    pub fn new(
        live: Arc<LiveCounterStore>,
        gate: Arc<MessageCooldownGate>,
        voice: Arc<VoicePresenceTracker>,
        counters: Arc<EngineCounters>,
    ) -> Self {
        Self {
            live,
            gate,
            voice,
            counters,
            in_flight: InFlight::new(),
        }
    }

    /// Run one flush cycle at `now`.
    ///
    /// `now` becomes the `last_update_time` of every touched record.
    ///
    /// # Errors
    ///
    /// Returns the storage error that aborted the transaction. Nothing is
    /// lost: the generation is back in the live store for the next cycle.
    pub fn flush(&self, store: &mut Store, now: Timestamp) -> Result<FlushOutcome> {
        let Some(_guard) = self.in_flight.try_begin() else {
            debug!("Flush still running, skipping cycle");
            return Ok(FlushOutcome::Skipped);
        };
        let start = Instant::now();

        let generation = self.live.take_generation();
        let cooldowns = self.gate.take_dirty_snapshot();
        let refresh = self.voice.take_dirty_refresh_snapshot();

        let (rows, carry) = split_minutes(&generation);
        if rows.is_empty() && generation.ledger.is_empty() && cooldowns.is_none() && refresh.is_none()
        {
            self.restore_carry(carry);
            return Ok(FlushOutcome::Idle);
        }

        match write(
            store,
            &rows,
            &generation.ledger,
            cooldowns.as_deref(),
            refresh.as_deref(),
            now,
        ) {
            Ok(()) => {
                self.restore_carry(carry);
                EngineCounters::bump(&self.counters.flushes_completed);
                info!(
                    rows = rows.len(),
                    ledger_entries = generation.ledger.len(),
                    elapsed_us = start.elapsed().as_micros(),
                    "Live counters flushed"
                );
                Ok(FlushOutcome::Flushed {
                    rows: rows.len(),
                    ledger_entries: generation.ledger.len(),
                })
            }
            Err(e) => {
                self.live.restore_generation(generation);
                if cooldowns.is_some() {
                    self.gate.mark_dirty();
                }
                if refresh.is_some() {
                    self.voice.mark_refresh_dirty();
                }
                EngineCounters::bump(&self.counters.flush_failures);
                warn!(error = %e, "Flush failed, generation kept for retry");
                Err(e)
            }
        }
    }

    /// Put sub-minute voice remainders back, dropping those of retired scopes.
    fn restore_carry(&self, carry: Generation) {
        let registry = self.live.registry();
        let entries: std::collections::HashMap<_, _> = carry
            .entries
            .into_iter()
            .filter(|(key, _)| registry.is_active(key.scope))
            .collect();
        if !entries.is_empty() {
            self.live.restore_generation(Generation {
                entries,
                ledger: Vec::new(),
            });
        }
    }
}

/// Split a generation into whole-minute rows and leftover seconds.
fn split_minutes(generation: &Generation) -> (Vec<(DailyKey, DailyCounters)>, Generation) {
    let mut rows = Vec::with_capacity(generation.entries.len());
    let mut carry = Generation::default();

    for (key, entry) in &generation.entries {
        let counters = DailyCounters {
            message_count: entry.messages,
            voice_minutes: entry.voice_seconds.div_euclid(60),
            voice_reduced_minutes: entry.voice_reduced_seconds.div_euclid(60),
            ritual_done: entry.ritual_done,
            tokens_spent: entry.tokens_spent,
            wager_total: entry.wager_total,
            wager_net: entry.wager_net,
        };
        let leftover = LiveCounterEntry {
            voice_seconds: entry.voice_seconds.rem_euclid(60),
            voice_reduced_seconds: entry.voice_reduced_seconds.rem_euclid(60),
            ..LiveCounterEntry::default()
        };
        if counters != DailyCounters::default() {
            rows.push((*key, counters));
        }
        if !leftover.is_empty() {
            carry.entries.insert(*key, leftover);
        }
    }
    (rows, carry)
}

fn write(
    store: &mut Store,
    rows: &[(DailyKey, DailyCounters)],
    ledger: &[LedgerEntry],
    cooldowns: Option<&[(ScopeId, UserId, Timestamp)]>,
    refresh: Option<&[(ScopeId, UserId, VoiceRefreshState)]>,
    now: Timestamp,
) -> Result<()> {
    let tx = store.transaction()?;
    for (key, counters) in rows {
        tx.upsert_daily(key, counters, now)?;
    }
    for entry in ledger {
        tx.append_ledger(entry)?;
    }
    if let Some(rows) = cooldowns {
        tx.save_cooldowns(rows)?;
    }
    if let Some(rows) = refresh {
        tx.save_refresh_states(rows)?;
    }
    tx.commit()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerReason;
    use crate::registry::ScopeRegistry;
    use crate::types::{DayKey, GuildId, ScopeKind};

    struct Fixture {
        store: Store,
        scope: ScopeId,
        live: Arc<LiveCounterStore>,
        gate: Arc<MessageCooldownGate>,
        voice: Arc<VoicePresenceTracker>,
        counters: Arc<EngineCounters>,
        flusher: FlushScheduler,
    }

    fn fixture() -> Fixture {
        let mut store = Store::open_in_memory().expect("open");
        let scope = store
            .create_scope(GuildId(1), ScopeKind::HolidayWeek, "Frost Wyrm", 15_000, Timestamp(0))
            .expect("scope")
            .id;
        let registry = ScopeRegistry::new();
        registry.activate(scope);
        let live = Arc::new(LiveCounterStore::new(registry));
        let gate = Arc::new(MessageCooldownGate::new(5));
        let voice = Arc::new(VoicePresenceTracker::new(3600, chrono_tz::UTC, Arc::clone(&live)));
        let counters = Arc::new(EngineCounters::new());
        let flusher = FlushScheduler::new(
            Arc::clone(&live),
            Arc::clone(&gate),
            Arc::clone(&voice),
            Arc::clone(&counters),
        );
        Fixture {
            store,
            scope,
            live,
            gate,
            voice,
            counters,
            flusher,
        }
    }

    fn day() -> DayKey {
        "2025-12-24".parse().expect("day")
    }

    #[test]
    fn empty_cycle_writes_nothing() {
        let mut f = fixture();
        let outcome = f.flusher.flush(&mut f.store, Timestamp(60)).expect("flush");
        assert_eq!(outcome, FlushOutcome::Idle);
        assert_eq!(f.counters.snapshot().flushes_completed, 0);
    }

    #[test]
    fn counters_merge_into_daily_record() {
        let mut f = fixture();
        let user = UserId(42);
        f.live.add_message(f.scope, user, day());
        f.live.add_message(f.scope, user, day());
        f.live.add_voice_seconds(f.scope, user, day(), 150, false);
        f.live.add_voice_seconds(f.scope, user, day(), 60, true);
        f.live.add_wager(f.scope, user, day(), 2_000, 700);
        f.live.add_tokens_spent(f.scope, user, day(), 30);
        f.live.mark_ritual_done(f.scope, user, day());

        let outcome = f.flusher.flush(&mut f.store, Timestamp(60)).expect("flush");
        assert_eq!(outcome, FlushOutcome::Flushed { rows: 1, ledger_entries: 0 });

        let record = f
            .store
            .daily_stat(f.scope, user, day())
            .expect("query")
            .expect("record");
        assert_eq!(
            record.counters,
            DailyCounters {
                message_count: 2,
                voice_minutes: 2,
                voice_reduced_minutes: 1,
                ritual_done: true,
                tokens_spent: 30,
                wager_total: 2_000,
                wager_net: 700,
            }
        );
        assert_eq!(record.last_update_time, Timestamp(60));
    }

    #[test]
    fn voice_remainder_carries_into_next_flush() {
        let mut f = fixture();
        let user = UserId(7);
        f.live.add_voice_seconds(f.scope, user, day(), 90, false);
        f.flusher.flush(&mut f.store, Timestamp(60)).expect("first");
        assert!(!f.live.is_empty(), "30s carried");

        // Carry alone does not trigger a write.
        assert_eq!(
            f.flusher.flush(&mut f.store, Timestamp(120)).expect("idle"),
            FlushOutcome::Idle
        );

        f.live.add_voice_seconds(f.scope, user, day(), 30, false);
        f.flusher.flush(&mut f.store, Timestamp(180)).expect("second");
        let record = f
            .store
            .daily_stat(f.scope, user, day())
            .expect("query")
            .expect("record");
        assert_eq!(record.counters.voice_minutes, 2);
        assert!(f.live.is_empty());
    }

    #[test]
    fn ledger_and_bookkeeping_are_persisted() {
        let mut f = fixture();
        let user = UserId(3);
        f.live.record_ledger(LedgerEntry {
            scope: f.scope,
            user,
            ts: Timestamp(10),
            delta: 25,
            reason: LedgerReason::QuestReward {
                quest_id: "q-1".to_string(),
            },
        });
        f.gate.try_count_message(f.scope, user, Timestamp(10));
        f.voice.refresh_presence(f.scope, user, Timestamp(10));

        let outcome = f.flusher.flush(&mut f.store, Timestamp(60)).expect("flush");
        assert_eq!(outcome, FlushOutcome::Flushed { rows: 0, ledger_entries: 1 });
        assert_eq!(f.store.ledger_for_user(f.scope, user).expect("ledger").len(), 1);
        assert_eq!(f.store.load_cooldowns().expect("cooldowns").len(), 1);
        assert_eq!(f.store.load_refresh_states().expect("refresh").len(), 1);

        // Clean bookkeeping is not rewritten.
        assert_eq!(
            f.flusher.flush(&mut f.store, Timestamp(120)).expect("flush"),
            FlushOutcome::Idle
        );
    }

    #[test]
    fn failed_merge_keeps_everything_for_retry() {
        let mut f = fixture();
        let user = UserId(5);
        f.live.add_message(f.scope, user, day());
        f.gate.try_count_message(f.scope, user, Timestamp(1));
        f.store
            .conn
            .execute_batch(
                "CREATE TRIGGER fail_daily BEFORE INSERT ON daily_stats
                 BEGIN SELECT RAISE(ABORT, 'storage unavailable'); END;",
            )
            .expect("trigger");

        assert!(f.flusher.flush(&mut f.store, Timestamp(60)).is_err());
        assert_eq!(f.counters.snapshot().flush_failures, 1);
        assert!(f.store.daily_stat(f.scope, user, day()).expect("query").is_none());
        assert!(f.store.load_cooldowns().expect("cooldowns").is_empty());

        // Activity during the outage lands on top of the restored generation.
        f.live.add_message(f.scope, user, day());

        f.store
            .conn
            .execute_batch("DROP TRIGGER fail_daily;")
            .expect("drop trigger");
        f.flusher.flush(&mut f.store, Timestamp(120)).expect("retry");
        let record = f
            .store
            .daily_stat(f.scope, user, day())
            .expect("query")
            .expect("record");
        assert_eq!(record.counters.message_count, 2);
        assert_eq!(f.store.load_cooldowns().expect("cooldowns").len(), 1);
    }

    #[test]
    fn overlapping_flush_is_skipped() {
        let mut f = fixture();
        f.live.add_message(f.scope, UserId(1), day());
        let _busy = f.flusher.in_flight.try_begin().expect("claim");
        assert_eq!(
            f.flusher.flush(&mut f.store, Timestamp(60)).expect("flush"),
            FlushOutcome::Skipped
        );
        assert!(!f.live.is_empty(), "skipped flush leaves counters alone");
    }

    #[test]
    fn carry_for_retired_scope_is_dropped() {
        let mut f = fixture();
        f.live.add_voice_seconds(f.scope, UserId(1), day(), 30, false);
        f.live.add_message(f.scope, UserId(1), day());
        f.live.registry().retire(f.scope);
        f.flusher.flush(&mut f.store, Timestamp(60)).expect("flush");
        assert!(f.live.is_empty());
    }
}
