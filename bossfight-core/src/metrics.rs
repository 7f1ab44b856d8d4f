//! Runtime Counters
//!
//! Lightweight counters for the ingestion hot path and the periodic ticks,
//! queryable at runtime or exported as Prometheus text for dashboards.
//!
//! All counters are `AtomicU64` with relaxed ordering: they are monotonic
//! statistics, never used for control flow.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters for engine events.
#[derive(Debug)]
pub struct EngineCounters {
    /// Messages that passed the cooldown gate.
    pub messages_counted: AtomicU64,
    /// Messages suppressed by the cooldown gate.
    pub messages_throttled: AtomicU64,
    /// Ingestion calls rejected for invalid input.
    pub inputs_rejected: AtomicU64,
    /// Ingestion calls dropped because the scope is not active.
    pub retired_scope_drops: AtomicU64,
    /// Full-rate voice seconds credited.
    pub voice_seconds: AtomicU64,
    /// Idle-decayed voice seconds credited.
    pub voice_reduced_seconds: AtomicU64,
    /// Idle warnings raised.
    pub idle_warnings: AtomicU64,
    /// Flushes that committed at least one write.
    pub flushes_completed: AtomicU64,
    /// Flushes rolled back.
    pub flush_failures: AtomicU64,
    /// Pool ticks committed.
    pub ticks_completed: AtomicU64,
    /// Pool ticks rolled back.
    pub tick_failures: AtomicU64,
    /// Total HP removed from all pools.
    pub damage_applied: AtomicU64,
    /// Milestones announced.
    pub milestones_announced: AtomicU64,
}

impl EngineCounters {
    /// Create a new set of zeroed counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            messages_counted: AtomicU64::new(0),
            messages_throttled: AtomicU64::new(0),
            inputs_rejected: AtomicU64::new(0),
            retired_scope_drops: AtomicU64::new(0),
            voice_seconds: AtomicU64::new(0),
            voice_reduced_seconds: AtomicU64::new(0),
            idle_warnings: AtomicU64::new(0),
            flushes_completed: AtomicU64::new(0),
            flush_failures: AtomicU64::new(0),
            ticks_completed: AtomicU64::new(0),
            tick_failures: AtomicU64::new(0),
            damage_applied: AtomicU64::new(0),
            milestones_announced: AtomicU64::new(0),
        }
    }

    /// Increment a counter by one.
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Add a non-negative amount to a counter; negatives are ignored.
    pub fn add(counter: &AtomicU64, amount: i64) {
        if let Ok(amount) = u64::try_from(amount) {
            counter.fetch_add(amount, Ordering::Relaxed);
        }
    }

    /// Snapshot all counters for export.
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            messages_counted: self.messages_counted.load(Ordering::Relaxed),
            messages_throttled: self.messages_throttled.load(Ordering::Relaxed),
            inputs_rejected: self.inputs_rejected.load(Ordering::Relaxed),
            retired_scope_drops: self.retired_scope_drops.load(Ordering::Relaxed),
            voice_seconds: [
                self.voice_seconds.load(Ordering::Relaxed),
                self.voice_reduced_seconds.load(Ordering::Relaxed),
            ],
            idle_warnings: self.idle_warnings.load(Ordering::Relaxed),
            flushes_completed: self.flushes_completed.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
            ticks_completed: self.ticks_completed.load(Ordering::Relaxed),
            tick_failures: self.tick_failures.load(Ordering::Relaxed),
            damage_applied: self.damage_applied.load(Ordering::Relaxed),
            milestones_announced: self.milestones_announced.load(Ordering::Relaxed),
        }
    }
}

impl Default for EngineCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// A snapshot of counter values at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Messages counted.
    pub messages_counted: u64,
    /// Messages throttled.
    pub messages_throttled: u64,
    /// Inputs rejected.
    pub inputs_rejected: u64,
    /// Calls dropped for inactive scopes.
    pub retired_scope_drops: u64,
    /// Voice seconds credited [full, reduced].
    pub voice_seconds: [u64; 2],
    /// Idle warnings raised.
    pub idle_warnings: u64,
    /// Completed flushes.
    pub flushes_completed: u64,
    /// Failed flushes.
    pub flush_failures: u64,
    /// Completed pool ticks.
    pub ticks_completed: u64,
    /// Failed pool ticks.
    pub tick_failures: u64,
    /// HP removed.
    pub damage_applied: u64,
    /// Milestones announced.
    pub milestones_announced: u64,
}

impl CounterSnapshot {
    /// Format as Prometheus-compatible text.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        format!(
            "# HELP bossfight_messages_total Messages seen by the cooldown gate\n\
             # TYPE bossfight_messages_total counter\n\
             bossfight_messages_total{{result=\"counted\"}} {}\n\
             bossfight_messages_total{{result=\"throttled\"}} {}\n\
             # HELP bossfight_inputs_rejected_total Ingestion calls with invalid input\n\
             # TYPE bossfight_inputs_rejected_total counter\n\
             bossfight_inputs_rejected_total {}\n\
             # HELP bossfight_retired_scope_drops_total Activity dropped for inactive scopes\n\
             # TYPE bossfight_retired_scope_drops_total counter\n\
             bossfight_retired_scope_drops_total {}\n\
             # HELP bossfight_voice_seconds_total Voice seconds credited\n\
             # TYPE bossfight_voice_seconds_total counter\n\
             bossfight_voice_seconds_total{{rate=\"full\"}} {}\n\
             bossfight_voice_seconds_total{{rate=\"reduced\"}} {}\n\
             # HELP bossfight_idle_warnings_total Idle-decay notices raised\n\
             # TYPE bossfight_idle_warnings_total counter\n\
             bossfight_idle_warnings_total {}\n\
             # HELP bossfight_flushes_total Live counter flushes\n\
             # TYPE bossfight_flushes_total counter\n\
             bossfight_flushes_total{{result=\"ok\"}} {}\n\
             bossfight_flushes_total{{result=\"failed\"}} {}\n\
             # HELP bossfight_pool_ticks_total Pool damage ticks\n\
             # TYPE bossfight_pool_ticks_total counter\n\
             bossfight_pool_ticks_total{{result=\"ok\"}} {}\n\
             bossfight_pool_ticks_total{{result=\"failed\"}} {}\n\
             # HELP bossfight_damage_applied_total HP removed from pools\n\
             # TYPE bossfight_damage_applied_total counter\n\
             bossfight_damage_applied_total {}\n\
             # HELP bossfight_milestones_total Milestones announced\n\
             # TYPE bossfight_milestones_total counter\n\
             bossfight_milestones_total {}\n",
            self.messages_counted,
            self.messages_throttled,
            self.inputs_rejected,
            self.retired_scope_drops,
            self.voice_seconds[0],
            self.voice_seconds[1],
            self.idle_warnings,
            self.flushes_completed,
            self.flush_failures,
            self.ticks_completed,
            self.tick_failures,
            self.damage_applied,
            self.milestones_announced,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let counters = EngineCounters::new();
        let snap = counters.snapshot();
        assert_eq!(snap.messages_counted, 0);
        assert_eq!(snap.voice_seconds, [0, 0]);
    }

    #[test]
    fn bump_and_add() {
        let counters = EngineCounters::new();
        EngineCounters::bump(&counters.messages_counted);
        EngineCounters::add(&counters.voice_seconds, 90);
        EngineCounters::add(&counters.voice_seconds, -5);
        let snap = counters.snapshot();
        assert_eq!(snap.messages_counted, 1);
        assert_eq!(snap.voice_seconds[0], 90);
    }

    #[test]
    fn prometheus_export_contains_values() {
        let counters = EngineCounters::new();
        EngineCounters::add(&counters.damage_applied, 3200);
        let text = counters.snapshot().to_prometheus();
        assert!(text.contains("bossfight_damage_applied_total 3200"));
        assert!(text.contains("bossfight_messages_total{result=\"counted\"} 0"));
    }
}
