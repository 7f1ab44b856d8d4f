//! Pool Damage Engine: applies score deltas to a scope's HP.
//!
//! One tick, inside a single transaction:
//!
//! 1. Load the pool and every daily record merged at or after its
//!    `last_tick_time` watermark.
//! 2. For each record, `delta = max(0, damage(record) - cached_score)`;
//!    cache the new score.
//! 3. `hp = max(0, hp - floor(Σ delta))`, advance the watermark to `now`.
//! 4. Announce at most one new milestone bucket.
//! 5. Commit. Any failure rolls back the whole batch and the next tick
//!    retries from the same watermark.
//!
//! A pool at zero HP with every bucket announced is depleted and further
//! ticks are no-ops.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::config::{BossConfig, PoolConfig, ScoringConfig};
use crate::error::Result;
use crate::guard::KeyedInFlight;
use crate::metrics::EngineCounters;
use crate::milestone::{Milestone, next_bucket};
use crate::persistence::Store;
use crate::score;
use crate::types::{PoolState, ScopeId, Timestamp};

/// What a committed tick changed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolTickReport {
    /// Changed records examined.
    pub records: usize,
    /// Unrounded sum of positive score deltas.
    pub total_delta: f64,
    /// HP removed.
    pub damage: i64,
    /// HP before the tick.
    pub hp_before: i64,
    /// HP after the tick.
    pub hp_after: i64,
    /// Milestone crossed by this tick, if any.
    pub milestone: Option<Milestone>,
    /// Daily damage that would deplete the pool over the pacing period.
    pub expected_daily_damage: f64,
}

/// Result of one pool tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// A tick for this scope was still running.
    Skipped,
    /// Scope unknown or retired.
    Inactive,
    /// HP is zero and every bucket has been announced.
    Depleted,
    /// No changed records. May still carry a pending milestone.
    Idle {
        /// Milestone caught up on this tick.
        milestone: Option<Milestone>,
    },
    /// Changed records were scored and applied.
    Applied(PoolTickReport),
}

impl TickOutcome {
    /// The milestone to announce, if any.
    #[must_use]
    pub fn milestone(&self) -> Option<Milestone> {
        match self {
            Self::Idle { milestone } => *milestone,
            Self::Applied(report) => report.milestone,
            _ => None,
        }
    }
}

/// Scores changed records and decrements pool HP.
#[derive(Debug)]
pub struct PoolDamageEngine {
    scoring: ScoringConfig,
    buckets: Vec<u32>,
    pacing_days: f64,
    counters: Arc<EngineCounters>,
    in_flight: KeyedInFlight<ScopeId>,
}

impl PoolDamageEngine {
    /// Create an engine with explicit scoring and bucket settings.
    #[must_use]
    pub fn new(scoring: ScoringConfig, buckets: Vec<u32>, counters: Arc<EngineCounters>) -> Self {
        Self {
            scoring,
            buckets,
            pacing_days: PoolConfig::default().pacing_days,
            counters,
            in_flight: KeyedInFlight::new(),
        }
    }

    /// Override the number of days a pool is paced to last.
    #[must_use]
    pub fn with_pacing_days(mut self, pacing_days: f64) -> Self {
        self.pacing_days = pacing_days;
        self
    }

    /// Create an engine from a validated configuration.
    #[must_use]
    pub fn from_config(config: &BossConfig, counters: Arc<EngineCounters>) -> Self {
        Self::new(config.scoring.clone(), config.pool.milestone_buckets.clone(), counters)
            .with_pacing_days(config.pool.pacing_days)
    }

    /// The scoring settings shared with every score computation.
    #[must_use]
    pub fn scoring(&self) -> &ScoringConfig {
        &self.scoring
    }

    /// Run one tick for `scope` at `now`.
    ///
    /// # Errors
    ///
    /// Returns the storage error that aborted the tick. Nothing was applied.
    pub fn tick(&self, store: &mut Store, scope: ScopeId, now: Timestamp) -> Result<TickOutcome> {
        let Some(_guard) = self.in_flight.try_begin(scope) else {
            debug!(scope = %scope, "Pool tick still running, skipping");
            return Ok(TickOutcome::Skipped);
        };
        let start = Instant::now();

        match self.apply(store, scope, now) {
            Ok(outcome) => {
                if let TickOutcome::Applied(report) = &outcome {
                    EngineCounters::add(&self.counters.damage_applied, report.damage);
                    debug!(
                        scope = %scope,
                        records = report.records,
                        damage = report.damage,
                        hp = report.hp_after,
                        expected_daily = report.expected_daily_damage,
                        elapsed_us = start.elapsed().as_micros(),
                        "Pool tick applied"
                    );
                }
                if matches!(outcome, TickOutcome::Applied(_) | TickOutcome::Idle { .. }) {
                    EngineCounters::bump(&self.counters.ticks_completed);
                }
                if let Some(m) = outcome.milestone() {
                    EngineCounters::bump(&self.counters.milestones_announced);
                    info!(
                        scope = %scope,
                        bucket = m.bucket,
                        hp = m.hp_current,
                        hp_max = m.hp_max,
                        "Milestone reached"
                    );
                }
                Ok(outcome)
            }
            Err(e) => {
                EngineCounters::bump(&self.counters.tick_failures);
                warn!(scope = %scope, error = %e, "Pool tick rolled back");
                Err(e)
            }
        }
    }

    fn apply(&self, store: &mut Store, scope: ScopeId, now: Timestamp) -> Result<TickOutcome> {
        let tx = store.transaction()?;
        if !tx.is_scope_active(scope)? {
            return Ok(TickOutcome::Inactive);
        }
        let Some(pool) = tx.pool_state(scope)? else {
            return Ok(TickOutcome::Inactive);
        };

        if pool.hp_current == 0 {
            // Depleted pools only catch up on outstanding milestones.
            let Some(milestone) = self.milestone_for(&pool) else {
                return Ok(TickOutcome::Depleted);
            };
            tx.set_announced_bucket(scope, milestone.bucket)?;
            tx.commit()?;
            return Ok(TickOutcome::Idle {
                milestone: Some(milestone),
            });
        }

        let changed = tx.changed_records(scope, pool.last_tick_time)?;
        let mut total_delta = 0.0;
        for record in &changed {
            let new_score = score::damage(&record.counters, &self.scoring);
            total_delta += (new_score - record.cached_score).max(0.0);
            tx.set_cached_score(&record.key, new_score)?;
        }

        let damage = whole_damage(total_delta);
        let hp_after = pool.hp_current.saturating_sub(damage).max(0);
        tx.update_pool(scope, hp_after, now)?;
        if damage > 0 {
            tx.log_tick(scope, now, damage, hp_after)?;
        }

        let after = PoolState {
            hp_current: hp_after,
            last_tick_time: now,
            ..pool
        };
        let milestone = self.milestone_for(&after);
        if let Some(m) = milestone {
            tx.set_announced_bucket(scope, m.bucket)?;
        }
        tx.commit()?;

        if changed.is_empty() {
            return Ok(TickOutcome::Idle { milestone });
        }
        Ok(TickOutcome::Applied(PoolTickReport {
            records: changed.len(),
            total_delta,
            damage,
            hp_before: pool.hp_current,
            hp_after,
            milestone,
            expected_daily_damage: score::expected_daily_damage(pool.hp_max, self.pacing_days),
        }))
    }

    fn milestone_for(&self, pool: &PoolState) -> Option<Milestone> {
        next_bucket(pool.threshold_percent(), pool.last_announced_bucket, &self.buckets).map(
            |bucket| Milestone {
                scope: pool.scope,
                bucket,
                hp_current: pool.hp_current,
                hp_max: pool.hp_max,
            },
        )
    }
}

#[allow(clippy::cast_possible_truncation)]
fn whole_damage(total_delta: f64) -> i64 {
    if total_delta.is_finite() && total_delta > 0.0 {
        total_delta.floor() as i64
    } else {
        0
    }
}
