//! Score Function: diminishing-returns damage from a day's raw counters.
//!
//! ```text
//! damage = Σ weight_i · ln(1 + value_i / scale_i)
//! ```
//!
//! over six signals: tokens spent, ritual (0/1), positive wager net, total
//! wagered, counted messages and effective voice minutes. Every term is
//! uncapped but concave, so farming one signal yields less and less while
//! spreading effort across signals pays off.
//!
//! Everything here is pure. The pool engine computes both the new score and
//! compares it against the cached one with the same [`ScoringConfig`].

use serde::{Deserialize, Serialize};

use crate::config::{ScoringConfig, SignalWeight};
use crate::types::DailyCounters;

// ---------------------------------------------------------------------------
// Damage
// ---------------------------------------------------------------------------

/// Per-signal damage contributions for one day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DamageBreakdown {
    /// Tokens spent term.
    pub tokens: f64,
    /// Ritual term.
    pub ritual: f64,
    /// Positive wager net term.
    pub wager_net: f64,
    /// Total wagered term.
    pub wager_total: f64,
    /// Message term.
    pub messages: f64,
    /// Effective voice minutes term.
    pub voice: f64,
}

impl DamageBreakdown {
    /// Sum of all terms.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.tokens + self.ritual + self.wager_net + self.wager_total + self.messages + self.voice
    }
}

/// `weight · ln(1 + value / scale)`, or zero for non-positive input.
#[must_use]
pub fn log_term(value: f64, signal: SignalWeight) -> f64 {
    if value <= 0.0 || !value.is_finite() {
        return 0.0;
    }
    signal.weight * (value / signal.scale).ln_1p()
}

/// Full-rate voice minutes plus reduced minutes weighted by the decay multiplier.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn effective_voice_minutes(counters: &DailyCounters, config: &ScoringConfig) -> f64 {
    counters.voice_minutes.max(0) as f64
        + counters.voice_reduced_minutes.max(0) as f64 * config.reduced_voice_multiplier
}

/// Break a day's counters down into per-signal damage.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn breakdown(counters: &DailyCounters, config: &ScoringConfig) -> DamageBreakdown {
    DamageBreakdown {
        tokens: log_term(counters.tokens_spent as f64, config.tokens_spent),
        ritual: log_term(f64::from(u8::from(counters.ritual_done)), config.ritual_done),
        // A losing day contributes nothing.
        wager_net: log_term(counters.wager_net.max(0) as f64, config.wager_net),
        wager_total: log_term(counters.wager_total as f64, config.wager_total),
        messages: log_term(counters.message_count as f64, config.messages),
        voice: log_term(effective_voice_minutes(counters, config), config.voice_minutes),
    }
}

/// Total damage for one day. Total, deterministic and monotone non-decreasing
/// in every counter.
#[must_use]
pub fn damage(counters: &DailyCounters, config: &ScoringConfig) -> f64 {
    breakdown(counters, config).total()
}

// ---------------------------------------------------------------------------
// Devotion
// ---------------------------------------------------------------------------

/// Effective voice minutes needed for the voice devotion point.
pub const DEVOTION_VOICE_MINUTES: f64 = 10.0;
/// Amount wagered needed for the wager devotion point.
pub const DEVOTION_WAGER_TOTAL: i64 = 1000;

/// Participation points for one day, independent of volume:
/// tokens spent 2, ritual 3, any counted message 1, ten effective voice
/// minutes 1, a thousand wagered 1.
#[must_use]
pub fn devotion(counters: &DailyCounters, config: &ScoringConfig) -> u32 {
    let mut points = 0;
    if counters.tokens_spent > 0 {
        points += 2;
    }
    if counters.ritual_done {
        points += 3;
    }
    if counters.message_count >= 1 {
        points += 1;
    }
    if effective_voice_minutes(counters, config) >= DEVOTION_VOICE_MINUTES {
        points += 1;
    }
    if counters.wager_total >= DEVOTION_WAGER_TOTAL {
        points += 1;
    }
    points
}

// ---------------------------------------------------------------------------
// Pool sizing
// ---------------------------------------------------------------------------

/// Starting HP for a pool expected to see `expected_users` participants:
/// `hp_per_thousand * users / 1000`, truncated. Zero users gets one block.
#[must_use]
pub fn recommended_hp(expected_users: u64, hp_per_thousand: i64) -> i64 {
    if expected_users == 0 {
        return hp_per_thousand.max(1);
    }
    let hp = i128::from(hp_per_thousand) * i128::from(expected_users) / 1000;
    i64::try_from(hp).unwrap_or(i64::MAX).max(1)
}

/// Damage per day that would deplete `hp_max` in `pacing_days`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn expected_daily_damage(hp_max: i64, pacing_days: f64) -> f64 {
    if pacing_days <= 0.0 {
        return hp_max as f64;
    }
    hp_max as f64 / pacing_days
}
