//! Core type definitions for the bossfight engine.
//!
//! Identity newtypes, wall-clock timestamps, calendar-day keys and the
//! persisted record shapes shared by every module.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identity Types
// ---------------------------------------------------------------------------

/// Unique identifier for one aggregation context (a boss event).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeId(pub Uuid);

impl ScopeId {
    /// Create a new random scope ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ScopeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Community (guild) snowflake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GuildId(pub u64);

/// Participant snowflake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub u64);

/// Text channel snowflake, used for low-signal channel exclusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub u64);

impl fmt::Display for GuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// Wall-clock instant in whole Unix seconds.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// 1970-01-01 00:00:00 UTC.
    pub const EPOCH: Self = Self(0);

    /// The current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now().timestamp())
    }

    /// Seconds elapsed from `earlier` to `self` (negative if `earlier` is later).
    #[must_use]
    pub fn seconds_since(self, earlier: Timestamp) -> i64 {
        self.0.saturating_sub(earlier.0)
    }

    /// Shift by a signed number of seconds.
    #[must_use]
    pub fn plus_seconds(self, secs: i64) -> Self {
        Self(self.0.saturating_add(secs))
    }

    /// The calendar day this instant falls on in `tz`.
    #[must_use]
    pub fn day_in(self, tz: Tz) -> DayKey {
        let utc = DateTime::<Utc>::from_timestamp(self.0, 0).unwrap_or_default();
        DayKey(utc.with_timezone(&tz).date_naive())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A calendar day in the engine's fixed timezone, stored as `YYYY-MM-DD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DayKey(pub NaiveDate);

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl FromStr for DayKey {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").map(Self)
    }
}

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// What kind of event a scope represents. Used to pick the active scope
/// when a guild runs more than one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    /// A themed holiday week. Takes priority over a season era.
    HolidayWeek,
    /// A long-running seasonal era.
    SeasonEra,
}

impl ScopeKind {
    /// Stable storage name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HolidayWeek => "holiday_week",
            Self::SeasonEra => "season_era",
        }
    }

    /// Lower value wins when resolving a guild's active scope.
    #[must_use]
    pub fn priority(self) -> u8 {
        match self {
            Self::HolidayWeek => 0,
            Self::SeasonEra => 1,
        }
    }
}

impl FromStr for ScopeKind {
    type Err = crate::BossError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "holiday_week" => Ok(Self::HolidayWeek),
            "season_era" => Ok(Self::SeasonEra),
            other => Err(crate::BossError::Serialization(format!(
                "unknown scope kind '{other}'"
            ))),
        }
    }
}

/// One aggregation context. Immutable once created except for `active`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    /// Unique scope ID.
    pub id: ScopeId,
    /// Owning guild.
    pub guild: GuildId,
    /// Event kind.
    pub kind: ScopeKind,
    /// Display name.
    pub name: String,
    /// Whether the scope still accepts activity and ticks.
    pub active: bool,
    /// When the scope was created.
    pub created_at: Timestamp,
}

// ---------------------------------------------------------------------------
// Daily statistics
// ---------------------------------------------------------------------------

/// Primary key of a [`DailyStatRecord`] and of a live counter entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DailyKey {
    /// Owning scope.
    pub scope: ScopeId,
    /// Participant.
    pub user: UserId,
    /// Calendar day in the engine timezone.
    pub day: DayKey,
}

/// Raw per-user-per-day counters. Every field is non-decreasing while the
/// scope is active, except `wager_net` which is a signed running sum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCounters {
    /// Messages that passed the cooldown gate.
    pub message_count: i64,
    /// Full-rate voice minutes.
    pub voice_minutes: i64,
    /// Idle-decayed voice minutes (weighted down by the score function).
    pub voice_reduced_minutes: i64,
    /// Whether the daily ritual was completed.
    pub ritual_done: bool,
    /// Event tokens spent.
    pub tokens_spent: i64,
    /// Total amount wagered.
    pub wager_total: i64,
    /// Net wagering result (may be negative).
    pub wager_net: i64,
}

/// Durable per-(scope, user, day) record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyStatRecord {
    /// Record key.
    pub key: DailyKey,
    /// Accumulated counters.
    pub counters: DailyCounters,
    /// Last damage value applied to the pool for this record.
    pub cached_score: f64,
    /// When a flush last merged into this record.
    pub last_update_time: Timestamp,
}

// ---------------------------------------------------------------------------
// Voice & pool state
// ---------------------------------------------------------------------------

/// Idle-decay bookkeeping for one (scope, user).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceRefreshState {
    /// Last qualifying text activity.
    pub last_refresh_time: Timestamp,
    /// Whether the decay notice was sent during the current decay episode.
    pub warned: bool,
}

/// Persisted boss-HP pool for one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolState {
    /// Owning scope.
    pub scope: ScopeId,
    /// Starting HP.
    pub hp_max: i64,
    /// Remaining HP. Never increases.
    pub hp_current: i64,
    /// Watermark of the last committed tick.
    pub last_tick_time: Timestamp,
    /// Lowest milestone bucket already announced (starts at 100).
    pub last_announced_bucket: u32,
}

impl PoolState {
    /// Remaining HP as a whole percentage of `hp_max`, truncated.
    #[must_use]
    pub fn percent(&self) -> u32 {
        hp_percent(self.hp_current, self.hp_max)
    }

    /// Remaining HP percentage rounded up, for threshold checks: a pool at
    /// 0.4% has not reached the 0 bucket.
    #[must_use]
    pub fn threshold_percent(&self) -> u32 {
        hp_percent_ceil(self.hp_current, self.hp_max)
    }

    /// Read-only view for display.
    #[must_use]
    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            hp_current: self.hp_current,
            hp_max: self.hp_max,
            percent: self.percent(),
            depleted: self.hp_current == 0,
        }
    }
}

/// Read-only pool view handed to presentation collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    /// Remaining HP.
    pub hp_current: i64,
    /// Starting HP.
    pub hp_max: i64,
    /// Remaining HP percentage (0–100).
    pub percent: u32,
    /// Whether the pool has reached zero.
    pub depleted: bool,
}

/// Truncated integer percentage of `hp` relative to `hp_max`, clamped to 0–100.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn hp_percent(hp: i64, hp_max: i64) -> u32 {
    let pct = (hp.max(0) as f64 / hp_max.max(1) as f64) * 100.0;
    pct.clamp(0.0, 100.0) as u32
}

/// Rounded-up integer percentage of `hp` relative to `hp_max`, clamped to 0–100.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn hp_percent_ceil(hp: i64, hp_max: i64) -> u32 {
    let hp = i128::from(hp.max(0));
    let max = i128::from(hp_max.max(1));
    let pct = (hp * 100 + max - 1) / max;
    pct.clamp(0, 100) as u32
}
