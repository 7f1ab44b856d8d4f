//! Configuration for the bossfight engine.
//!
//! Maps directly to `bossfight.toml`. Every section is optional and falls
//! back to the contract defaults; [`BossConfig::validate`] must pass before
//! any component is built.

use std::collections::HashSet;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{BossError, Result};
use crate::types::ChannelId;

/// Top-level engine configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BossConfig {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Tick cadences and the day-boundary timezone.
    #[serde(default)]
    pub timing: TimingConfig,
    /// Message ingestion rules.
    #[serde(default)]
    pub ingest: IngestConfig,
    /// Voice idle-decay rules.
    #[serde(default)]
    pub voice: VoiceConfig,
    /// Score function weights and scales.
    #[serde(default)]
    pub scoring: ScoringConfig,
    /// Pool sizing and milestone buckets.
    #[serde(default)]
    pub pool: PoolConfig,
    /// Persistence settings.
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl BossConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `BossError::Config` if the TOML is invalid, including a signal
    /// table that omits its `weight` or `scale`.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| BossError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Reject configurations that would misbehave at tick time.
    ///
    /// # Errors
    /// Returns `BossError::Config` describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        self.timing.validate()?;
        self.scoring.validate()?;
        self.pool.validate()?;
        if self.voice.idle_threshold_secs <= 0 {
            return Err(BossError::Config(
                "voice.idle_threshold_secs must be positive".to_string(),
            ));
        }
        if self.ingest.message_cooldown_secs < 0 {
            return Err(BossError::Config(
                "ingest.message_cooldown_secs must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// General system settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Whether the engine is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Log level used when `RUST_LOG` is unset: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_level: "info".to_string(),
        }
    }
}

/// Periodic cadences and the calendar-day timezone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Live counter flush cadence.
    #[serde(default = "default_60")]
    pub flush_interval_secs: u64,
    /// Pool damage tick cadence.
    #[serde(default = "default_30")]
    pub pool_tick_interval_secs: u64,
    /// Voice crediting cadence.
    #[serde(default = "default_30")]
    pub voice_tick_interval_secs: u64,
    /// IANA timezone that defines where a day starts (GMT/BST aware).
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: 60,
            pool_tick_interval_secs: 30,
            voice_tick_interval_secs: 30,
            timezone: default_timezone(),
        }
    }
}

impl TimingConfig {
    /// Parsed day-boundary timezone.
    ///
    /// # Errors
    /// Returns `BossError::Config` for an unknown IANA name.
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| BossError::Config(format!("timing.timezone: {e}")))
    }

    fn validate(&self) -> Result<()> {
        if self.flush_interval_secs == 0
            || self.pool_tick_interval_secs == 0
            || self.voice_tick_interval_secs == 0
        {
            return Err(BossError::Config(
                "timing intervals must be at least one second".to_string(),
            ));
        }
        self.tz().map(|_| ())
    }
}

/// Message ingestion rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Minimum seconds between two counted messages from one user.
    #[serde(default = "default_5_i64")]
    pub message_cooldown_secs: i64,
    /// Low-signal channels whose messages neither count nor refresh voice.
    #[serde(default)]
    pub excluded_channels: Vec<u64>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            message_cooldown_secs: 5,
            excluded_channels: Vec::new(),
        }
    }
}

impl IngestConfig {
    /// Excluded channels as a lookup set.
    #[must_use]
    pub fn excluded_set(&self) -> HashSet<ChannelId> {
        self.excluded_channels.iter().copied().map(ChannelId).collect()
    }
}

/// Voice idle-decay rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// Seconds without a refresh after which voice time is credited as reduced.
    #[serde(default = "default_3600")]
    pub idle_threshold_secs: i64,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            idle_threshold_secs: 3600,
        }
    }
}

/// One logarithmic signal term: `weight * ln(1 + value / scale)`.
///
/// Both keys are required once a signal table is written out.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalWeight {
    /// Damage multiplier.
    pub weight: f64,
    /// Value at which the term reaches `weight * ln 2`.
    pub scale: f64,
}

impl SignalWeight {
    /// Construct a signal term.
    #[must_use]
    pub const fn new(weight: f64, scale: f64) -> Self {
        Self { weight, scale }
    }

    fn validate(&self, name: &str) -> Result<()> {
        if !self.weight.is_finite() || self.weight < 0.0 {
            return Err(BossError::Config(format!(
                "scoring.{name}.weight must be a finite non-negative number"
            )));
        }
        if !self.scale.is_finite() || self.scale <= 0.0 {
            return Err(BossError::Config(format!(
                "scoring.{name}.scale must be a finite positive number"
            )));
        }
        Ok(())
    }
}

/// Score function configuration. Shared by whatever computes the current and
/// the previous score, so deltas are always consistent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Event tokens spent.
    #[serde(default = "default_tokens_signal")]
    pub tokens_spent: SignalWeight,
    /// Ritual completion (value 0 or 1).
    #[serde(default = "default_ritual_signal")]
    pub ritual_done: SignalWeight,
    /// Positive wagering net.
    #[serde(default = "default_wager_net_signal")]
    pub wager_net: SignalWeight,
    /// Total wagered.
    #[serde(default = "default_wager_total_signal")]
    pub wager_total: SignalWeight,
    /// Counted messages.
    #[serde(default = "default_messages_signal")]
    pub messages: SignalWeight,
    /// Effective voice minutes.
    #[serde(default = "default_voice_signal")]
    pub voice_minutes: SignalWeight,
    /// Weight of an idle-decayed voice minute relative to a full one.
    #[serde(default = "default_reduced_multiplier")]
    pub reduced_voice_multiplier: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            tokens_spent: default_tokens_signal(),
            ritual_done: default_ritual_signal(),
            wager_net: default_wager_net_signal(),
            wager_total: default_wager_total_signal(),
            messages: default_messages_signal(),
            voice_minutes: default_voice_signal(),
            reduced_voice_multiplier: 0.35,
        }
    }
}

impl ScoringConfig {
    fn validate(&self) -> Result<()> {
        self.tokens_spent.validate("tokens_spent")?;
        self.ritual_done.validate("ritual_done")?;
        self.wager_net.validate("wager_net")?;
        self.wager_total.validate("wager_total")?;
        self.messages.validate("messages")?;
        self.voice_minutes.validate("voice_minutes")?;
        if !(0.0..=1.0).contains(&self.reduced_voice_multiplier) {
            return Err(BossError::Config(
                "scoring.reduced_voice_multiplier must be within [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

/// Pool sizing and milestone buckets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Milestone thresholds in percent of `hp_max`, strictly descending.
    #[serde(default = "default_buckets")]
    pub milestone_buckets: Vec<u32>,
    /// HP budgeted per 1000 expected participants.
    #[serde(default = "default_hp_per_thousand")]
    pub hp_per_thousand_users: i64,
    /// Days the pool is paced to survive.
    #[serde(default = "default_pacing_days")]
    pub pacing_days: f64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            milestone_buckets: default_buckets(),
            hp_per_thousand_users: 3_500_000,
            pacing_days: 6.2,
        }
    }
}

impl PoolConfig {
    fn validate(&self) -> Result<()> {
        if self.milestone_buckets.is_empty() {
            return Err(BossError::Config("pool.milestone_buckets is empty".to_string()));
        }
        if self.milestone_buckets.windows(2).any(|w| w[0] <= w[1]) {
            return Err(BossError::Config(
                "pool.milestone_buckets must be strictly descending".to_string(),
            ));
        }
        if self.milestone_buckets.iter().any(|&b| b >= 100) {
            return Err(BossError::Config(
                "pool.milestone_buckets must be below 100".to_string(),
            ));
        }
        if self.hp_per_thousand_users <= 0 || self.pacing_days <= 0.0 {
            return Err(BossError::Config(
                "pool sizing values must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Use WAL mode for concurrent reads.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_5000")]
    pub busy_timeout_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            wal_mode: true,
            busy_timeout_ms: 5000,
        }
    }
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_timezone() -> String { "Europe/London".to_string() }
fn default_5_i64() -> i64 { 5 }
fn default_30() -> u64 { 30 }
fn default_60() -> u64 { 60 }
fn default_3600() -> i64 { 3600 }
fn default_5000() -> u64 { 5000 }
fn default_reduced_multiplier() -> f64 { 0.35 }
fn default_buckets() -> Vec<u32> { vec![80, 60, 40, 20, 0] }
fn default_hp_per_thousand() -> i64 { 3_500_000 }
fn default_pacing_days() -> f64 { 6.2 }
fn default_tokens_signal() -> SignalWeight { SignalWeight::new(260.0, 25.0) }
// Scale 1/(e-1) makes a completed ritual worth exactly its weight.
fn default_ritual_signal() -> SignalWeight { SignalWeight::new(160.0, 1.0 / (std::f64::consts::E - 1.0)) }
fn default_wager_net_signal() -> SignalWeight { SignalWeight::new(110.0, 10_000.0) }
fn default_wager_total_signal() -> SignalWeight { SignalWeight::new(95.0, 20_000.0) }
fn default_messages_signal() -> SignalWeight { SignalWeight::new(80.0, 20.0) }
fn default_voice_signal() -> SignalWeight { SignalWeight::new(80.0, 30.0) }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = BossConfig::default();
        config.validate().expect("defaults validate");
        assert_eq!(config.timing.flush_interval_secs, 60);
        assert_eq!(config.ingest.message_cooldown_secs, 5);
        assert_eq!(config.pool.milestone_buckets, vec![80, 60, 40, 20, 0]);
    }

    #[test]
    fn empty_toml_uses_defaults() {
        let config = BossConfig::from_toml("").expect("parse");
        assert_eq!(config.voice.idle_threshold_secs, 3600);
        assert!((config.scoring.reduced_voice_multiplier - 0.35).abs() < f64::EPSILON);
    }

    #[test]
    fn partial_override() {
        let config = BossConfig::from_toml(
            r#"
            [ingest]
            message_cooldown_secs = 10
            excluded_channels = [42]

            [scoring.messages]
            weight = 50.0
            scale = 10.0
            "#,
        )
        .expect("parse");
        assert_eq!(config.ingest.message_cooldown_secs, 10);
        assert!(config.ingest.excluded_set().contains(&ChannelId(42)));
        assert_eq!(config.scoring.messages, SignalWeight::new(50.0, 10.0));
        assert_eq!(config.scoring.tokens_spent, SignalWeight::new(260.0, 25.0));
    }

    #[test]
    fn missing_scale_is_fatal() {
        let err = BossConfig::from_toml(
            r#"
            [scoring.voice_minutes]
            weight = 80.0
            "#,
        );
        assert!(matches!(err, Err(BossError::Config(_))));
    }

    #[test]
    fn zero_scale_rejected_by_validate() {
        let mut config = BossConfig::default();
        config.scoring.wager_total.scale = 0.0;
        assert!(matches!(config.validate(), Err(BossError::Config(_))));
    }

    #[test]
    fn unknown_timezone_rejected() {
        let mut config = BossConfig::default();
        config.timing.timezone = "Mars/Olympus".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn ascending_buckets_rejected() {
        let mut config = BossConfig::default();
        config.pool.milestone_buckets = vec![20, 40];
        assert!(config.validate().is_err());
    }
}
