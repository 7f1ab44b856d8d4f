//! Service configuration for the bossfight daemon.
//!
//! Extends the engine's [`BossConfig`] with the settings only a running
//! service needs: where the database lives, how shutdown behaves and which
//! scopes to create on first start. The engine sections stay at the top
//! level of `bossfight.toml`; service settings live under `[service]`.

use std::path::{Path, PathBuf};

use bossfight_core::score;
use bossfight_core::{BossConfig, BossError, GuildId, ScopeKind};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Top-level
// ---------------------------------------------------------------------------

/// Engine configuration plus service settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Engine sections (`[general]`, `[timing]`, `[scoring]`, ...).
    #[serde(flatten)]
    pub engine: BossConfig,
    /// Daemon settings.
    #[serde(default)]
    pub service: ServiceSettings,
}

impl ServiceConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `BossError::Config` if the TOML is invalid.
    pub fn from_toml(toml_str: &str) -> Result<Self, BossError> {
        toml::from_str(toml_str).map_err(|e| BossError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, BossError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Validate the engine sections and the service settings.
    ///
    /// # Errors
    /// Returns `BossError::Config` describing the first invalid setting.
    pub fn validate(&self) -> Result<(), BossError> {
        self.engine.validate()?;
        if self.service.database_path.as_os_str().is_empty() {
            return Err(BossError::Config(
                "service.database_path must not be empty".to_string(),
            ));
        }
        for seed in &self.service.scopes {
            if seed.name.trim().is_empty() {
                return Err(BossError::Config(format!(
                    "service.scopes: scope for guild {} has an empty name",
                    seed.guild
                )));
            }
            if seed.hp_max.is_some_and(|hp| hp <= 0) {
                return Err(BossError::Config(format!(
                    "service.scopes: '{}' hp_max must be positive",
                    seed.name
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Service settings
// ---------------------------------------------------------------------------

/// Settings for the `bossfightd` process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    /// SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// How long to wait for tick loops to stop before giving up on them.
    #[serde(default = "default_grace")]
    pub shutdown_grace_secs: u64,
    /// Write outstanding live counters before exiting.
    #[serde(default = "default_true")]
    pub final_flush_on_shutdown: bool,
    /// Scopes created at startup if their guild has no active scope of that kind.
    #[serde(default)]
    pub scopes: Vec<ScopeSeed>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            shutdown_grace_secs: default_grace(),
            final_flush_on_shutdown: true,
            scopes: Vec::new(),
        }
    }
}

/// A scope to bootstrap at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeSeed {
    /// Owning guild.
    pub guild: GuildId,
    /// Event kind.
    pub kind: ScopeKind,
    /// Display name.
    pub name: String,
    /// Explicit starting HP. Takes precedence over `expected_users`.
    #[serde(default)]
    pub hp_max: Option<i64>,
    /// Expected participants, used to size the pool when `hp_max` is unset.
    #[serde(default)]
    pub expected_users: Option<u64>,
}

impl ScopeSeed {
    /// Starting HP: explicit, or sized from the expected participant count.
    #[must_use]
    pub fn resolved_hp(&self, hp_per_thousand_users: i64) -> i64 {
        self.hp_max.unwrap_or_else(|| {
            score::recommended_hp(self.expected_users.unwrap_or(0), hp_per_thousand_users)
        })
    }
}

fn default_database_path() -> PathBuf { PathBuf::from("bossfight.db") }
fn default_grace() -> u64 { 10 }
fn default_true() -> bool { true }

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = ServiceConfig::from_toml("").expect("parse");
        assert_eq!(config.service.database_path, PathBuf::from("bossfight.db"));
        assert!(config.service.final_flush_on_shutdown);
        assert_eq!(config.engine.timing.flush_interval_secs, 60);
        config.validate().expect("valid");
    }

    #[test]
    fn engine_sections_stay_top_level() {
        let config = ServiceConfig::from_toml(
            r#"
            [timing]
            timezone = "UTC"
            pool_tick_interval_secs = 15

            [service]
            database_path = "/var/lib/bossfight/state.db"
            shutdown_grace_secs = 3

            [[service.scopes]]
            guild = 42
            kind = "holiday_week"
            name = "Frost Wyrm"
            expected_users = 2000
            "#,
        )
        .expect("parse");
        assert_eq!(config.engine.timing.timezone, "UTC");
        assert_eq!(config.engine.timing.pool_tick_interval_secs, 15);
        assert_eq!(config.service.shutdown_grace_secs, 3);

        let seed = &config.service.scopes[0];
        assert_eq!(seed.guild, GuildId(42));
        assert_eq!(seed.kind, ScopeKind::HolidayWeek);
        assert_eq!(
            seed.resolved_hp(config.engine.pool.hp_per_thousand_users),
            7_000_000
        );
    }

    #[test]
    fn shipped_config_parses_and_validates() {
        let config = ServiceConfig::from_toml(include_str!("../../bossfight.toml")).expect("parse");
        config.validate().expect("valid");
        assert_eq!(config.engine.scoring.tokens_spent.weight, 260.0);
        assert_eq!(config.service.scopes.len(), 1);
        assert_eq!(config.service.scopes[0].resolved_hp(3_500_000), 4_200_000);
    }

    #[test]
    fn invalid_engine_section_fails_validation() {
        let config = ServiceConfig::from_toml(
            r#"
            [timing]
            timezone = "Mars/Olympus_Mons"
            "#,
        )
        .expect("parse");
        assert!(config.validate().is_err());
    }

    #[test]
    fn non_positive_seed_hp_is_rejected() {
        let config = ServiceConfig::from_toml(
            r#"
            [[service.scopes]]
            guild = 1
            kind = "season_era"
            name = "Era"
            hp_max = 0
            "#,
        )
        .expect("parse");
        assert!(config.validate().is_err());
    }
}
