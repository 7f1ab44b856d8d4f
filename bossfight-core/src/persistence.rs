//! SQLite persistence layer for the bossfight engine.
//!
//! One database holds every scope. The schema:
//!
//! ```sql
//! scopes              (scope_id PK, guild_id, kind, name, active, created_at)
//! pool_state          (scope_id PK, hp_max, hp_current, last_tick_time, last_announced_bucket)
//! daily_stats         (scope_id, user_id, day PK, counters..., cached_score, last_update_time)
//! pool_ticks          (id PK, scope_id, ts, damage, hp_after)
//! voice_refresh_state (scope_id, user_id PK, last_refresh_time, warned)
//! message_cooldown    (scope_id, user_id PK, last_counted_time)
//! token_ledger        (id PK, scope_id, user_id, ts, delta, reason, payload)
//! ```
//!
//! - WAL mode so read-only queries (leaderboards, pool snapshots) do not
//!   stall the periodic writers.
//! - Flush and pool ticks each run inside a single [`StoreTx`]; dropping it
//!   without [`StoreTx::commit`] rolls everything back.
//! - Snowflakes are stored as their two's-complement `i64` bit pattern.
//! - Backup support via SQLite's online-backup API.

use std::path::{Path, PathBuf};
use std::time::Instant;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OpenFlags, Row, Transaction, TransactionBehavior, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::PersistenceConfig;
use crate::error::{BossError, Result};
use crate::ledger::{LedgerEntry, LedgerReason};
use crate::types::{
    DailyCounters, DailyKey, DailyStatRecord, DayKey, GuildId, PoolSnapshot, PoolState, Scope,
    ScopeId, ScopeKind, Timestamp, UserId, VoiceRefreshState,
};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS scopes (
        scope_id   TEXT PRIMARY KEY,
        guild_id   INTEGER NOT NULL,
        kind       TEXT NOT NULL,
        name       TEXT NOT NULL,
        active     INTEGER NOT NULL DEFAULT 1,
        created_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_scopes_guild ON scopes(guild_id, active);

    CREATE TABLE IF NOT EXISTS pool_state (
        scope_id              TEXT PRIMARY KEY REFERENCES scopes(scope_id),
        hp_max                INTEGER NOT NULL,
        hp_current            INTEGER NOT NULL,
        last_tick_time        INTEGER NOT NULL,
        last_announced_bucket INTEGER NOT NULL DEFAULT 100
    );

    CREATE TABLE IF NOT EXISTS daily_stats (
        scope_id              TEXT NOT NULL,
        user_id               INTEGER NOT NULL,
        day                   TEXT NOT NULL,
        message_count         INTEGER NOT NULL DEFAULT 0,
        voice_minutes         INTEGER NOT NULL DEFAULT 0,
        voice_reduced_minutes INTEGER NOT NULL DEFAULT 0,
        ritual_done           INTEGER NOT NULL DEFAULT 0,
        tokens_spent          INTEGER NOT NULL DEFAULT 0,
        wager_total           INTEGER NOT NULL DEFAULT 0,
        wager_net             INTEGER NOT NULL DEFAULT 0,
        cached_score          REAL NOT NULL DEFAULT 0,
        last_update_time      INTEGER NOT NULL,
        PRIMARY KEY (scope_id, user_id, day)
    );
    CREATE INDEX IF NOT EXISTS idx_daily_changed ON daily_stats(scope_id, last_update_time);
    CREATE INDEX IF NOT EXISTS idx_daily_rank ON daily_stats(scope_id, day, cached_score DESC);

    CREATE TABLE IF NOT EXISTS pool_ticks (
        id       INTEGER PRIMARY KEY AUTOINCREMENT,
        scope_id TEXT NOT NULL,
        ts       INTEGER NOT NULL,
        damage   INTEGER NOT NULL,
        hp_after INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_pool_ticks_scope ON pool_ticks(scope_id, ts);

    CREATE TABLE IF NOT EXISTS voice_refresh_state (
        scope_id          TEXT NOT NULL,
        user_id           INTEGER NOT NULL,
        last_refresh_time INTEGER NOT NULL,
        warned            INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (scope_id, user_id)
    );

    CREATE TABLE IF NOT EXISTS message_cooldown (
        scope_id          TEXT NOT NULL,
        user_id           INTEGER NOT NULL,
        last_counted_time INTEGER NOT NULL,
        PRIMARY KEY (scope_id, user_id)
    );

    CREATE TABLE IF NOT EXISTS token_ledger (
        id       INTEGER PRIMARY KEY AUTOINCREMENT,
        scope_id TEXT NOT NULL,
        user_id  INTEGER NOT NULL,
        ts       INTEGER NOT NULL,
        delta    INTEGER NOT NULL,
        reason   TEXT NOT NULL,
        payload  TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_ledger_user ON token_ledger(scope_id, user_id);
";

const DAILY_COLUMNS: &str = "scope_id, user_id, day, message_count, voice_minutes, \
     voice_reduced_minutes, ritual_done, tokens_spent, wager_total, wager_net, \
     cached_score, last_update_time";

const POOL_COLUMNS: &str =
    "scope_id, hp_max, hp_current, last_tick_time, last_announced_bucket";

const SCOPE_COLUMNS: &str = "scope_id, guild_id, kind, name, active, created_at";

// ---------------------------------------------------------------------------
// Column conversions
// ---------------------------------------------------------------------------

fn snowflake_to_sql(id: u64) -> i64 {
    i64::from_ne_bytes(id.to_ne_bytes())
}

fn snowflake_from_sql(raw: i64) -> u64 {
    u64::from_ne_bytes(raw.to_ne_bytes())
}

impl ToSql for ScopeId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0.to_string()))
    }
}

impl FromSql for ScopeId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map(ScopeId)
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

impl ToSql for UserId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(snowflake_to_sql(self.0)))
    }
}

impl FromSql for UserId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value.as_i64().map(|raw| UserId(snowflake_from_sql(raw)))
    }
}

impl ToSql for GuildId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(snowflake_to_sql(self.0)))
    }
}

impl FromSql for GuildId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value.as_i64().map(|raw| GuildId(snowflake_from_sql(raw)))
    }
}

impl ToSql for Timestamp {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0))
    }
}

impl FromSql for Timestamp {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value.as_i64().map(Timestamp)
    }
}

impl ToSql for DayKey {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_string()))
    }
}

impl FromSql for DayKey {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

impl ToSql for ScopeKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ScopeKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: BossError| FromSqlError::Other(e.to_string().into()))
    }
}

fn daily_from_row(row: &Row<'_>) -> rusqlite::Result<DailyStatRecord> {
    Ok(DailyStatRecord {
        key: DailyKey {
            scope: row.get(0)?,
            user: row.get(1)?,
            day: row.get(2)?,
        },
        counters: DailyCounters {
            message_count: row.get(3)?,
            voice_minutes: row.get(4)?,
            voice_reduced_minutes: row.get(5)?,
            ritual_done: row.get(6)?,
            tokens_spent: row.get(7)?,
            wager_total: row.get(8)?,
            wager_net: row.get(9)?,
        },
        cached_score: row.get(10)?,
        last_update_time: row.get(11)?,
    })
}

fn pool_from_row(row: &Row<'_>) -> rusqlite::Result<PoolState> {
    Ok(PoolState {
        scope: row.get(0)?,
        hp_max: row.get(1)?,
        hp_current: row.get(2)?,
        last_tick_time: row.get(3)?,
        last_announced_bucket: row.get(4)?,
    })
}

fn scope_from_row(row: &Row<'_>) -> rusqlite::Result<Scope> {
    Ok(Scope {
        id: row.get(0)?,
        guild: row.get(1)?,
        kind: row.get(2)?,
        name: row.get(3)?,
        active: row.get(4)?,
        created_at: row.get(5)?,
    })
}

/// One leaderboard row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    /// Participant.
    pub user: UserId,
    /// Damage credited so far.
    pub score: f64,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// SQLite-backed durable store.
///
/// # Example
///
/// ```rust,no_run
/// use bossfight_core::persistence::Store;
/// use bossfight_core::config::PersistenceConfig;
/// use bossfight_core::{GuildId, ScopeKind, Timestamp};
///
/// let mut store = Store::open("bossfight.db", &PersistenceConfig::default())?;
/// let scope = store.create_scope(GuildId(1), ScopeKind::HolidayWeek, "Frost Wyrm", 15_000, Timestamp::now())?;
/// let pool = store.pool_snapshot(scope.id)?;
/// # Ok::<(), bossfight_core::error::BossError>(())
/// ```
pub struct Store {
    pub(crate) conn: Connection,
    db_path: PathBuf,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("db_path", &self.db_path)
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Open (or create) a database at `path`. The schema is created if missing.
    ///
    /// # Errors
    ///
    /// Returns [`BossError::Database`] on SQLite failures.
    pub fn open<P: AsRef<Path>>(path: P, config: &PersistenceConfig) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&db_path, flags)?;

        if config.wal_mode {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))?;
        conn.execute_batch(SCHEMA)?;

        info!(path = %db_path.display(), "Bossfight store opened");
        Ok(Self { conn, db_path })
    }

    /// Open an in-memory database (for tests and benches).
    ///
    /// # Errors
    ///
    /// Returns [`BossError::Database`] on SQLite failures.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn,
            db_path: PathBuf::from(":memory:"),
        })
    }

    /// Begin an immediate write transaction.
    ///
    /// # Errors
    ///
    /// Returns [`BossError::Database`] if the write lock cannot be taken.
    pub fn transaction(&mut self) -> Result<StoreTx<'_>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(StoreTx { tx })
    }

    // ------------------------------------------------------------------
    // Scopes
    // ------------------------------------------------------------------

    /// Create an active scope together with its full-HP pool.
    ///
    /// # Errors
    ///
    /// Returns [`BossError::InvalidInput`] for a non-positive `hp_max`, or
    /// [`BossError::Database`] on SQLite failures.
    pub fn create_scope(
        &mut self,
        guild: GuildId,
        kind: ScopeKind,
        name: &str,
        hp_max: i64,
        now: Timestamp,
    ) -> Result<Scope> {
        if hp_max <= 0 {
            return Err(BossError::InvalidInput {
                field: "hp_max",
                value: hp_max,
            });
        }
        let scope = Scope {
            id: ScopeId::new(),
            guild,
            kind,
            name: name.to_string(),
            active: true,
            created_at: now,
        };
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO scopes (scope_id, guild_id, kind, name, active, created_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5)",
            params![scope.id, guild, kind, name, now],
        )?;
        tx.execute(
            "INSERT INTO pool_state (scope_id, hp_max, hp_current, last_tick_time, last_announced_bucket)
             VALUES (?1, ?2, ?2, ?3, 100)",
            params![scope.id, hp_max, now],
        )?;
        tx.commit()?;

        info!(scope = %scope.id, guild = %guild, kind = kind.as_str(), hp_max, "Scope created");
        Ok(scope)
    }

    /// Deactivate a scope and drop its restart bookkeeping. Returns `false`
    /// if it was already retired or does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`BossError::Database`] on SQLite failures.
    pub fn retire_scope(&mut self, scope: ScopeId) -> Result<bool> {
        let tx = self.conn.transaction()?;
        let changed = tx.execute(
            "UPDATE scopes SET active = 0 WHERE scope_id = ?1 AND active = 1",
            params![scope],
        )?;
        tx.execute("DELETE FROM message_cooldown WHERE scope_id = ?1", params![scope])?;
        tx.execute("DELETE FROM voice_refresh_state WHERE scope_id = ?1", params![scope])?;
        tx.commit()?;
        if changed > 0 {
            info!(scope = %scope, "Scope retired");
        }
        Ok(changed > 0)
    }

    /// Look up a scope by ID.
    ///
    /// # Errors
    ///
    /// Returns [`BossError::Database`] on SQLite failures.
    pub fn scope(&self, scope: ScopeId) -> Result<Option<Scope>> {
        let sql = format!("SELECT {SCOPE_COLUMNS} FROM scopes WHERE scope_id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![scope], scope_from_row)
            .optional()?)
    }

    /// Every active scope, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`BossError::Database`] on SQLite failures.
    pub fn active_scopes(&self) -> Result<Vec<Scope>> {
        let sql = format!(
            "SELECT {SCOPE_COLUMNS} FROM scopes WHERE active = 1 ORDER BY created_at, scope_id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], scope_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// The scope a guild's activity should be attributed to: holiday weeks
    /// win over season eras, then the newest wins.
    ///
    /// # Errors
    ///
    /// Returns [`BossError::Database`] on SQLite failures.
    pub fn resolve_active_scope(&self, guild: GuildId) -> Result<Option<Scope>> {
        let sql = format!("SELECT {SCOPE_COLUMNS} FROM scopes WHERE guild_id = ?1 AND active = 1");
        let mut stmt = self.conn.prepare(&sql)?;
        let scopes = stmt
            .query_map(params![guild], scope_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(scopes
            .into_iter()
            .min_by_key(|s| (s.kind.priority(), std::cmp::Reverse(s.created_at))))
    }

    // ------------------------------------------------------------------
    // Read-only views
    // ------------------------------------------------------------------

    /// Raw pool state.
    ///
    /// # Errors
    ///
    /// Returns [`BossError::Database`] on SQLite failures.
    pub fn pool_state(&self, scope: ScopeId) -> Result<Option<PoolState>> {
        let sql = format!("SELECT {POOL_COLUMNS} FROM pool_state WHERE scope_id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![scope], pool_from_row)
            .optional()?)
    }

    /// Pool view for display.
    ///
    /// # Errors
    ///
    /// Returns [`BossError::UnknownScope`] if the scope has no pool.
    pub fn pool_snapshot(&self, scope: ScopeId) -> Result<PoolSnapshot> {
        self.pool_state(scope)?
            .map(|p| p.snapshot())
            .ok_or(BossError::UnknownScope(scope))
    }

    /// One user's record for one day, if any activity was flushed.
    ///
    /// # Errors
    ///
    /// Returns [`BossError::Database`] on SQLite failures.
    pub fn daily_stat(
        &self,
        scope: ScopeId,
        user: UserId,
        day: DayKey,
    ) -> Result<Option<DailyStatRecord>> {
        let sql = format!(
            "SELECT {DAILY_COLUMNS} FROM daily_stats WHERE scope_id = ?1 AND user_id = ?2 AND day = ?3"
        );
        Ok(self
            .conn
            .query_row(&sql, params![scope, user, day], daily_from_row)
            .optional()?)
    }

    /// Highest applied damage for one day.
    ///
    /// # Errors
    ///
    /// Returns [`BossError::Database`] on SQLite failures.
    pub fn top_for_day(
        &self,
        scope: ScopeId,
        day: DayKey,
        limit: usize,
    ) -> Result<Vec<LeaderboardEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, cached_score FROM daily_stats
             WHERE scope_id = ?1 AND day = ?2
             ORDER BY cached_score DESC, user_id LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![scope, day, limit_param(limit)], |row| {
            Ok(LeaderboardEntry {
                user: row.get(0)?,
                score: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Highest applied damage summed over every day of the scope.
    ///
    /// # Errors
    ///
    /// Returns [`BossError::Database`] on SQLite failures.
    pub fn top_overall(&self, scope: ScopeId, limit: usize) -> Result<Vec<LeaderboardEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, SUM(cached_score) AS total FROM daily_stats
             WHERE scope_id = ?1
             GROUP BY user_id
             ORDER BY total DESC, user_id LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![scope, limit_param(limit)], |row| {
            Ok(LeaderboardEntry {
                user: row.get(0)?,
                score: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// HP removed from the pool by ticks at or after `since`.
    ///
    /// # Errors
    ///
    /// Returns [`BossError::Database`] on SQLite failures.
    pub fn recent_damage(&self, scope: ScopeId, since: Timestamp) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COALESCE(SUM(damage), 0) FROM pool_ticks WHERE scope_id = ?1 AND ts >= ?2",
            params![scope, since],
            |row| row.get(0),
        )?)
    }

    /// A user's token movements in a scope, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`BossError::Database`] on SQLite failures, or
    /// [`BossError::Serialization`] for an unreadable payload.
    pub fn ledger_for_user(&self, scope: ScopeId, user: UserId) -> Result<Vec<LedgerEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT ts, delta, payload FROM token_ledger
             WHERE scope_id = ?1 AND user_id = ?2 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![scope, user], |row| {
                Ok((
                    row.get::<_, Timestamp>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(ts, delta, payload)| {
                Ok(LedgerEntry {
                    scope,
                    user,
                    ts,
                    delta,
                    reason: LedgerReason::from_json(&payload)?,
                })
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Restart bookkeeping
    // ------------------------------------------------------------------

    /// Persisted cooldown bookkeeping for active scopes.
    ///
    /// # Errors
    ///
    /// Returns [`BossError::Database`] on SQLite failures.
    pub fn load_cooldowns(&self) -> Result<Vec<(ScopeId, UserId, Timestamp)>> {
        let mut stmt = self.conn.prepare(
            "SELECT c.scope_id, c.user_id, c.last_counted_time FROM message_cooldown c
             JOIN scopes s ON s.scope_id = c.scope_id WHERE s.active = 1",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Persisted voice refresh bookkeeping for active scopes.
    ///
    /// # Errors
    ///
    /// Returns [`BossError::Database`] on SQLite failures.
    pub fn load_refresh_states(&self) -> Result<Vec<(ScopeId, UserId, VoiceRefreshState)>> {
        let mut stmt = self.conn.prepare(
            "SELECT v.scope_id, v.user_id, v.last_refresh_time, v.warned FROM voice_refresh_state v
             JOIN scopes s ON s.scope_id = v.scope_id WHERE s.active = 1",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                VoiceRefreshState {
                    last_refresh_time: row.get(2)?,
                    warned: row.get(3)?,
                },
            ))
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Copy the database to `dest_path` with SQLite's online-backup API.
    ///
    /// # Errors
    ///
    /// Returns [`BossError::Database`] on SQLite failures.
    pub fn backup<P: AsRef<Path>>(&self, dest_path: P) -> Result<()> {
        let start = Instant::now();
        let mut dest = Connection::open(dest_path.as_ref())?;
        let backup = rusqlite::backup::Backup::new(&self.conn, &mut dest)?;
        backup.run_to_completion(256, std::time::Duration::from_millis(50), None)?;

        info!(
            dest = %dest_path.as_ref().display(),
            elapsed_ms = start.elapsed().as_millis(),
            "Database backup completed"
        );
        Ok(())
    }

    /// Path of the database file (`:memory:` for in-memory stores).
    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// `Ok(true)` if `PRAGMA integrity_check` passes.
    ///
    /// # Errors
    ///
    /// Returns [`BossError::Database`] if the check itself fails.
    pub fn integrity_check(&self) -> Result<bool> {
        let result: String = self
            .conn
            .query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        Ok(result == "ok")
    }
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

// ---------------------------------------------------------------------------
// Write transaction
// ---------------------------------------------------------------------------

/// All writes of one flush or one pool tick. Rolled back on drop unless
/// committed.
pub struct StoreTx<'a> {
    tx: Transaction<'a>,
}

impl StoreTx<'_> {
    /// Pool state as seen inside the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`BossError::Database`] on SQLite failures.
    pub fn pool_state(&self, scope: ScopeId) -> Result<Option<PoolState>> {
        let sql = format!("SELECT {POOL_COLUMNS} FROM pool_state WHERE scope_id = ?1");
        Ok(self
            .tx
            .query_row(&sql, params![scope], pool_from_row)
            .optional()?)
    }

    /// Whether the scope exists and is still active.
    ///
    /// # Errors
    ///
    /// Returns [`BossError::Database`] on SQLite failures.
    pub fn is_scope_active(&self, scope: ScopeId) -> Result<bool> {
        Ok(self
            .tx
            .query_row(
                "SELECT active FROM scopes WHERE scope_id = ?1",
                params![scope],
                |row| row.get::<_, bool>(0),
            )
            .optional()?
            .unwrap_or(false))
    }

    /// Records merged at or after `watermark`.
    ///
    /// # Errors
    ///
    /// Returns [`BossError::Database`] on SQLite failures.
    pub fn changed_records(
        &self,
        scope: ScopeId,
        watermark: Timestamp,
    ) -> Result<Vec<DailyStatRecord>> {
        let sql = format!(
            "SELECT {DAILY_COLUMNS} FROM daily_stats
             WHERE scope_id = ?1 AND last_update_time >= ?2"
        );
        let mut stmt = self.tx.prepare(&sql)?;
        let rows = stmt.query_map(params![scope, watermark], daily_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Remember the score last applied to the pool for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`BossError::Database`] on SQLite failures.
    pub fn set_cached_score(&self, key: &DailyKey, score: f64) -> Result<()> {
        self.tx.execute(
            "UPDATE daily_stats SET cached_score = ?4
             WHERE scope_id = ?1 AND user_id = ?2 AND day = ?3",
            params![key.scope, key.user, key.day, score],
        )?;
        Ok(())
    }

    /// Persist new HP and the tick watermark.
    ///
    /// # Errors
    ///
    /// Returns [`BossError::Database`] on SQLite failures.
    pub fn update_pool(&self, scope: ScopeId, hp_current: i64, last_tick_time: Timestamp) -> Result<()> {
        self.tx.execute(
            "UPDATE pool_state SET hp_current = ?2, last_tick_time = ?3 WHERE scope_id = ?1",
            params![scope, hp_current, last_tick_time],
        )?;
        Ok(())
    }

    /// Record the lowest announced milestone bucket.
    ///
    /// # Errors
    ///
    /// Returns [`BossError::Database`] on SQLite failures.
    pub fn set_announced_bucket(&self, scope: ScopeId, bucket: u32) -> Result<()> {
        self.tx.execute(
            "UPDATE pool_state SET last_announced_bucket = ?2 WHERE scope_id = ?1",
            params![scope, bucket],
        )?;
        Ok(())
    }

    /// Append to the pool tick log.
    ///
    /// # Errors
    ///
    /// Returns [`BossError::Database`] on SQLite failures.
    pub fn log_tick(&self, scope: ScopeId, ts: Timestamp, damage: i64, hp_after: i64) -> Result<()> {
        self.tx.execute(
            "INSERT INTO pool_ticks (scope_id, ts, damage, hp_after) VALUES (?1, ?2, ?3, ?4)",
            params![scope, ts, damage, hp_after],
        )?;
        Ok(())
    }

    /// Add `delta` onto the record for `key`: sums for counters, MAX for the
    /// ritual flag. Creates the record if missing.
    ///
    /// `last_update_time` never falls below the pool's tick watermark, so a
    /// merge is always seen by the next tick even if `now` lags behind it.
    ///
    /// # Errors
    ///
    /// Returns [`BossError::Database`] on SQLite failures.
    pub fn upsert_daily(&self, key: &DailyKey, delta: &DailyCounters, now: Timestamp) -> Result<()> {
        self.tx.execute(
            "INSERT INTO daily_stats (scope_id, user_id, day, message_count, voice_minutes,
                 voice_reduced_minutes, ritual_done, tokens_spent, wager_total, wager_net,
                 cached_score, last_update_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0,
                 MAX(?11, COALESCE((SELECT last_tick_time FROM pool_state WHERE scope_id = ?1), ?11)))
             ON CONFLICT(scope_id, user_id, day) DO UPDATE SET
                 message_count = message_count + excluded.message_count,
                 voice_minutes = voice_minutes + excluded.voice_minutes,
                 voice_reduced_minutes = voice_reduced_minutes + excluded.voice_reduced_minutes,
                 ritual_done = MAX(ritual_done, excluded.ritual_done),
                 tokens_spent = tokens_spent + excluded.tokens_spent,
                 wager_total = wager_total + excluded.wager_total,
                 wager_net = wager_net + excluded.wager_net,
                 last_update_time = MAX(last_update_time, excluded.last_update_time)",
            params![
                key.scope,
                key.user,
                key.day,
                delta.message_count,
                delta.voice_minutes,
                delta.voice_reduced_minutes,
                delta.ritual_done,
                delta.tokens_spent,
                delta.wager_total,
                delta.wager_net,
                now,
            ],
        )?;
        Ok(())
    }

    /// Append a token ledger row.
    ///
    /// # Errors
    ///
    /// Returns [`BossError::Serialization`] if the reason cannot be encoded,
    /// or [`BossError::Database`] on SQLite failures.
    pub fn append_ledger(&self, entry: &LedgerEntry) -> Result<()> {
        let payload = entry.reason.to_json()?;
        self.tx.execute(
            "INSERT INTO token_ledger (scope_id, user_id, ts, delta, reason, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![entry.scope, entry.user, entry.ts, entry.delta, entry.reason.code(), payload],
        )?;
        Ok(())
    }

    /// Upsert cooldown bookkeeping.
    ///
    /// # Errors
    ///
    /// Returns [`BossError::Database`] on SQLite failures.
    pub fn save_cooldowns(&self, rows: &[(ScopeId, UserId, Timestamp)]) -> Result<()> {
        let mut stmt = self.tx.prepare_cached(
            "INSERT INTO message_cooldown (scope_id, user_id, last_counted_time) VALUES (?1, ?2, ?3)
             ON CONFLICT(scope_id, user_id) DO UPDATE SET last_counted_time = excluded.last_counted_time",
        )?;
        for (scope, user, ts) in rows {
            stmt.execute(params![scope, user, ts])?;
        }
        Ok(())
    }

    /// Upsert voice refresh bookkeeping.
    ///
    /// # Errors
    ///
    /// Returns [`BossError::Database`] on SQLite failures.
    pub fn save_refresh_states(&self, rows: &[(ScopeId, UserId, VoiceRefreshState)]) -> Result<()> {
        let mut stmt = self.tx.prepare_cached(
            "INSERT INTO voice_refresh_state (scope_id, user_id, last_refresh_time, warned)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(scope_id, user_id) DO UPDATE SET
                 last_refresh_time = excluded.last_refresh_time,
                 warned = excluded.warned",
        )?;
        for (scope, user, state) in rows {
            stmt.execute(params![scope, user, state.last_refresh_time, state.warned])?;
        }
        Ok(())
    }

    /// Make every write of this transaction durable.
    ///
    /// # Errors
    ///
    /// Returns [`BossError::Database`] if the commit fails; nothing is applied.
    pub fn commit(self) -> Result<()> {
        self.tx.commit()?;
        debug!("Store transaction committed");
        Ok(())
    }
}

/// Adds `.optional()` to `rusqlite::Result`, turning `QueryReturnedNoRows` into `Ok(None)`.
trait OptionalExt<T> {
    fn optional(self) -> std::result::Result<Option<T>, rusqlite::Error>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> std::result::Result<Option<T>, rusqlite::Error> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> DayKey {
        "2025-12-24".parse().expect("day")
    }

    fn store_with_scope(hp: i64) -> (Store, ScopeId) {
        let mut store = Store::open_in_memory().expect("open");
        let scope = store
            .create_scope(GuildId(1), ScopeKind::HolidayWeek, "Frost Wyrm", hp, Timestamp(1_000))
            .expect("scope");
        (store, scope.id)
    }

    #[test]
    fn create_scope_starts_full() {
        let (store, scope) = store_with_scope(15_000);
        let pool = store.pool_state(scope).expect("query").expect("pool");
        assert_eq!(pool.hp_current, 15_000);
        assert_eq!(pool.last_announced_bucket, 100);
        assert_eq!(pool.last_tick_time, Timestamp(1_000));
        let snap = store.pool_snapshot(scope).expect("snapshot");
        assert_eq!(snap.percent, 100);
        assert!(!snap.depleted);
    }

    #[test]
    fn non_positive_hp_rejected() {
        let mut store = Store::open_in_memory().expect("open");
        let err = store.create_scope(GuildId(1), ScopeKind::SeasonEra, "x", 0, Timestamp(0));
        assert!(matches!(err, Err(BossError::InvalidInput { field: "hp_max", .. })));
    }

    #[test]
    fn unknown_scope_snapshot_errors() {
        let store = Store::open_in_memory().expect("open");
        assert!(matches!(
            store.pool_snapshot(ScopeId::new()),
            Err(BossError::UnknownScope(_))
        ));
    }

    #[test]
    fn upsert_adds_in_place_and_keeps_ritual() {
        let (mut store, scope) = store_with_scope(15_000);
        let key = DailyKey {
            scope,
            user: UserId(u64::MAX),
            day: day(),
        };
        let tx = store.transaction().expect("tx");
        tx.upsert_daily(
            &key,
            &DailyCounters {
                message_count: 2,
                ritual_done: true,
                wager_net: 50,
                ..DailyCounters::default()
            },
            Timestamp(2_000),
        )
        .expect("first");
        tx.upsert_daily(
            &key,
            &DailyCounters {
                message_count: 3,
                wager_net: -80,
                ..DailyCounters::default()
            },
            Timestamp(2_060),
        )
        .expect("second");
        tx.commit().expect("commit");

        let record = store
            .daily_stat(scope, UserId(u64::MAX), day())
            .expect("query")
            .expect("record");
        assert_eq!(record.counters.message_count, 5);
        assert_eq!(record.counters.wager_net, -30);
        assert!(record.counters.ritual_done);
        assert_eq!(record.last_update_time, Timestamp(2_060));
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let (mut store, scope) = store_with_scope(15_000);
        {
            let tx = store.transaction().expect("tx");
            tx.update_pool(scope, 1, Timestamp(5_000)).expect("update");
        }
        let pool = store.pool_state(scope).expect("query").expect("pool");
        assert_eq!(pool.hp_current, 15_000);
    }

    #[test]
    fn changed_records_uses_inclusive_watermark() {
        let (mut store, scope) = store_with_scope(15_000);
        let tx = store.transaction().expect("tx");
        for (user, at) in [(1, 2_000), (2, 3_000), (3, 4_000)] {
            let key = DailyKey {
                scope,
                user: UserId(user),
                day: day(),
            };
            tx.upsert_daily(&key, &DailyCounters::default(), Timestamp(at))
                .expect("upsert");
        }
        let mut users: Vec<u64> = tx
            .changed_records(scope, Timestamp(3_000))
            .expect("changed")
            .into_iter()
            .map(|r| r.key.user.0)
            .collect();
        users.sort_unstable();
        assert_eq!(users, vec![2, 3]);
    }

    #[test]
    fn lagging_merge_is_lifted_to_watermark() {
        let (mut store, scope) = store_with_scope(15_000);
        let tx = store.transaction().expect("tx");
        let key = DailyKey {
            scope,
            user: UserId(1),
            day: day(),
        };
        tx.upsert_daily(&key, &DailyCounters::default(), Timestamp(500))
            .expect("upsert");
        assert_eq!(tx.changed_records(scope, Timestamp(1_000)).expect("changed").len(), 1);
    }

    #[test]
    fn leaderboards_rank_by_cached_score() {
        let (mut store, scope) = store_with_scope(15_000);
        let other_day: DayKey = "2025-12-25".parse().expect("day");
        let tx = store.transaction().expect("tx");
        for (user, d, score) in [(1, day(), 10.0), (2, day(), 30.0), (1, other_day, 25.0)] {
            let key = DailyKey {
                scope,
                user: UserId(user),
                day: d,
            };
            tx.upsert_daily(&key, &DailyCounters::default(), Timestamp(10))
                .expect("upsert");
            tx.set_cached_score(&key, score).expect("score");
        }
        tx.commit().expect("commit");

        let daily = store.top_for_day(scope, day(), 10).expect("daily");
        assert_eq!(daily[0].user, UserId(2));
        assert_eq!(daily.len(), 2);

        let overall = store.top_overall(scope, 1).expect("overall");
        assert_eq!(overall, vec![LeaderboardEntry { user: UserId(1), score: 35.0 }]);
    }

    #[test]
    fn tick_log_sums_recent_damage() {
        let (mut store, scope) = store_with_scope(15_000);
        let tx = store.transaction().expect("tx");
        tx.log_tick(scope, Timestamp(100), 500, 14_500).expect("log");
        tx.log_tick(scope, Timestamp(200), 300, 14_200).expect("log");
        tx.commit().expect("commit");
        assert_eq!(store.recent_damage(scope, Timestamp(150)).expect("sum"), 300);
        assert_eq!(store.recent_damage(scope, Timestamp(0)).expect("sum"), 800);
        assert_eq!(store.recent_damage(ScopeId::new(), Timestamp(0)).expect("sum"), 0);
    }

    #[test]
    fn ledger_round_trip() {
        let (mut store, scope) = store_with_scope(15_000);
        let entry = LedgerEntry {
            scope,
            user: UserId(9),
            ts: Timestamp(77),
            delta: -40,
            reason: LedgerReason::ShopPurchase {
                item: "ember-cloak".to_string(),
            },
        };
        let tx = store.transaction().expect("tx");
        tx.append_ledger(&entry).expect("append");
        tx.commit().expect("commit");
        assert_eq!(store.ledger_for_user(scope, UserId(9)).expect("ledger"), vec![entry]);
    }

    #[test]
    fn bookkeeping_survives_reload_and_retirement_clears_it() {
        let (mut store, scope) = store_with_scope(15_000);
        let refresh = VoiceRefreshState {
            last_refresh_time: Timestamp(40),
            warned: true,
        };
        let tx = store.transaction().expect("tx");
        tx.save_cooldowns(&[(scope, UserId(1), Timestamp(30))]).expect("cooldowns");
        tx.save_refresh_states(&[(scope, UserId(1), refresh)]).expect("refresh");
        tx.commit().expect("commit");

        assert_eq!(
            store.load_cooldowns().expect("load"),
            vec![(scope, UserId(1), Timestamp(30))]
        );
        assert_eq!(
            store.load_refresh_states().expect("load"),
            vec![(scope, UserId(1), refresh)]
        );

        assert!(store.retire_scope(scope).expect("retire"));
        assert!(!store.retire_scope(scope).expect("retire twice"));
        assert!(store.load_cooldowns().expect("load").is_empty());
        assert!(store.active_scopes().expect("scopes").is_empty());
    }

    #[test]
    fn holiday_week_wins_resolution() {
        let mut store = Store::open_in_memory().expect("open");
        let guild = GuildId(5);
        store
            .create_scope(guild, ScopeKind::SeasonEra, "Era", 1_000, Timestamp(300))
            .expect("era");
        let holiday = store
            .create_scope(guild, ScopeKind::HolidayWeek, "Yule", 1_000, Timestamp(100))
            .expect("holiday");
        let newer = store
            .create_scope(guild, ScopeKind::HolidayWeek, "Yule II", 1_000, Timestamp(200))
            .expect("holiday 2");

        let resolved = store.resolve_active_scope(guild).expect("resolve").expect("some");
        assert_eq!(resolved.id, newer.id);

        store.retire_scope(newer.id).expect("retire");
        let resolved = store.resolve_active_scope(guild).expect("resolve").expect("some");
        assert_eq!(resolved.id, holiday.id);
        assert!(store.resolve_active_scope(GuildId(6)).expect("resolve").is_none());
    }

    #[test]
    fn file_based_open_and_backup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("bossfight.db");
        let config = PersistenceConfig::default();

        let mut store = Store::open(&db_path, &config).expect("open");
        let scope = store
            .create_scope(GuildId(1), ScopeKind::SeasonEra, "Era", 9_000, Timestamp(1))
            .expect("scope");
        assert!(store.integrity_check().expect("check"));

        let backup_path = dir.path().join("bossfight_backup.db");
        store.backup(&backup_path).expect("backup");

        let restored = Store::open(&backup_path, &config).expect("open backup");
        let loaded = restored.scope(scope.id).expect("query").expect("scope");
        assert_eq!(loaded, scope);
    }
}
