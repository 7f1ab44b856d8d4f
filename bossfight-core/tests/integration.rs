//! Integration Tests: End-to-End Activity Flows
//!
//! Complete pipelines through the public API: host event → live counters →
//! flush → pool tick → milestone, plus restart recovery and idle decay.

use std::sync::Arc;

use bossfight_core::config::{PersistenceConfig, SignalWeight};
use bossfight_core::flush::FlushOutcome;
use bossfight_core::ingest::MessageOutcome;
use bossfight_core::ledger::LedgerReason;
use bossfight_core::persistence::Store;
use bossfight_core::pool::TickOutcome;
use bossfight_core::score;
use bossfight_core::error::Result;
use bossfight_core::{
    BossConfig, ChannelId, Clock, Engine, GuildId, ManualClock, Scope, ScopeId, ScopeKind,
    Timestamp, UserId,
};

// 2025-12-24 12:00:00 UTC (GMT, so London and UTC agree)
const START: Timestamp = Timestamp(1_766_577_600);

fn setup(config: BossConfig, hp: i64) -> (Engine, Arc<ManualClock>, Store, Scope) {
    let clock = Arc::new(ManualClock::new(START));
    let mut store = Store::open_in_memory().expect("open");
    let scope = store
        .create_scope(GuildId(10), ScopeKind::HolidayWeek, "Frost Wyrm", hp, START)
        .expect("scope");
    let engine = Engine::new(config, clock.clone()).expect("engine");
    engine.activate(&scope);
    (engine, clock, store, scope)
}

fn only_outcome(results: Vec<(ScopeId, Result<TickOutcome>)>) -> TickOutcome {
    assert_eq!(results.len(), 1);
    results
        .into_iter()
        .next()
        .expect("one scope")
        .1
        .expect("tick")
}

// ---------------------------------------------------------------------------
// Activity → damage
// ---------------------------------------------------------------------------

#[test]
fn spending_and_ritual_damage_the_pool() {
    let (engine, clock, mut store, scope) = setup(BossConfig::default(), 15_000);
    let user = UserId(1);

    engine
        .ingest
        .on_tokens_spent(scope.id, user, 1000, LedgerReason::Offering)
        .expect("spend");
    engine.ingest.on_ritual_completed(scope.id, user);

    clock.advance(60);
    assert_eq!(
        engine.flush(&mut store).expect("flush"),
        FlushOutcome::Flushed { rows: 1, ledger_entries: 1 }
    );

    clock.advance(30);
    let outcome = only_outcome(engine.tick_all(&mut store));
    let TickOutcome::Applied(report) = outcome else {
        panic!("expected applied, got {outcome:?}");
    };
    // 260·ln(41) + 160
    let expected = 260.0 * 41f64.ln() + 160.0;
    assert!((report.total_delta - expected).abs() < 1e-6);
    assert_eq!(report.damage, 1_125);
    assert_eq!(report.milestone, None);

    let snap = store.pool_snapshot(scope.id).expect("snapshot");
    assert_eq!(snap.hp_current, 13_875);
    assert_eq!(snap.percent, 92);

    let day = START.day_in(engine.tz);
    let record = store
        .daily_stat(scope.id, user, day)
        .expect("query")
        .expect("record");
    assert!((record.cached_score - score::damage(&record.counters, &engine.config.scoring)).abs() < 1e-9);
    assert_eq!(store.top_for_day(scope.id, day, 5).expect("top")[0].user, user);
    assert_eq!(store.ledger_for_user(scope.id, user).expect("ledger")[0].delta, -1000);
}

#[test]
fn crossing_eighty_percent_announces_once() {
    let mut config = BossConfig::default();
    config.scoring.ritual_done = SignalWeight::new(3_200.5, 1.0 / (std::f64::consts::E - 1.0));
    let (engine, clock, mut store, scope) = setup(config, 15_000);

    engine.ingest.on_ritual_completed(scope.id, UserId(1));
    clock.advance(60);
    engine.flush(&mut store).expect("flush");
    clock.advance(30);

    let outcome = only_outcome(engine.tick_all(&mut store));
    let milestone = outcome.milestone().expect("milestone");
    assert_eq!(milestone.bucket, 80);
    assert_eq!(milestone.hp_current, 11_800);
    assert_eq!(milestone.hp_max, 15_000);

    // Later ticks recompute zero deltas and never re-announce.
    for _ in 0..5 {
        clock.advance(30);
        engine.flush(&mut store).expect("flush");
        let outcome = only_outcome(engine.tick_all(&mut store));
        assert_eq!(outcome.milestone(), None);
    }
    assert_eq!(store.pool_snapshot(scope.id).expect("snapshot").hp_current, 11_800);
    assert_eq!(engine.counters.snapshot().milestones_announced, 1);
}

#[test]
fn unflushed_activity_appears_on_a_later_tick() {
    let (engine, clock, mut store, scope) = setup(BossConfig::default(), 15_000);
    engine
        .ingest
        .on_wager_resolved(scope.id, UserId(2), 20_000, 10_000)
        .expect("wager");

    // Tick before the flush: nothing to see yet.
    clock.advance(30);
    assert_eq!(
        only_outcome(engine.tick_all(&mut store)),
        TickOutcome::Idle { milestone: None }
    );

    clock.advance(30);
    engine.flush(&mut store).expect("flush");
    clock.advance(30);
    let outcome = only_outcome(engine.tick_all(&mut store));
    // 110·ln 2 + 95·ln 2
    assert!(matches!(outcome, TickOutcome::Applied(r) if r.damage == 142));
}

// ---------------------------------------------------------------------------
// Messages & voice
// ---------------------------------------------------------------------------

#[test]
fn message_burst_counts_once() {
    let (engine, clock, mut store, scope) = setup(BossConfig::default(), 15_000);
    let user = UserId(3);
    let mut outcomes = Vec::new();
    for _ in 0..3 {
        outcomes.push(engine.ingest.on_text_message(scope.id, user, clock.now(), ChannelId(1)));
        clock.advance(1);
    }
    assert_eq!(outcomes.iter().filter(|o| **o == MessageOutcome::Counted).count(), 1);

    engine.flush(&mut store).expect("flush");
    let record = store
        .daily_stat(scope.id, user, START.day_in(engine.tz))
        .expect("query")
        .expect("record");
    assert_eq!(record.counters.message_count, 1);
}

#[test]
fn idle_voice_decays_until_a_message_refreshes_it() {
    let (engine, clock, mut store, scope) = setup(BossConfig::default(), 15_000);
    let user = UserId(4);
    engine
        .ingest
        .on_text_message(scope.id, user, START, ChannelId(1));
    engine
        .ingest
        .on_voice_presence_change(scope.id, user, START, true);

    // One hour of 30-second ticks at full rate.
    let mut warnings = 0;
    for _ in 0..120 {
        clock.advance(30);
        warnings += engine.voice_tick().warnings.len();
    }
    assert_eq!(warnings, 1, "threshold reached on the last tick");

    // Another ten minutes idle: reduced, no further warnings.
    for _ in 0..20 {
        clock.advance(30);
        warnings += engine.voice_tick().warnings.len();
    }
    assert_eq!(warnings, 1);

    // A message restores full rate from the next tick.
    engine
        .ingest
        .on_text_message(scope.id, user, clock.now(), ChannelId(1));
    clock.advance(60);
    let report = engine.voice_tick();
    assert_eq!(report.full_seconds, 60);
    assert_eq!(report.reduced_seconds, 0);

    engine.flush(&mut store).expect("flush");
    let record = store
        .daily_stat(scope.id, user, START.day_in(engine.tz))
        .expect("query")
        .expect("record");
    // 3570 s + 60 s full, 30 s + 600 s reduced
    assert_eq!(record.counters.voice_minutes, 60);
    assert_eq!(record.counters.voice_reduced_minutes, 10);
    assert_eq!(engine.counters.snapshot().idle_warnings, 1);
}

// ---------------------------------------------------------------------------
// Restart
// ---------------------------------------------------------------------------

#[test]
fn restart_restores_cooldowns_and_pool() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("bossfight.db");
    let clock = Arc::new(ManualClock::new(START));
    let user = UserId(5);

    let scope = {
        let mut store = Store::open(&path, &PersistenceConfig::default()).expect("open");
        let scope = store
            .create_scope(GuildId(1), ScopeKind::SeasonEra, "Era", 9_000, START)
            .expect("scope");
        let engine = Engine::new(BossConfig::default(), clock.clone()).expect("engine");
        engine.activate(&scope);
        engine
            .ingest
            .on_text_message(scope.id, user, START, ChannelId(1));
        clock.advance(2);
        engine.flush(&mut store).expect("flush");
        scope
    };

    let store = Store::open(&path, &PersistenceConfig::default()).expect("reopen");
    let engine = Engine::new(BossConfig::default(), clock.clone()).expect("engine");
    engine.restore(&store).expect("restore");

    // Still inside the 5-second window that began before the restart.
    assert_eq!(
        engine
            .ingest
            .on_text_message(scope.id, user, START.plus_seconds(3), ChannelId(1)),
        MessageOutcome::Throttled
    );
    assert_eq!(store.pool_snapshot(scope.id).expect("snapshot").hp_current, 9_000);
    assert!(store.integrity_check().expect("check"));
}
