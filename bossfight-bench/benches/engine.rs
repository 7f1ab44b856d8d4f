//! bossfight Benchmark Suite
//!
//! Hot-path targets:
//!   score_damage_single .............. < 1μs
//!   hooks_message_burst_1000 ......... < 1ms
//!   flush_1000_records ............... < 50ms
//!   pool_tick_1000_records ........... < 50ms

use std::sync::Arc;

use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};

use bossfight_core::config::ScoringConfig;
use bossfight_core::ledger::LedgerReason;
use bossfight_core::persistence::Store;
use bossfight_core::score;
use bossfight_core::{
    BossConfig, ChannelId, DailyCounters, Engine, GuildId, ManualClock, ScopeId, ScopeKind,
    Timestamp, UserId,
};
use bossfight_service::Hooks;
use bossfight_service::events;

const START: Timestamp = Timestamp(1_766_577_600);

fn make_engine() -> (Engine, Arc<ManualClock>, Store, ScopeId) {
    let clock = Arc::new(ManualClock::new(START));
    let mut store = Store::open_in_memory().unwrap();
    let scope = store
        .create_scope(GuildId(1), ScopeKind::HolidayWeek, "Bench Wyrm", 3_500_000, START)
        .unwrap();
    let engine = Engine::new(BossConfig::default(), clock.clone()).unwrap();
    engine.activate(&scope);
    (engine, clock, store, scope.id)
}

/// 1000 users with a mix of every signal.
fn populate(engine: &Engine, scope: ScopeId) {
    for i in 0..1000u64 {
        let user = UserId(i);
        engine
            .ingest
            .on_tokens_spent(scope, user, (i as i64 % 50) * 10, LedgerReason::Offering)
            .unwrap();
        engine
            .ingest
            .on_wager_resolved(scope, user, i as i64 * 3, i as i64 - 500)
            .unwrap();
        engine
            .ingest
            .on_text_message(scope, user, START, ChannelId(1));
        if i % 3 == 0 {
            engine.ingest.on_ritual_completed(scope, user);
        }
    }
}

/// Benchmark: Damage for one record (target: < 1μs).
fn bench_score(c: &mut Criterion) {
    let scoring = ScoringConfig::default();
    let counters = DailyCounters {
        message_count: 40,
        voice_minutes: 95,
        voice_reduced_minutes: 30,
        ritual_done: true,
        tokens_spent: 1_000,
        wager_total: 20_000,
        wager_net: -4_000,
    };

    c.bench_function("score_damage_single", |b| {
        b.iter(|| black_box(score::damage(black_box(&counters), black_box(&scoring))));
    });
}

/// Benchmark: 1000 messages through the hooks (target: < 1ms).
fn bench_message_burst(c: &mut Criterion) {
    let (engine, _clock, _store, scope) = make_engine();
    let (tx, _rx) = events::channel();
    let hooks = Hooks::new(Arc::clone(&engine.ingest), tx);
    let mut now = START;

    c.bench_function("hooks_message_burst_1000", |b| {
        b.iter(|| {
            now = now.plus_seconds(10);
            for i in 0..1000u64 {
                black_box(hooks.on_text_message(scope, UserId(i), ChannelId(1), now));
            }
        });
    });
}

/// Benchmark: Flush 1000 dirty records (target: < 50ms).
fn bench_flush(c: &mut Criterion) {
    c.bench_function("flush_1000_records", |b| {
        b.iter_batched(
            || {
                let (engine, clock, store, scope) = make_engine();
                populate(&engine, scope);
                clock.advance(60);
                (engine, store)
            },
            |(engine, mut store)| black_box(engine.flush(&mut store).unwrap()),
            BatchSize::LargeInput,
        );
    });
}

/// Benchmark: Pool tick over 1000 changed records (target: < 50ms).
fn bench_pool_tick(c: &mut Criterion) {
    c.bench_function("pool_tick_1000_records", |b| {
        b.iter_batched(
            || {
                let (engine, clock, mut store, scope) = make_engine();
                populate(&engine, scope);
                clock.advance(60);
                engine.flush(&mut store).unwrap();
                clock.advance(30);
                (engine, store)
            },
            |(engine, mut store)| black_box(engine.tick_all(&mut store)),
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(
    benches,
    bench_score,
    bench_message_burst,
    bench_flush,
    bench_pool_tick,
);
criterion_main!(benches);
