//! Component wiring.
//!
//! [`Engine`] owns one instance of every in-memory component and hands out
//! shared handles. There are no module-level singletons: the host builds an
//! engine at startup and drops it at shutdown.

use std::sync::Arc;

use chrono_tz::Tz;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::BossConfig;
use crate::cooldown::MessageCooldownGate;
use crate::error::Result;
use crate::flush::{FlushOutcome, FlushScheduler};
use crate::ingest::Ingest;
use crate::live::LiveCounterStore;
use crate::metrics::EngineCounters;
use crate::persistence::Store;
use crate::pool::{PoolDamageEngine, TickOutcome};
use crate::registry::ScopeRegistry;
use crate::types::{Scope, ScopeId};
use crate::voice::{VoicePresenceTracker, VoiceTickReport};

/// Every in-memory component of one running engine.
pub struct Engine {
    /// Validated configuration.
    pub config: BossConfig,
    /// Calendar-day timezone.
    pub tz: Tz,
    /// Time source.
    pub clock: Arc<dyn Clock>,
    /// Active scopes.
    pub registry: ScopeRegistry,
    /// Runtime counters.
    pub counters: Arc<EngineCounters>,
    /// Unflushed deltas.
    pub live: Arc<LiveCounterStore>,
    /// Message throttle.
    pub gate: Arc<MessageCooldownGate>,
    /// Voice sessions and idle decay.
    pub voice: Arc<VoicePresenceTracker>,
    /// Host event boundary.
    pub ingest: Arc<Ingest>,
    /// Live counter writer.
    pub flusher: Arc<FlushScheduler>,
    /// HP ticks.
    pub pool: Arc<PoolDamageEngine>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("tz", &self.tz)
            .field("active_scopes", &self.registry.active().len())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Validate `config` and build every component.
    ///
    /// # Errors
    ///
    /// Returns [`crate::BossError::Config`] if the configuration is invalid.
    pub fn new(config: BossConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let tz = config.timing.tz()?;
        let registry = ScopeRegistry::new();
        let counters = Arc::new(EngineCounters::new());
        let live = Arc::new(LiveCounterStore::new(registry.clone()));
        let gate = Arc::new(MessageCooldownGate::new(config.ingest.message_cooldown_secs));
        let voice = Arc::new(VoicePresenceTracker::new(
            config.voice.idle_threshold_secs,
            tz,
            Arc::clone(&live),
        ));
        let ingest = Arc::new(Ingest::new(
            &config,
            Arc::clone(&live),
            Arc::clone(&gate),
            Arc::clone(&voice),
            Arc::clone(&clock),
            Arc::clone(&counters),
        )?);
        let flusher = Arc::new(FlushScheduler::new(
            Arc::clone(&live),
            Arc::clone(&gate),
            Arc::clone(&voice),
            Arc::clone(&counters),
        ));
        let pool = Arc::new(PoolDamageEngine::from_config(&config, Arc::clone(&counters)));

        Ok(Self {
            config,
            tz,
            clock,
            registry,
            counters,
            live,
            gate,
            voice,
            ingest,
            flusher,
            pool,
        })
    }

    /// Reload active scopes and restart bookkeeping from `store`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::BossError::Database`] on SQLite failures.
    pub fn restore(&self, store: &Store) -> Result<()> {
        let scopes = store.active_scopes()?;
        self.registry.replace(scopes.iter().map(|s| s.id));
        let cooldowns = store.load_cooldowns()?;
        let refresh = store.load_refresh_states()?;
        info!(
            scopes = scopes.len(),
            cooldowns = cooldowns.len(),
            refresh_states = refresh.len(),
            "Engine state restored"
        );
        self.gate.restore(cooldowns);
        self.voice.restore_refresh(refresh);
        Ok(())
    }

    /// Start accepting activity for a freshly created scope.
    pub fn activate(&self, scope: &Scope) {
        if scope.active {
            self.registry.activate(scope.id);
        }
    }

    /// Retire a scope in storage and stop accepting its activity.
    ///
    /// # Errors
    ///
    /// Returns [`crate::BossError::Database`] on SQLite failures.
    pub fn retire(&self, store: &mut Store, scope: ScopeId) -> Result<bool> {
        let retired = store.retire_scope(scope)?;
        self.registry.retire(scope);
        self.gate.forget_scope(scope);
        self.voice.forget_scope(scope);
        Ok(retired)
    }

    /// Make the active set match `scopes` and drop in-memory state of any
    /// scope that is no longer among them. Returns the scopes dropped.
    pub fn sync_active(&self, scopes: &[Scope]) -> Vec<ScopeId> {
        let keep: Vec<ScopeId> = scopes.iter().filter(|s| s.active).map(|s| s.id).collect();
        let dropped: Vec<ScopeId> = self
            .registry
            .active()
            .into_iter()
            .filter(|id| !keep.contains(id))
            .collect();
        self.registry.replace(keep);
        for &scope in &dropped {
            self.gate.forget_scope(scope);
            self.voice.forget_scope(scope);
        }
        dropped
    }

    /// Credit every voice session up to the current time.
    pub fn voice_tick(&self) -> VoiceTickReport {
        let report = self.voice.tick(self.clock.now());
        EngineCounters::add(&self.counters.voice_seconds, report.full_seconds);
        EngineCounters::add(&self.counters.voice_reduced_seconds, report.reduced_seconds);
        for _ in &report.warnings {
            EngineCounters::bump(&self.counters.idle_warnings);
        }
        report
    }

    /// Flush live counters at the current time.
    ///
    /// Call with exclusive access to `store` so that the timestamp is taken
    /// after any concurrent tick has committed.
    ///
    /// # Errors
    ///
    /// Returns the storage error that aborted the flush.
    pub fn flush(&self, store: &mut Store) -> Result<FlushOutcome> {
        self.flusher.flush(store, self.clock.now())
    }

    /// Tick every active scope. A failing scope does not stop the others.
    pub fn tick_all(&self, store: &mut Store) -> Vec<(ScopeId, Result<TickOutcome>)> {
        let mut scopes = self.registry.active();
        scopes.sort_unstable();
        scopes
            .into_iter()
            .map(|scope| {
                let outcome = self.pool.tick(store, scope, self.clock.now());
                if let Err(e) = &outcome {
                    warn!(scope = %scope, error = %e, "Scope tick failed");
                }
                (scope, outcome)
            })
            .collect()
    }
}
