//! Periodic systems driving the engine.
//!
//! Three independent loops run on the tokio runtime:
//!
//! | System     | Default cadence | Work                                   |
//! |------------|-----------------|----------------------------------------|
//! | Voice tick | 30 s            | Credit voice sessions, raise warnings  |
//! | Flush      | 60 s            | Write live counters to SQLite          |
//! | Pool tick  | 30 s            | Score changed records, decrement HP    |
//!
//! SQLite work runs on the blocking pool under the store mutex, and the
//! engine reads the clock only after the mutex is held, so a flush and a
//! pool tick never interleave their timestamps. Missed intervals are skipped
//! rather than replayed.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bossfight_core::flush::FlushOutcome;
use bossfight_core::persistence::Store;
use bossfight_core::pool::TickOutcome;
use bossfight_core::voice::VoiceTickReport;
use bossfight_core::{Engine, ScopeId};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::ServiceSettings;
use crate::error::Result;
use crate::events::{self, EngineEvent, EventSender};

/// The engine, its store and the outbound event stream.
pub struct Systems {
    engine: Arc<Engine>,
    store: Arc<Mutex<Store>>,
    events: EventSender,
    shutdown_grace: Duration,
    final_flush: bool,
}

impl std::fmt::Debug for Systems {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Systems")
            .field("engine", &self.engine)
            .field("shutdown_grace", &self.shutdown_grace)
            .field("final_flush", &self.final_flush)
            .finish_non_exhaustive()
    }
}

/// Handles to spawned system loops.
#[derive(Debug)]
pub struct RunningSystems {
    shutdown: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Systems {
    /// Take ownership of `store` and wire the systems to `events`.
    #[must_use]
    pub fn new(
        engine: Arc<Engine>,
        store: Store,
        events: EventSender,
        settings: &ServiceSettings,
    ) -> Self {
        Self {
            engine,
            store: Arc::new(Mutex::new(store)),
            events,
            shutdown_grace: Duration::from_secs(settings.shutdown_grace_secs),
            final_flush: settings.final_flush_on_shutdown,
        }
    }

    /// The engine these systems drive.
    #[must_use]
    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Shared store, for read-side queries such as leaderboards.
    #[must_use]
    pub fn store(&self) -> &Arc<Mutex<Store>> {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Single passes
    // -----------------------------------------------------------------------

    /// Credit every voice session and publish new idle warnings.
    pub fn voice_tick_once(&self) -> VoiceTickReport {
        let report = self.engine.voice_tick();
        for warning in &report.warnings {
            debug!(scope = %warning.scope, user = %warning.user, "Voice presence idle");
            self.notify(EngineEvent::IdleWarning(*warning));
        }
        report
    }

    /// Write live counters and restart bookkeeping.
    ///
    /// # Errors
    ///
    /// Returns the storage error that aborted the flush. The pending
    /// generation has already been restored for the next attempt.
    pub async fn flush_once(&self) -> Result<FlushOutcome> {
        let engine = Arc::clone(&self.engine);
        let store = Arc::clone(&self.store);
        let outcome = tokio::task::spawn_blocking(move || {
            let mut store = store.lock();
            engine.flush(&mut store)
        })
        .await??;
        Ok(outcome)
    }

    /// Tick every active scope and publish milestones.
    ///
    /// The active set is reloaded from storage first so that scopes created
    /// or retired by other tools are picked up. Scopes whose tick failed are
    /// left out of the result; they retry on the next cycle.
    ///
    /// # Errors
    ///
    /// Fails only if the active scope list cannot be read.
    pub async fn pool_tick_once(&self) -> Result<Vec<(ScopeId, TickOutcome)>> {
        let engine = Arc::clone(&self.engine);
        let store = Arc::clone(&self.store);
        let results = tokio::task::spawn_blocking(move || {
            let mut store = store.lock();
            let active = store.active_scopes()?;
            for scope in engine.sync_active(&active) {
                info!(scope = %scope, "Scope no longer active, state dropped");
            }
            Ok::<_, bossfight_core::BossError>(engine.tick_all(&mut store))
        })
        .await??;

        let mut outcomes = Vec::with_capacity(results.len());
        for (scope, result) in results {
            let Ok(outcome) = result else { continue };
            if let Some(milestone) = outcome.milestone() {
                self.notify(EngineEvent::Milestone(milestone));
            }
            outcomes.push((scope, outcome));
        }
        Ok(outcomes)
    }

    fn notify(&self, event: EngineEvent) {
        if let Err(e) = events::publish(&self.events, event) {
            warn!(scope = %event.scope(), error = %e, "Engine event not delivered");
        }
    }

    // -----------------------------------------------------------------------
    // Loops
    // -----------------------------------------------------------------------

    /// Start the three system loops at the configured cadences.
    pub fn spawn(self: &Arc<Self>) -> RunningSystems {
        let timing = &self.engine.config.timing;
        let (tx, rx) = watch::channel(false);

        let voice = {
            let systems = Arc::clone(self);
            spawn_loop("voice", timing.voice_tick_interval_secs, rx.clone(), move || {
                systems.voice_tick_once();
                async {}
            })
        };
        let flush = {
            let systems = Arc::clone(self);
            spawn_loop("flush", timing.flush_interval_secs, rx.clone(), move || {
                let systems = Arc::clone(&systems);
                async move {
                    if let Err(e) = systems.flush_once().await {
                        warn!(error = %e, "Flush cycle failed");
                    }
                }
            })
        };
        let pool = {
            let systems = Arc::clone(self);
            spawn_loop("pool", timing.pool_tick_interval_secs, rx, move || {
                let systems = Arc::clone(&systems);
                async move {
                    if let Err(e) = systems.pool_tick_once().await {
                        warn!(error = %e, "Pool tick cycle failed");
                    }
                }
            })
        };

        info!(
            voice_secs = timing.voice_tick_interval_secs,
            flush_secs = timing.flush_interval_secs,
            pool_secs = timing.pool_tick_interval_secs,
            "Systems started"
        );
        RunningSystems {
            shutdown: tx,
            tasks: vec![("voice", voice), ("flush", flush), ("pool", pool)],
        }
    }

    /// Stop the loops, then credit voice and flush one last time if configured.
    ///
    /// Returns the final flush outcome, or `None` when the final flush is
    /// disabled.
    ///
    /// # Errors
    ///
    /// Returns the final flush's storage error.
    pub async fn shutdown(&self, running: RunningSystems) -> Result<Option<FlushOutcome>> {
        if running.shutdown.send(true).is_err() {
            debug!("All system loops already stopped");
        }
        for (name, mut task) in running.tasks {
            match time::timeout(self.shutdown_grace, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(system = name, error = %e, "System task failed"),
                Err(_) => {
                    task.abort();
                    warn!(system = name, "System did not stop within the grace period");
                }
            }
        }

        if !self.final_flush {
            return Ok(None);
        }
        self.voice_tick_once();
        let outcome = self.flush_once().await?;
        info!(?outcome, "Final flush complete");
        Ok(Some(outcome))
    }
}

fn spawn_loop<F, Fut>(
    name: &'static str,
    period_secs: u64,
    mut shutdown: watch::Receiver<bool>,
    mut step: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let period = Duration::from_secs(period_secs.max(1));
    tokio::spawn(async move {
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => step().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!(system = name, "System stopped");
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
