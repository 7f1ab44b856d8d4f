//! Ingestion boundary.
//!
//! Host events enter the engine here. Input is validated before anything
//! reaches the live store: negative amounts are rejected with
//! [`BossError::InvalidInput`], activity for an inactive scope is dropped
//! silently. No call blocks on I/O.

use std::collections::HashSet;
use std::sync::Arc;

use chrono_tz::Tz;
use tracing::debug;

use crate::clock::Clock;
use crate::config::BossConfig;
use crate::cooldown::MessageCooldownGate;
use crate::error::{BossError, Result};
use crate::ledger::{LedgerEntry, LedgerReason};
use crate::live::LiveCounterStore;
use crate::metrics::EngineCounters;
use crate::voice::{IdleWarning, VoicePresenceTracker};
use crate::types::{ChannelId, ScopeId, Timestamp, UserId};

/// What happened to a text message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Posted in a low-signal channel; neither counted nor refreshing.
    Excluded,
    /// Scope not active.
    Ignored,
    /// Refreshed voice presence but inside the cooldown window.
    Throttled,
    /// Counted and refreshed voice presence.
    Counted,
}

/// Entry point for host activity events.
pub struct Ingest {
    tz: Tz,
    excluded: HashSet<ChannelId>,
    live: Arc<LiveCounterStore>,
    gate: Arc<MessageCooldownGate>,
    voice: Arc<VoicePresenceTracker>,
    clock: Arc<dyn Clock>,
    counters: Arc<EngineCounters>,
}

impl std::fmt::Debug for Ingest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingest")
            .field("tz", &self.tz)
            .field("excluded", &self.excluded)
            .finish_non_exhaustive()
    }
}

impl Ingest {
    /// Wire the ingestion boundary.
    ///
    /// # Errors
    ///
    /// Returns [`BossError::Config`] for an unknown timezone.
    pub fn new(
        config: &BossConfig,
        live: Arc<LiveCounterStore>,
        gate: Arc<MessageCooldownGate>,
        voice: Arc<VoicePresenceTracker>,
        clock: Arc<dyn Clock>,
        counters: Arc<EngineCounters>,
    ) -> Result<Self> {
        Ok(Self {
            tz: config.timing.tz()?,
            excluded: config.ingest.excluded_set(),
            live,
            gate,
            voice,
            clock,
            counters,
        })
    }

    fn drop_inactive(&self, scope: ScopeId) -> bool {
        if self.live.registry().is_active(scope) {
            return false;
        }
        EngineCounters::bump(&self.counters.retired_scope_drops);
        debug!(scope = %scope, "Activity for inactive scope dropped");
        true
    }

    fn reject(&self, field: &'static str, value: i64) -> BossError {
        EngineCounters::bump(&self.counters.inputs_rejected);
        debug!(field, value, "Ingestion input rejected");
        BossError::InvalidInput { field, value }
    }

    /// A text message was posted.
    ///
    /// Any message outside an excluded channel refreshes voice presence; it
    /// is counted only if the cooldown gate lets it through.
    pub fn on_text_message(
        &self,
        scope: ScopeId,
        user: UserId,
        now: Timestamp,
        channel: ChannelId,
    ) -> MessageOutcome {
        if self.excluded.contains(&channel) {
            return MessageOutcome::Excluded;
        }
        if self.drop_inactive(scope) {
            return MessageOutcome::Ignored;
        }
        self.voice.refresh_presence(scope, user, now);
        if !self.gate.try_count_message(scope, user, now) {
            EngineCounters::bump(&self.counters.messages_throttled);
            return MessageOutcome::Throttled;
        }
        self.live.add_message(scope, user, now.day_in(self.tz));
        EngineCounters::bump(&self.counters.messages_counted);
        MessageOutcome::Counted
    }

    /// Voice presence started (`present = true`) or ended.
    ///
    /// Returns an idle warning if the final credit of an ending session
    /// started a decay episode.
    pub fn on_voice_presence_change(
        &self,
        scope: ScopeId,
        user: UserId,
        now: Timestamp,
        present: bool,
    ) -> Option<IdleWarning> {
        if present {
            if !self.voice.presence_start(scope, user, now) {
                self.drop_inactive(scope);
            }
            return None;
        }
        let report = self.voice.presence_end(scope, user, now);
        EngineCounters::add(&self.counters.voice_seconds, report.full_seconds);
        EngineCounters::add(&self.counters.voice_reduced_seconds, report.reduced_seconds);
        let warning = report.warnings.into_iter().next();
        if warning.is_some() {
            EngineCounters::bump(&self.counters.idle_warnings);
        }
        warning
    }

    /// A wager settled. `net` may be negative; `amount` may not.
    ///
    /// # Errors
    ///
    /// Returns [`BossError::InvalidInput`] for a negative amount.
    pub fn on_wager_resolved(
        &self,
        scope: ScopeId,
        user: UserId,
        amount: i64,
        net: i64,
    ) -> Result<()> {
        if amount < 0 {
            return Err(self.reject("wager_amount", amount));
        }
        if self.drop_inactive(scope) {
            return Ok(());
        }
        let day = self.clock.now().day_in(self.tz);
        self.live.add_wager(scope, user, day, amount, net);
        Ok(())
    }

    /// Tokens were spent. Feeds the damage signal and the ledger.
    ///
    /// # Errors
    ///
    /// Returns [`BossError::InvalidInput`] for a negative amount.
    pub fn on_tokens_spent(
        &self,
        scope: ScopeId,
        user: UserId,
        amount: i64,
        reason: LedgerReason,
    ) -> Result<()> {
        if amount < 0 {
            return Err(self.reject("tokens_spent", amount));
        }
        if self.drop_inactive(scope) {
            return Ok(());
        }
        let now = self.clock.now();
        self.live.add_tokens_spent(scope, user, now.day_in(self.tz), amount);
        self.live.record_ledger(LedgerEntry {
            scope,
            user,
            ts: now,
            delta: -amount,
            reason,
        });
        Ok(())
    }

    /// Tokens were earned. Ledger only; earning never deals damage.
    ///
    /// # Errors
    ///
    /// Returns [`BossError::InvalidInput`] for a negative amount.
    pub fn on_tokens_earned(
        &self,
        scope: ScopeId,
        user: UserId,
        amount: i64,
        reason: LedgerReason,
    ) -> Result<()> {
        if amount < 0 {
            return Err(self.reject("tokens_earned", amount));
        }
        if self.drop_inactive(scope) {
            return Ok(());
        }
        self.live.record_ledger(LedgerEntry {
            scope,
            user,
            ts: self.clock.now(),
            delta: amount,
            reason,
        });
        Ok(())
    }

    /// The daily ritual was completed.
    pub fn on_ritual_completed(&self, scope: ScopeId, user: UserId) {
        if self.drop_inactive(scope) {
            return;
        }
        let day = self.clock.now().day_in(self.tz);
        self.live.mark_ritual_done(scope, user, day);
    }
}
