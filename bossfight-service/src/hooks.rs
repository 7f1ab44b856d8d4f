//! Integration hooks for the host bot.
//!
//! The host calls these from its own event handlers. Every hook is
//! fire-and-forget: rejected input is logged at `debug` and dropped, and no
//! hook ever blocks on storage or panics back into the host.

use std::sync::Arc;

use bossfight_core::ingest::{Ingest, MessageOutcome};
use bossfight_core::ledger::LedgerReason;
use bossfight_core::{ChannelId, ScopeId, Timestamp, UserId};
use tracing::{debug, warn};

use crate::events::{self, ActivityEvent, EngineEvent, EventSender};

/// Host-facing wrapper around [`Ingest`].
#[derive(Clone)]
pub struct Hooks {
    ingest: Arc<Ingest>,
    events: EventSender,
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("events_closed", &self.events.is_closed())
            .finish_non_exhaustive()
    }
}

impl Hooks {
    /// Wrap `ingest`; idle warnings raised on presence end go to `events`.
    #[must_use]
    pub fn new(ingest: Arc<Ingest>, events: EventSender) -> Self {
        Self { ingest, events }
    }

    /// Route one host event to the matching hook.
    pub fn dispatch(&self, event: ActivityEvent) {
        debug!(kind = event.kind(), scope = %event.scope(), user = %event.user(), "Activity");
        match event {
            ActivityEvent::TextMessage { scope, user, channel, at } => {
                self.on_text_message(scope, user, channel, at);
            }
            ActivityEvent::VoicePresence { scope, user, present, at } => {
                self.on_voice_presence(scope, user, present, at);
            }
            ActivityEvent::WagerResolved { scope, user, amount, net } => {
                self.on_wager_resolved(scope, user, amount, net);
            }
            ActivityEvent::TokensSpent { scope, user, amount, reason } => {
                self.on_tokens_spent(scope, user, amount, reason);
            }
            ActivityEvent::TokensEarned { scope, user, amount, reason } => {
                self.on_tokens_earned(scope, user, amount, reason);
            }
            ActivityEvent::RitualCompleted { scope, user } => {
                self.on_ritual_completed(scope, user);
            }
        }
    }

    /// Text message from the host's chat handler.
    pub fn on_text_message(
        &self,
        scope: ScopeId,
        user: UserId,
        channel: ChannelId,
        at: Timestamp,
    ) -> MessageOutcome {
        self.ingest.on_text_message(scope, user, at, channel)
    }

    /// Voice join (`present = true`) or leave from the host's voice handler.
    pub fn on_voice_presence(&self, scope: ScopeId, user: UserId, present: bool, at: Timestamp) {
        if let Some(warning) = self.ingest.on_voice_presence_change(scope, user, at, present) {
            self.notify(EngineEvent::IdleWarning(warning));
        }
    }

    /// Settled wager from the host's game handler.
    pub fn on_wager_resolved(&self, scope: ScopeId, user: UserId, amount: i64, net: i64) {
        if let Err(e) = self.ingest.on_wager_resolved(scope, user, amount, net) {
            debug!(scope = %scope, user = %user, error = %e, "Wager dropped");
        }
    }

    /// Token spend from the host's economy.
    pub fn on_tokens_spent(&self, scope: ScopeId, user: UserId, amount: i64, reason: LedgerReason) {
        if let Err(e) = self.ingest.on_tokens_spent(scope, user, amount, reason) {
            debug!(scope = %scope, user = %user, error = %e, "Token spend dropped");
        }
    }

    /// Token grant from the host's economy.
    pub fn on_tokens_earned(&self, scope: ScopeId, user: UserId, amount: i64, reason: LedgerReason) {
        if let Err(e) = self.ingest.on_tokens_earned(scope, user, amount, reason) {
            debug!(scope = %scope, user = %user, error = %e, "Token grant dropped");
        }
    }

    /// Ritual completion from the host's daily command.
    pub fn on_ritual_completed(&self, scope: ScopeId, user: UserId) {
        self.ingest.on_ritual_completed(scope, user);
    }

    fn notify(&self, event: EngineEvent) {
        if let Err(e) = events::publish(&self.events, event) {
            warn!(scope = %event.scope(), error = %e, "Engine event not delivered");
        }
    }
}
