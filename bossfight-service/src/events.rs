//! Events crossing the host boundary.
//!
//! [`ActivityEvent`] is what the host reports; [`EngineEvent`] is what the
//! engine announces back (milestones and idle warnings). Outbound events
//! travel over an unbounded channel so that tick loops never wait on the
//! host.

use bossfight_core::ledger::LedgerReason;
use bossfight_core::milestone::Milestone;
use bossfight_core::voice::IdleWarning;
use bossfight_core::{ChannelId, ScopeId, Timestamp, UserId};
use tokio::sync::mpsc;

use crate::error::ServiceError;

/// Host-reported participant activity.
#[derive(Debug, Clone, PartialEq)]
pub enum ActivityEvent {
    /// A text message was posted.
    TextMessage {
        scope: ScopeId,
        user: UserId,
        channel: ChannelId,
        at: Timestamp,
    },

    /// Voice presence started or ended.
    VoicePresence {
        scope: ScopeId,
        user: UserId,
        present: bool,
        at: Timestamp,
    },

    /// A wager settled. `net` may be negative.
    WagerResolved {
        scope: ScopeId,
        user: UserId,
        amount: i64,
        net: i64,
    },

    /// Tokens were spent.
    TokensSpent {
        scope: ScopeId,
        user: UserId,
        amount: i64,
        reason: LedgerReason,
    },

    /// Tokens were earned.
    TokensEarned {
        scope: ScopeId,
        user: UserId,
        amount: i64,
        reason: LedgerReason,
    },

    /// The daily ritual was completed.
    RitualCompleted { scope: ScopeId, user: UserId },
}

impl ActivityEvent {
    /// Scope the activity belongs to.
    #[must_use]
    pub fn scope(&self) -> ScopeId {
        match self {
            Self::TextMessage { scope, .. }
            | Self::VoicePresence { scope, .. }
            | Self::WagerResolved { scope, .. }
            | Self::TokensSpent { scope, .. }
            | Self::TokensEarned { scope, .. }
            | Self::RitualCompleted { scope, .. } => *scope,
        }
    }

    /// Acting participant.
    #[must_use]
    pub fn user(&self) -> UserId {
        match self {
            Self::TextMessage { user, .. }
            | Self::VoicePresence { user, .. }
            | Self::WagerResolved { user, .. }
            | Self::TokensSpent { user, .. }
            | Self::TokensEarned { user, .. }
            | Self::RitualCompleted { user, .. } => *user,
        }
    }

    /// Short label for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TextMessage { .. } => "text_message",
            Self::VoicePresence { .. } => "voice_presence",
            Self::WagerResolved { .. } => "wager_resolved",
            Self::TokensSpent { .. } => "tokens_spent",
            Self::TokensEarned { .. } => "tokens_earned",
            Self::RitualCompleted { .. } => "ritual_completed",
        }
    }
}

/// Engine notification for the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    /// A pool crossed a milestone bucket.
    Milestone(Milestone),
    /// A voice participant started decaying.
    IdleWarning(IdleWarning),
}

impl EngineEvent {
    /// Scope the notification concerns.
    #[must_use]
    pub fn scope(&self) -> ScopeId {
        match self {
            Self::Milestone(m) => m.scope,
            Self::IdleWarning(w) => w.scope,
        }
    }
}

/// Sending half of the engine event stream.
pub type EventSender = mpsc::UnboundedSender<EngineEvent>;

/// Receiving half of the engine event stream.
pub type EventReceiver = mpsc::UnboundedReceiver<EngineEvent>;

/// Create a new engine event stream.
#[must_use]
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Deliver `event` to the host.
///
/// # Errors
///
/// Returns [`ServiceError::ChannelClosed`] if the receiver was dropped.
pub fn publish(tx: &EventSender, event: EngineEvent) -> Result<(), ServiceError> {
    tx.send(event).map_err(|_| ServiceError::ChannelClosed)
}
