//! Token ledger entries.
//!
//! Every token movement inside a scope is recorded for audit. Spending also
//! feeds the `tokens_spent` damage signal; earning never affects damage.
//! Reasons are a closed set with structured payloads so that consumers
//! match exhaustively instead of probing string keys.

use serde::{Deserialize, Serialize};

use crate::error::{BossError, Result};
use crate::types::{ScopeId, Timestamp, UserId};

/// Why tokens moved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum LedgerReason {
    /// Bought an item from the event shop.
    ShopPurchase {
        /// Shop item key.
        item: String,
    },
    /// Rerolled a quest.
    QuestReroll {
        /// Quest being replaced.
        quest_id: String,
    },
    /// Direct offering to the boss.
    Offering,
    /// Claimed a pool milestone reward.
    MilestoneClaim {
        /// Bucket that was claimed.
        bucket: u32,
    },
    /// Completed a quest.
    QuestReward {
        /// Quest that paid out.
        quest_id: String,
    },
    /// Manual moderator correction.
    AdminAdjustment {
        /// Moderator who made the change.
        moderator: UserId,
        /// Free-form note.
        note: String,
    },
}

impl LedgerReason {
    /// Short code stored alongside the JSON payload for indexed queries.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::ShopPurchase { .. } => "shop_purchase",
            Self::QuestReroll { .. } => "quest_reroll",
            Self::Offering => "offering",
            Self::MilestoneClaim { .. } => "milestone_claim",
            Self::QuestReward { .. } => "quest_reward",
            Self::AdminAdjustment { .. } => "admin_adjustment",
        }
    }

    /// Encode as a JSON payload.
    ///
    /// # Errors
    /// Returns `BossError::Serialization` if encoding fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| BossError::Serialization(e.to_string()))
    }

    /// Decode from a JSON payload.
    ///
    /// # Errors
    /// Returns `BossError::Serialization` for unknown reasons or bad payloads.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| BossError::Serialization(e.to_string()))
    }
}

/// One token movement. `delta` is negative for spending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Owning scope.
    pub scope: ScopeId,
    /// Participant.
    pub user: UserId,
    /// When the movement happened.
    pub ts: Timestamp,
    /// Signed token change.
    pub delta: i64,
    /// Why.
    pub reason: LedgerReason,
}
