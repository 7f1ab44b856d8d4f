//! # Bossfight Core Library
//!
//! Activity aggregation and decaying-score engine behind the recurring
//! "boss fight" mechanic of a community application.
//!
//! Independent signal sources are folded into one bounded damage value per
//! participant per day and applied against a shared pool (the boss HP):
//!
//! - **Live counters**: high-frequency, lock-protected in-memory deltas
//!   ([`live::LiveCounterStore`])
//! - **Cooldown gate**: throttles message counting ([`cooldown::MessageCooldownGate`])
//! - **Voice presence**: per-tick crediting with idle decay ([`voice::VoicePresenceTracker`])
//! - **Flush**: drains a counter generation into SQLite ([`flush::FlushScheduler`])
//! - **Score**: diminishing-returns logarithmic damage ([`score::damage`])
//! - **Pool damage**: watermark-driven HP ticks with one-shot milestones
//!   ([`pool::PoolDamageEngine`])
//!
//! ## Data flow
//!
//! ```text
//! activity ─▶ Ingest ─▶ LiveCounterStore ─(60s flush)─▶ daily_stats
//!                                                        │
//!                       milestones ◀─(30s pool tick)─────┘
//! ```

#![deny(clippy::unwrap_used)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod clock;
pub mod config;
pub mod cooldown;
pub mod engine;
pub mod error;
pub mod flush;
pub mod guard;
pub mod ingest;
pub mod ledger;
pub mod live;
pub mod metrics;
pub mod milestone;
pub mod persistence;
pub mod pool;
pub mod registry;
pub mod score;
pub mod types;
pub mod voice;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::BossConfig;
pub use engine::Engine;
pub use error::BossError;
pub use types::*;
