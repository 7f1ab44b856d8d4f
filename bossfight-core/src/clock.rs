//! Wall-clock source. Every component consumes time through [`Clock`];
//! none of them own it.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::types::Timestamp;

/// A source of wall-clock time.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> Timestamp;
}

/// Real system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Manually driven clock for tests and replay.
#[derive(Debug, Default)]
pub struct ManualClock {
    secs: AtomicI64,
}

impl ManualClock {
    /// Start the clock at `start`.
    #[must_use]
    pub fn new(start: Timestamp) -> Self {
        Self {
            secs: AtomicI64::new(start.0),
        }
    }

    /// Jump to `at`.
    pub fn set(&self, at: Timestamp) {
        self.secs.store(at.0, Ordering::SeqCst);
    }

    /// Move forward by `secs` and return the new time.
    pub fn advance(&self, secs: i64) -> Timestamp {
        Timestamp(self.secs.fetch_add(secs, Ordering::SeqCst) + secs)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.secs.load(Ordering::SeqCst))
    }
}
