//! Milestone selection for pool HP thresholds.
//!
//! A bucket is announced once, in descending order, and only when the pool's
//! HP percentage (rounded up, see [`crate::PoolState::threshold_percent`])
//! is at or below it. Because HP never rises, the
//! `last_announced` watermark alone prevents re-announcement.

use serde::{Deserialize, Serialize};

use crate::types::ScopeId;

/// A threshold crossing, delivered to the milestone notifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    /// Scope whose pool crossed the threshold.
    pub scope: ScopeId,
    /// Bucket in percent of `hp_max`.
    pub bucket: u32,
    /// HP after the tick that crossed it.
    pub hp_current: i64,
    /// Starting HP.
    pub hp_max: i64,
}

/// The highest bucket `b` in `buckets` with `percent <= b < last_announced`.
///
/// `buckets` must be strictly descending. Returns `None` when nothing new
/// has been crossed. Only one bucket is returned per call; a pool that fell
/// past several thresholds at once announces the rest on later calls.
#[must_use]
pub fn next_bucket(percent: u32, last_announced: u32, buckets: &[u32]) -> Option<u32> {
    buckets
        .iter()
        .copied()
        .find(|&b| percent <= b && b < last_announced)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUCKETS: [u32; 5] = [80, 60, 40, 20, 0];

    #[test]
    fn crossing_eighty() {
        assert_eq!(next_bucket(78, 100, &BUCKETS), Some(80));
        assert_eq!(next_bucket(78, 80, &BUCKETS), None);
    }

    #[test]
    fn above_first_bucket_announces_nothing() {
        assert_eq!(next_bucket(81, 100, &BUCKETS), None);
        assert_eq!(next_bucket(100, 100, &BUCKETS), None);
    }

    #[test]
    fn exact_threshold_counts() {
        assert_eq!(next_bucket(60, 80, &BUCKETS), Some(60));
    }

    #[test]
    fn large_drop_catches_up_in_order() {
        let mut last = 100;
        let mut seen = Vec::new();
        while let Some(b) = next_bucket(15, last, &BUCKETS) {
            seen.push(b);
            last = b;
        }
        assert_eq!(seen, vec![80, 60, 40, 20]);
    }

    #[test]
    fn zero_bucket_requires_empty_pool() {
        assert_eq!(next_bucket(1, 20, &BUCKETS), None);
        assert_eq!(next_bucket(0, 20, &BUCKETS), Some(0));
        assert_eq!(next_bucket(0, 0, &BUCKETS), None);
    }
}
