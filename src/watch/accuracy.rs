// src/watch/accuracy.rs

//! Estimate of the filesystem's timestamp resolution.
//!
//! Starts at the coarsest assumption (1000 ms) and narrows to 100, 10 or 1 ms
//! as soon as a modification time is observed that is not a multiple of the
//! current value: the new value is the largest step that divides the mtime.
//! It never widens again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::types::Timestamp;

pub const COARSEST_GRANULARITY: Timestamp = 1000;

#[derive(Debug)]
pub struct AccuracyTracker {
    granularity: AtomicU64,
}

impl Default for AccuracyTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl AccuracyTracker {
    pub fn new() -> Self {
        Self {
            granularity: AtomicU64::new(COARSEST_GRANULARITY),
        }
    }

    /// Current granularity in ms: one of 1, 10, 100, 1000.
    pub fn granularity(&self) -> Timestamp {
        self.granularity.load(Ordering::Relaxed)
    }

    /// Refine the estimate from an observed modification time.
    pub fn observe(&self, modified: SystemTime) {
        let Ok(since_epoch) = modified.duration_since(UNIX_EPOCH) else {
            return;
        };
        let candidate = if since_epoch.subsec_nanos() % 1_000_000 != 0 {
            1
        } else {
            granularity_of(since_epoch.as_millis() as Timestamp)
        };
        self.granularity.fetch_min(candidate, Ordering::Relaxed);
    }

    /// Latest point in time a write with this raw mtime could have happened.
    pub fn pad(&self, mtime: Timestamp) -> Timestamp {
        mtime.saturating_add(self.granularity())
    }
}

/// Largest of 1000, 100, 10 and 1 that divides `ms`.
fn granularity_of(ms: Timestamp) -> Timestamp {
    if ms % 10 != 0 {
        1
    } else if ms % 100 != 0 {
        10
    } else if ms % 1000 != 0 {
        100
    } else {
        COARSEST_GRANULARITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    fn at(ms: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(ms)
    }

    #[test]
    fn starts_coarse() {
        let tracker = AccuracyTracker::new();
        assert_eq!(tracker.granularity(), 1000);
        assert_eq!(tracker.pad(5000), 6000);
    }

    #[test]
    fn narrows_by_observed_precision() {
        let tracker = AccuracyTracker::new();
        tracker.observe(at(2000));
        assert_eq!(tracker.granularity(), 1000);
        tracker.observe(at(2500));
        assert_eq!(tracker.granularity(), 100);
        tracker.observe(at(2510));
        assert_eq!(tracker.granularity(), 10);
        tracker.observe(at(2511));
        assert_eq!(tracker.granularity(), 1);
    }

    #[test]
    fn sub_millisecond_mtime_means_finest() {
        let tracker = AccuracyTracker::new();
        tracker.observe(UNIX_EPOCH + Duration::from_nanos(2_000_000_001));
        assert_eq!(tracker.granularity(), 1);
    }

    #[test]
    fn never_widens() {
        let tracker = AccuracyTracker::new();
        tracker.observe(at(1230));
        assert_eq!(tracker.granularity(), 10);
        tracker.observe(at(5000));
        assert_eq!(tracker.granularity(), 10);
        tracker.observe(at(5300));
        assert_eq!(tracker.granularity(), 10);
    }

    proptest! {
        #[test]
        fn granularity_is_monotonic(times in proptest::collection::vec(0u64..10_000_000_000, 1..50)) {
            let tracker = AccuracyTracker::new();
            let mut previous = tracker.granularity();
            for t in times {
                tracker.observe(at(t));
                let current = tracker.granularity();
                prop_assert!(current <= previous);
                prop_assert!([1, 10, 100, 1000].contains(&current));
                prop_assert_eq!(t % current, 0);
                previous = current;
            }
        }
    }
}
