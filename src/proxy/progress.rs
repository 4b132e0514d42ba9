//! Run progress counters

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Point-in-time view of a run's counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub processed: usize,
    pub valid: usize,
}

impl ProgressSnapshot {
    /// Completion percentage, rounded; an empty run counts as complete
    pub fn percent(&self) -> u32 {
        if self.total == 0 {
            return 100;
        }
        ((self.processed as f64 / self.total as f64) * 100.0).round() as u32
    }

    pub fn is_complete(&self) -> bool {
        self.processed >= self.total
    }
}

impl fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} | {}% | valid: {}",
            self.processed,
            self.total,
            self.percent(),
            self.valid
        )
    }
}

/// Counters shared by every task of one run.
///
/// Constructed per run and handed to the scheduler's hooks; safe to update
/// from any number of tasks at once.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    total: AtomicUsize,
    processed: AtomicUsize,
    valid: AtomicUsize,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        let tracker = Self::default();
        tracker.init(total);
        tracker
    }

    /// Reset all counters for a run of `total` endpoints
    pub fn init(&self, total: usize) {
        self.total.store(total, Ordering::SeqCst);
        self.processed.store(0, Ordering::SeqCst);
        self.valid.store(0, Ordering::SeqCst);
    }

    /// Record one settled endpoint and return the counters after the update
    pub fn record_completion(&self, was_valid: bool) -> ProgressSnapshot {
        let valid = if was_valid {
            self.valid.fetch_add(1, Ordering::SeqCst) + 1
        } else {
            self.valid.load(Ordering::SeqCst)
        };
        let processed = self.processed.fetch_add(1, Ordering::SeqCst) + 1;

        ProgressSnapshot {
            total: self.total.load(Ordering::SeqCst),
            processed,
            valid,
        }
    }

    pub fn report(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.total.load(Ordering::SeqCst),
            processed: self.processed.load(Ordering::SeqCst),
            valid: self.valid.load(Ordering::SeqCst),
        }
    }
}
