//! Runtime counters for the proxy
//!
//! Counters are atomic and monotonically non-decreasing. `snapshot` returns
//! a consistent per-counter read; the counters are not mutually consistent
//! with each other.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Mutation pipeline counters
#[derive(Debug, Default)]
pub struct Metrics {
    mutated: AtomicU64,
    dropped: AtomicU64,
    duplicated: AtomicU64,
    delayed: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_mutated(&self, delta: u64) {
        if delta != 0 {
            self.mutated.fetch_add(delta, Ordering::Relaxed);
        }
    }

    pub fn inc_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_duplicated(&self, delta: u64) {
        if delta != 0 {
            self.duplicated.fetch_add(delta, Ordering::Relaxed);
        }
    }

    pub fn inc_delayed(&self) {
        self.delayed.fetch_add(1, Ordering::Relaxed);
    }

    /// Current counter values under their exact published keys.
    pub fn snapshot(&self) -> BTreeMap<&'static str, u64> {
        BTreeMap::from([
            ("mutated", self.mutated.load(Ordering::Relaxed)),
            ("dropped", self.dropped.load(Ordering::Relaxed)),
            ("duplicated", self.duplicated.load(Ordering::Relaxed)),
            ("delayed", self.delayed.load(Ordering::Relaxed)),
        ])
    }
}
