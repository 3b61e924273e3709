//! Named counters emitted by the rebalancing core.
//!
//! The enclosing daemon scrapes these into its metrics exporter; the core
//! only increments them.

use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};

/// Objects moved by global rebalance.
pub const REB_GLOBAL_COUNT: &str = "reb.global.n";
/// Bytes moved by global rebalance.
pub const REB_GLOBAL_SIZE: &str = "reb.global.size";
/// Objects moved by local rebalance.
pub const REB_LOCAL_COUNT: &str = "reb.local.n";
/// Bytes moved by local rebalance.
pub const REB_LOCAL_SIZE: &str = "reb.local.size";
/// Inbound objects committed by the receiver.
pub const RX_COUNT: &str = "rx.n";
/// Inbound bytes committed by the receiver.
pub const RX_SIZE: &str = "rx.size";
/// Inbound objects that failed verification or commit.
pub const RX_ERR_COUNT: &str = "rx.err.n";

/// A monotonically increasing counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicI64,
}

impl Counter {
    /// Increment by a specific amount.
    pub fn add(&self, n: i64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Get the current value.
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Tracker of named counters, shared across the manager and receiver.
#[derive(Debug, Default)]
pub struct StatsTracker {
    counters: DashMap<&'static str, Counter>,
}

impl StatsTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `n` to the named counter, creating it on first use.
    pub fn add(&self, name: &'static str, n: i64) {
        self.counters.entry(name).or_default().add(n);
    }

    /// Current value of the named counter (0 if never incremented).
    pub fn get(&self, name: &str) -> i64 {
        self.counters.get(name).map(|c| c.get()).unwrap_or(0)
    }

    /// Snapshot of all non-zero counters.
    pub fn snapshot(&self) -> Vec<(&'static str, i64)> {
        self.counters
            .iter()
            .map(|e| (*e.key(), e.value().get()))
            .filter(|(_, v)| *v != 0)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let c = Counter::default();
        assert_eq!(c.get(), 0);
        c.add(3);
        c.add(4);
        assert_eq!(c.get(), 7);
    }

    #[test]
    fn test_tracker_named() {
        let t = StatsTracker::new();
        t.add(REB_GLOBAL_COUNT, 1);
        t.add(REB_GLOBAL_SIZE, 4096);
        t.add(REB_GLOBAL_COUNT, 1);

        assert_eq!(t.get(REB_GLOBAL_COUNT), 2);
        assert_eq!(t.get(REB_GLOBAL_SIZE), 4096);
        assert_eq!(t.get(RX_COUNT), 0);
        assert_eq!(t.snapshot().len(), 2);
    }
}
