//! Get-from-neighbor fallback flags.
//!
//! While no rebalance runs, a foreground miss may be satisfied by an
//! out-of-band lookup on the neighbor that used to own the object. A
//! running rebalance satisfies those misses itself, so kickoff deactivates
//! the matching flag; the enclosing daemon reactivates it when appropriate.

use std::sync::atomic::{AtomicBool, Ordering};

/// One activate/deactivate flag.
#[derive(Debug)]
pub struct FallbackFlag {
    active: AtomicBool,
}

impl FallbackFlag {
    fn new() -> Self {
        Self {
            active: AtomicBool::new(true),
        }
    }

    /// Turn the fallback on.
    pub fn activate(&self) {
        self.active.store(true, Ordering::Release);
    }

    /// Turn the fallback off.
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Whether the fallback is currently active.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// The two fallback flags, one per rebalance kind.
#[derive(Debug)]
pub struct NeighborFallback {
    /// Fallback disabled by a running global rebalance.
    pub global: FallbackFlag,
    /// Fallback disabled by a running local rebalance.
    pub local: FallbackFlag,
}

impl Default for NeighborFallback {
    fn default() -> Self {
        Self {
            global: FallbackFlag::new(),
            local: FallbackFlag::new(),
        }
    }
}

impl NeighborFallback {
    /// Create with both flags active.
    pub fn new() -> Self {
        Self::default()
    }
}
