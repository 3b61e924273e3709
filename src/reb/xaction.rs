//! Rebalance activity handles and their registry.
//!
//! An activity ("xaction") is a long-running background operation with an
//! abort flag and a completion timestamp. The registry admits at most one
//! global and one local rebalance at a time and implements the renewal
//! rule: a newer cluster-map version supersedes a running activity, an
//! equal version declines so concurrent equal-version starts collapse to
//! one.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Kind string of the global rebalance activity.
pub const KIND_GLOBAL: &str = "global-rebalance";
/// Kind string of the local rebalance activity.
pub const KIND_LOCAL: &str = "local-rebalance";

/// One running (or finished) rebalance activity.
#[derive(Debug)]
pub struct RebalanceXact {
    kind: &'static str,
    smap_version: u64,
    aborted: AtomicBool,
    end_time: Mutex<Option<Instant>>,
}

impl RebalanceXact {
    fn new(kind: &'static str, smap_version: u64) -> Self {
        Self {
            kind,
            smap_version,
            aborted: AtomicBool::new(false),
            end_time: Mutex::new(None),
        }
    }

    /// Activity kind.
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Cluster-map version this activity rebalances toward (0 for local).
    pub fn smap_version(&self) -> u64 {
        self.smap_version
    }

    /// Request the activity to stop; walkers notice at the next entry.
    /// Idempotent.
    pub fn abort(&self) {
        if !self.aborted.swap(true, Ordering::AcqRel) {
            info!(xaction = %self, "abort requested");
        }
    }

    /// Whether an abort was requested.
    pub fn aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Stamp the completion time.
    pub fn set_end_time(&self, t: Instant) {
        *self.end_time.lock() = Some(t);
    }

    /// Completion time, if the activity has finished.
    pub fn end_time(&self) -> Option<Instant> {
        *self.end_time.lock()
    }

    /// Whether the activity has finished (cleanly or after abort).
    pub fn finished(&self) -> bool {
        self.end_time.lock().is_some()
    }
}

impl fmt::Display for RebalanceXact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.smap_version > 0 {
            write!(f, "{}[v{}]", self.kind, self.smap_version)
        } else {
            write!(f, "{}", self.kind)
        }
    }
}

/// Registry of the current rebalance activities.
#[derive(Debug, Default)]
pub struct XactRegistry {
    global: Mutex<Option<Arc<RebalanceXact>>>,
    local: Mutex<Option<Arc<RebalanceXact>>>,
}

impl XactRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a global rebalance toward `smap_version`.
    ///
    /// A running activity for a strictly lower version is aborted and
    /// superseded; one for the same or a higher version declines the
    /// renewal (`None`).
    pub fn renew_global(&self, smap_version: u64) -> Option<Arc<RebalanceXact>> {
        let mut cur = self.global.lock();
        if let Some(existing) = cur.as_ref() {
            if !existing.finished() {
                if existing.smap_version >= smap_version {
                    info!(
                        xaction = %existing,
                        requested = smap_version,
                        "renewal declined, already in progress"
                    );
                    return None;
                }
                existing.abort();
            }
        }
        let xact = Arc::new(RebalanceXact::new(KIND_GLOBAL, smap_version));
        *cur = Some(xact.clone());
        Some(xact)
    }

    /// Admit a local rebalance; declines while one is running.
    pub fn renew_local(&self) -> Option<Arc<RebalanceXact>> {
        let mut cur = self.local.lock();
        if let Some(existing) = cur.as_ref() {
            if !existing.finished() {
                info!(xaction = %existing, "renewal declined, already in progress");
                return None;
            }
        }
        let xact = Arc::new(RebalanceXact::new(KIND_LOCAL, 0));
        *cur = Some(xact.clone());
        Some(xact)
    }

    /// The running global activity, if any.
    pub fn running_global(&self) -> Option<Arc<RebalanceXact>> {
        self.global.lock().clone().filter(|x| !x.finished())
    }

    /// The running local activity, if any.
    pub fn running_local(&self) -> Option<Arc<RebalanceXact>> {
        self.local.lock().clone().filter(|x| !x.finished())
    }

    /// Whether any rebalance activity is currently running. Consulted by
    /// the health handler and, through it, by peers' termination barriers.
    pub fn is_rebalancing(&self) -> bool {
        self.running_global().is_some() || self.running_local().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_renew_declines_same_version() {
        let reg = XactRegistry::new();
        let first = reg.renew_global(7).expect("first renewal admitted");
        assert!(reg.renew_global(7).is_none());
        assert!(!first.aborted());
    }

    #[test]
    fn test_renew_supersedes_lower_version() {
        let reg = XactRegistry::new();
        let old = reg.renew_global(5).unwrap();
        let new = reg.renew_global(6).expect("higher version admitted");
        assert!(old.aborted());
        assert!(!new.aborted());
        assert_eq!(new.smap_version(), 6);
    }

    #[test]
    fn test_renew_declines_higher_running_version() {
        let reg = XactRegistry::new();
        let _cur = reg.renew_global(9).unwrap();
        assert!(reg.renew_global(8).is_none());
    }

    #[test]
    fn test_finished_activity_allows_renewal() {
        let reg = XactRegistry::new();
        let x = reg.renew_global(7).unwrap();
        x.set_end_time(Instant::now());
        assert!(!reg.is_rebalancing());
        assert!(reg.renew_global(7).is_some());
    }

    #[test]
    fn test_is_rebalancing_tracks_both_kinds() {
        let reg = XactRegistry::new();
        assert!(!reg.is_rebalancing());

        let l = reg.renew_local().unwrap();
        assert!(reg.is_rebalancing());
        assert!(reg.renew_local().is_none());

        l.set_end_time(Instant::now());
        assert!(!reg.is_rebalancing());
    }

    #[test]
    fn test_abort_idempotent() {
        let reg = XactRegistry::new();
        let x = reg.renew_global(3).unwrap();
        x.abort();
        x.abort();
        assert!(x.aborted());
    }
}
