//! Versioned cluster membership snapshots.
//!
//! A snapshot is immutable once published; the rebalancing core only reads
//! snapshots and compares their versions. Distribution is out-of-band: the
//! enclosing daemon publishes new snapshots into the [`SmapOwner`].

use crate::types::{TargetId, TargetInfo};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// A versioned description of the target set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Smap {
    /// Monotonically increasing snapshot version.
    version: u64,

    /// All targets in the cluster, keyed by ID.
    targets: HashMap<TargetId, TargetInfo>,
}

impl Smap {
    /// Build a snapshot from a target list.
    pub fn new(version: u64, targets: impl IntoIterator<Item = TargetInfo>) -> Self {
        Self {
            version,
            targets: targets.into_iter().map(|t| (t.id.clone(), t)).collect(),
        }
    }

    /// Snapshot version.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of targets.
    pub fn count_targets(&self) -> usize {
        self.targets.len()
    }

    /// Look a target up by ID.
    pub fn get(&self, id: &str) -> Option<&TargetInfo> {
        self.targets.get(id)
    }

    /// Whether the snapshot contains the target.
    pub fn contains(&self, id: &str) -> bool {
        self.targets.contains_key(id)
    }

    /// Iterate over all targets.
    pub fn targets(&self) -> impl Iterator<Item = &TargetInfo> {
        self.targets.values()
    }

    /// Iterate over all targets except the named one.
    pub fn peers_of<'a>(&'a self, self_id: &'a str) -> impl Iterator<Item = &'a TargetInfo> {
        self.targets.values().filter(move |t| t.id != self_id)
    }
}

/// Holder of the currently published snapshot.
///
/// Snapshots are immutable; publishing swaps the `Arc`, so readers keep a
/// consistent view for as long as they hold their clone.
#[derive(Debug, Default)]
pub struct SmapOwner {
    cur: RwLock<Arc<Smap>>,
}

impl SmapOwner {
    /// Create an owner with an empty version-0 snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// The currently published snapshot.
    pub fn get(&self) -> Arc<Smap> {
        self.cur.read().clone()
    }

    /// Publish a new snapshot. Versions must not go backwards; a stale
    /// publish is ignored and returns false.
    pub fn publish(&self, smap: Arc<Smap>) -> bool {
        let mut cur = self.cur.write();
        if smap.version() < cur.version() {
            return false;
        }
        *cur = smap;
        true
    }
}
