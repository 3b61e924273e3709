//! Per-object lock registry shared between rebalance walkers and the
//! foreground request handlers.
//!
//! Walkers take the read side before streaming or copying an object; the
//! write side is held by foreground mutating operations. Guards are owned
//! tokens: a walker moves its guard into the send submission and the guard
//! drop — on whichever path the submission ends — is the one and only
//! release for that acquisition.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// Held read lock on one object name.
pub type NameReadGuard = OwnedRwLockReadGuard<()>;
/// Held write lock on one object name.
pub type NameWriteGuard = OwnedRwLockWriteGuard<()>;

/// Name-keyed read-write lock registry.
///
/// Keys are canonical object unames (`provider://[ns/]bucket/objname`).
/// Entries are created on first use and reused for the registry's lifetime.
#[derive(Debug, Default)]
pub struct NameLocker {
    locks: DashMap<String, Arc<RwLock<()>>>,
}

impl NameLocker {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, uname: &str) -> Arc<RwLock<()>> {
        self.locks
            .entry(uname.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    /// Acquire the read side, waiting for any writer to finish.
    pub async fn rlock(&self, uname: &str) -> NameReadGuard {
        self.entry(uname).read_owned().await
    }

    /// Acquire the write side, waiting for all readers to finish.
    pub async fn wlock(&self, uname: &str) -> NameWriteGuard {
        self.entry(uname).write_owned().await
    }

    /// Acquire the read side without waiting; `None` when a writer holds
    /// the name.
    pub fn try_rlock(&self, uname: &str) -> Option<NameReadGuard> {
        self.entry(uname).try_read_owned().ok()
    }

    /// Number of names ever locked (registry entries are reused, not
    /// evicted).
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no name was ever locked.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
