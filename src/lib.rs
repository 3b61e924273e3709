//! Cluster rebalancing engine for a distributed object store.
//!
//! When cluster membership changes, every storage target runs this engine
//! to move stored objects onto the target mandated by a deterministic
//! placement function — and, when its own mountpath set changes, to
//! relocate objects between local mountpaths.
//!
//! # Features
//!
//! - Deterministic highest-random-weight placement, consulted concurrently
//!   by every target and by foreground request routers
//! - Parallel per-mountpath walkers over the local object trees
//! - Streamed object transfer to peers with per-object acknowledgement
//! - Interlock with foreground traffic via a shared per-object lock
//!   registry
//! - Crash-persistent in-progress markers for recovery detection
//! - A cluster-wide termination barrier so an initiator concludes only
//!   after every peer has caught up
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    RebalanceManager                      │
//! │  liveness → renew activity → resync streams → marker     │
//! │        → walkers → join → finalize → barrier             │
//! └──────────────────────────────────────────────────────────┘
//!        │                    │                     │
//!        ▼                    ▼                     ▼
//! ┌─────────────┐      ┌─────────────┐      ┌──────────────┐
//! │  Placement  │      │   Walkers   │      │ StreamBundle │
//! │   (HRW)     │      │ (per mpath  │      │ (per peer)   │
//! │             │      │  x class)   │      │              │
//! └─────────────┘      └─────────────┘      └──────┬───────┘
//!                                                  │ frames + acks
//!                                           ┌──────▼───────┐
//!                                           │   Receiver   │
//!                                           │  (per peer)  │
//!                                           └──────────────┘
//! ```
//!
//! Data flow of a global rebalance: walker → per-object read lock → open
//! file → stream bundle → peer's receiver → commit under the peer's local
//! placement → per-object ack → completion callback (release lock, update
//! counters, retire the source copy).
//!
//! # Example
//!
//! ```rust,no_run
//! use ballast::prelude::*;
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! # async fn run() -> ballast::Result<()> {
//! let config = Arc::new(
//!     Config::new(
//!         "t-4f2a",
//!         "0.0.0.0:9100".parse().unwrap(),
//!         "0.0.0.0:9200".parse().unwrap(),
//!     )
//!     .with_confdir("/etc/ballast")
//!     .with_mountpaths(vec![PathBuf::from("/data/mp1"), PathBuf::from("/data/mp2")]),
//! );
//!
//! let locker = Arc::new(NameLocker::new());
//! let stats = Arc::new(StatsTracker::new());
//! # let fshc: ballast::fs::FsHealthChecker = unimplemented!();
//! let manager = RebalanceManager::new(config, locker, stats, fshc);
//!
//! // On a membership change, the daemon hands the new snapshot over:
//! # let (smap, newcomer): (Arc<Smap>, Option<&str>) = unimplemented!();
//! manager.run_global(smap, newcomer).await?;
//! # Ok(())
//! # }
//! ```

pub mod cluster;
pub mod config;
pub mod error;
pub mod fs;
pub mod mem;
pub mod net;
pub mod nlock;
pub mod reb;
pub mod stats;
pub mod testing;
pub mod transport;
pub mod types;

pub use cluster::{Bck, Ns, Provider, Smap, SmapOwner};
pub use config::{Config, FshcConfig, RebalanceConfig, TimeoutConfig};
pub use error::{Error, Result};
pub use nlock::NameLocker;
pub use reb::{RebControlHandler, RebalanceManager, XactRegistry};
pub use stats::StatsTracker;
pub use types::{HealthStatus, TargetId, TargetInfo};

/// Convenience re-exports for embedding the engine.
pub mod prelude {
    pub use crate::cluster::{Bck, Ns, Provider, Smap, SmapOwner};
    pub use crate::config::{Config, RebalanceConfig, TimeoutConfig};
    pub use crate::error::{Error, Result};
    pub use crate::nlock::NameLocker;
    pub use crate::reb::{RebControlHandler, RebalanceManager};
    pub use crate::stats::StatsTracker;
    pub use crate::types::{TargetId, TargetInfo};
}
