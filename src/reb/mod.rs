//! The rebalancing core: per-target orchestration, mountpath walkers, the
//! activity registry, and the cluster-wide termination barrier.

pub mod barrier;
pub mod manager;
pub mod neighbor;
pub mod walker;
pub mod xaction;

pub use manager::{RebControlHandler, RebalanceManager};
pub use neighbor::NeighborFallback;
pub use xaction::{RebalanceXact, XactRegistry, KIND_GLOBAL, KIND_LOCAL};
