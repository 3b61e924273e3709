//! Core types used throughout the rebalancing engine.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Stable target identifier in the cluster.
///
/// Target IDs participate in placement hashing and break highest-random-
/// weight ties by lexicographic order, so they must never be reused for a
/// different machine.
pub type TargetId = String;

/// Descriptor of a storage target in the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetInfo {
    /// Unique target identifier.
    pub id: TargetId,

    /// Address of the control channel (health, cluster-map queries).
    pub control_addr: SocketAddr,

    /// Address of the data channel (inbound object receiver).
    pub data_addr: SocketAddr,
}

impl TargetInfo {
    /// Create a new target descriptor.
    pub fn new(id: impl Into<TargetId>, control_addr: SocketAddr, data_addr: SocketAddr) -> Self {
        Self {
            id: id.into(),
            control_addr,
            data_addr,
        }
    }
}

impl std::fmt::Display for TargetInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t[{}]", self.id)
    }
}

/// Health status returned by a target's control channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Responding target's ID.
    pub target_id: TargetId,

    /// Whether a rebalance activity is currently running on the target.
    pub is_rebalancing: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_display() {
        let ti = TargetInfo::new(
            "ab12",
            "127.0.0.1:9100".parse().unwrap(),
            "127.0.0.1:9200".parse().unwrap(),
        );
        assert_eq!(ti.to_string(), "t[ab12]");
    }
}
