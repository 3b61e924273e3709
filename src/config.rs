//! Configuration for a rebalancing target.

use crate::types::{TargetId, TargetInfo};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for one storage target.
#[derive(Debug, Clone)]
pub struct Config {
    /// This target's stable identifier.
    pub target_id: TargetId,

    /// Address the control server binds to (health, cluster-map queries).
    pub control_addr: SocketAddr,

    /// Address the inbound object receiver binds to.
    pub data_addr: SocketAddr,

    /// Directory holding persistent state (rebalance markers).
    pub confdir: PathBuf,

    /// Local filesystem roots under which this target stores objects.
    pub mountpaths: Vec<PathBuf>,

    /// Timeout knobs shared by peer RPC and liveness probing.
    pub timeout: TimeoutConfig,

    /// Rebalance-specific knobs.
    pub rebalance: RebalanceConfig,

    /// Filesystem health checker knobs.
    pub fshc: FshcConfig,
}

impl Config {
    /// Create a configuration with the given identity and addresses.
    pub fn new(target_id: impl Into<TargetId>, control_addr: SocketAddr, data_addr: SocketAddr) -> Self {
        Self {
            target_id: target_id.into(),
            control_addr,
            data_addr,
            confdir: PathBuf::from("/etc/ballast"),
            mountpaths: Vec::new(),
            timeout: TimeoutConfig::default(),
            rebalance: RebalanceConfig::default(),
            fshc: FshcConfig::default(),
        }
    }

    /// Set the configuration directory.
    pub fn with_confdir(mut self, confdir: impl Into<PathBuf>) -> Self {
        self.confdir = confdir.into();
        self
    }

    /// Set the mountpath list.
    pub fn with_mountpaths(mut self, mountpaths: Vec<PathBuf>) -> Self {
        self.mountpaths = mountpaths;
        self
    }

    /// Set timeout knobs.
    pub fn with_timeouts(mut self, timeout: TimeoutConfig) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set rebalance knobs.
    pub fn with_rebalance(mut self, rebalance: RebalanceConfig) -> Self {
        self.rebalance = rebalance;
        self
    }

    /// This target's descriptor as peers see it.
    pub fn self_info(&self) -> TargetInfo {
        TargetInfo::new(self.target_id.clone(), self.control_addr, self.data_addr)
    }
}

/// Timeouts shared by peer RPC, liveness probing, and the barrier.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Per-call timeout for keepalive-class requests.
    pub keepalive: Duration,

    /// Upper bound for the widening per-call liveness timeout.
    pub max_keepalive: Duration,

    /// Sleep between keepalive-class retries.
    pub keepalive_retry: Duration,

    /// Default timeout for ordinary peer calls.
    pub default: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            keepalive: Duration::from_secs(2),
            max_keepalive: Duration::from_secs(4),
            keepalive_retry: Duration::from_secs(1),
            default: Duration::from_secs(30),
        }
    }
}

/// Rebalance-specific knobs.
#[derive(Debug, Clone)]
pub struct RebalanceConfig {
    /// Total liveness budget per destination target; the per-call timeout
    /// widens by x1.5 within it.
    pub dest_retry_time: Duration,

    /// Settling delay between the barrier's snapshot catch-up and its
    /// status polling, giving the peer time to notice its own rebalance.
    pub neighbor_start_delay: Duration,

    /// Depth of each per-peer send queue; submission blocks when full.
    pub send_queue_depth: usize,

    /// Size of the pooled copy buffer used by local walkers.
    pub copy_buf_size: usize,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            dest_retry_time: Duration::from_secs(120),
            neighbor_start_delay: Duration::from_secs(10),
            send_queue_depth: 64,
            copy_buf_size: 1024 * 1024,
        }
    }
}

/// Filesystem health checker knobs.
#[derive(Debug, Clone)]
pub struct FshcConfig {
    /// Whether I/O error signals trigger mountpath probing.
    pub enabled: bool,

    /// Read/write error count at which a mountpath is disabled.
    pub error_limit: usize,

    /// Number of files probed per test run.
    pub test_file_count: usize,

    /// Size of each temporary write-probe file.
    pub test_file_size: u64,
}

impl Default for FshcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            error_limit: 2,
            test_file_count: 4,
            test_file_size: 1024 * 1024,
        }
    }
}
