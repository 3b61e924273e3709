//! Testing utilities: an in-process target fixture for end-to-end
//! rebalance tests.
//!
//! A [`TestTarget`] is a full per-target stack — control server, inbound
//! receiver, lock registry, stats, rebalance manager — bound to loopback
//! ports and tempdir-backed mountpaths. Tests wire several of them into a
//! cluster map and drive real rebalances over real TCP.

mod reb_e2e_tests;

use crate::cluster::bucket::Bck;
use crate::cluster::smap::{Smap, SmapOwner};
use crate::config::{Config, FshcConfig, RebalanceConfig, TimeoutConfig};
use crate::error::Result;
use crate::fs::fshc::{FsHealthChecker, MountpathDispatcher};
use crate::fs::mountpath::MountpathSet;
use crate::net::server::ControlServer;
use crate::nlock::NameLocker;
use crate::reb::manager::{RebControlHandler, RebalanceManager};
use crate::stats::StatsTracker;
use crate::transport::receiver::Receiver;
use crate::types::TargetInfo;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Dispatcher that accepts every disable request.
pub struct NoopDispatcher;

impl MountpathDispatcher for NoopDispatcher {
    fn disable_mountpath(&self, _mpath: &Path, _reason: &str) -> bool {
        true
    }
}

/// Timeouts tight enough for loopback tests.
pub fn fast_timeouts() -> TimeoutConfig {
    TimeoutConfig {
        keepalive: Duration::from_millis(100),
        max_keepalive: Duration::from_millis(200),
        keepalive_retry: Duration::from_millis(20),
        default: Duration::from_secs(2),
    }
}

/// One in-process target with live control and data endpoints.
pub struct TestTarget {
    /// Target configuration.
    pub config: Arc<Config>,
    /// The rebalance manager under test.
    pub manager: Arc<RebalanceManager>,
    /// Mountpath set backing the manager.
    pub mpaths: MountpathSet,
    /// Shared per-object lock registry (the "foreground" side of tests).
    pub locker: Arc<NameLocker>,
    /// Counter tracker.
    pub stats: Arc<StatsTracker>,
    /// Published cluster-map holder.
    pub smap_owner: Arc<SmapOwner>,
    /// Descriptor with the actually bound addresses.
    pub info: TargetInfo,
    cancel: CancellationToken,
}

impl TestTarget {
    /// Spawn a target under `base/<id>` with `mountpath_count` mountpaths.
    pub async fn spawn(id: &str, base: &Path, mountpath_count: usize) -> Result<TestTarget> {
        let home = base.join(id);
        let mut mountpaths = Vec::with_capacity(mountpath_count);
        for i in 0..mountpath_count {
            let mp = home.join(format!("mp{i}"));
            tokio::fs::create_dir_all(&mp).await?;
            mountpaths.push(mp);
        }

        let cancel = CancellationToken::new();
        let locker = Arc::new(NameLocker::new());
        let stats = Arc::new(StatsTracker::new());
        let smap_owner = Arc::new(SmapOwner::new());
        let mpaths = MountpathSet::new(mountpaths.clone());

        let config = Arc::new(
            Config::new(
                id,
                "127.0.0.1:0".parse().unwrap(),
                "127.0.0.1:0".parse().unwrap(),
            )
            .with_confdir(home.join("conf"))
            .with_mountpaths(mountpaths)
            .with_timeouts(fast_timeouts())
            .with_rebalance(RebalanceConfig {
                dest_retry_time: Duration::from_millis(400),
                neighbor_start_delay: Duration::from_millis(30),
                ..Default::default()
            }),
        );

        let fshc = FsHealthChecker::spawn(
            FshcConfig {
                enabled: false,
                ..Default::default()
            },
            mpaths.clone(),
            Arc::new(NoopDispatcher),
            cancel.clone(),
        );
        let manager = Arc::new(RebalanceManager::new(
            config.clone(),
            locker.clone(),
            stats.clone(),
            fshc,
        ));

        let handler = Arc::new(RebControlHandler::new(
            config.target_id.clone(),
            manager.xactions(),
            smap_owner.clone(),
        ));
        let control = ControlServer::new(config.control_addr, handler, cancel.clone());
        let (control_addr, _) = control.bind().await?;

        let receiver = Receiver::new(mpaths.clone(), locker.clone(), stats.clone(), cancel.clone());
        let (data_addr, _) = receiver.bind(config.data_addr).await?;

        let info = TargetInfo::new(config.target_id.clone(), control_addr, data_addr);
        Ok(TestTarget {
            config,
            manager,
            mpaths,
            locker,
            stats,
            smap_owner,
            info,
            cancel,
        })
    }

    /// Write a well-placed object with the given body.
    pub async fn put_object(&self, bck: &Bck, name: &str, body: &[u8]) -> Result<PathBuf> {
        let fqn = self.mpaths.build_fqn(bck, name)?;
        if let Some(parent) = fqn.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&fqn, body).await?;
        Ok(fqn)
    }

    /// Whether the object is present (committed) on this target.
    pub async fn has_object(&self, bck: &Bck, name: &str) -> bool {
        match self.mpaths.build_fqn(bck, name) {
            Ok(fqn) => tokio::fs::metadata(&fqn).await.is_ok(),
            Err(_) => false,
        }
    }

    /// Stop the target's servers.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for TestTarget {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Build and publish a cluster map over the given targets.
pub fn make_smap(version: u64, targets: &[&TestTarget]) -> Arc<Smap> {
    let smap = Arc::new(Smap::new(version, targets.iter().map(|t| t.info.clone())));
    for t in targets {
        t.smap_owner.publish(smap.clone());
    }
    smap
}

/// Install a test log subscriber once; later calls are no-ops. Honors
/// `RUST_LOG`.
#[cfg(test)]
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll until the condition holds, up to `timeout`.
pub async fn wait_for<F>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
