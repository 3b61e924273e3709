//! Per-target rebalance orchestration.
//!
//! The manager owns the persistent markers, the outbound stream bundle,
//! the activity registry, and the walker fan-out for both rebalance kinds.

use crate::cluster::smap::{Smap, SmapOwner};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fs::fshc::FsHealthChecker;
use crate::fs::mountpath::{ContentClass, MountpathSet};
use crate::mem::BufferPool;
use crate::net::message::Message;
use crate::net::server::ControlHandler;
use crate::nlock::NameLocker;
use crate::reb::barrier::{ping_target, poll_rebalancing_done};
use crate::reb::neighbor::NeighborFallback;
use crate::reb::walker::{GlobalWalker, LocalWalker};
use crate::reb::xaction::{XactRegistry, KIND_GLOBAL, KIND_LOCAL};
use crate::stats::{
    StatsTracker, REB_GLOBAL_COUNT, REB_GLOBAL_SIZE, REB_LOCAL_COUNT, REB_LOCAL_SIZE,
};
use crate::transport::bundle::StreamBundle;
use crate::types::{HealthStatus, TargetId};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{error, info};

/// Marker filename of an in-progress global rebalance.
pub const GLOBAL_REB_MARKER: &str = ".global_rebalancing";
/// Marker filename of an in-progress local rebalance.
pub const LOCAL_REB_MARKER: &str = ".local_rebalancing";

/// Per-target rebalance orchestrator.
pub struct RebalanceManager {
    config: Arc<Config>,
    mpaths: MountpathSet,
    locker: Arc<NameLocker>,
    stats: Arc<StatsTracker>,
    xactions: Arc<XactRegistry>,
    gfn: Arc<NeighborFallback>,
    bundle: Arc<StreamBundle>,
    pool: Arc<BufferPool>,
    fshc: FsHealthChecker,
}

impl RebalanceManager {
    /// Create a manager for this target.
    pub fn new(
        config: Arc<Config>,
        locker: Arc<NameLocker>,
        stats: Arc<StatsTracker>,
        fshc: FsHealthChecker,
    ) -> Self {
        let mpaths = MountpathSet::new(config.mountpaths.clone());
        let bundle = Arc::new(StreamBundle::new(
            config.target_id.clone(),
            config.rebalance.send_queue_depth,
            config.timeout.default,
        ));
        let pool = Arc::new(BufferPool::new(config.rebalance.copy_buf_size));
        Self {
            config,
            mpaths,
            locker,
            stats,
            xactions: Arc::new(XactRegistry::new()),
            gfn: Arc::new(NeighborFallback::new()),
            bundle,
            pool,
            fshc,
        }
    }

    /// The activity registry (shared with the control handler).
    pub fn xactions(&self) -> Arc<XactRegistry> {
        self.xactions.clone()
    }

    /// The get-from-neighbor fallback flags.
    pub fn gfn(&self) -> Arc<NeighborFallback> {
        self.gfn.clone()
    }

    /// Whether any rebalance activity is running.
    pub fn is_rebalancing(&self) -> bool {
        self.xactions.is_rebalancing()
    }

    /// Path of the persistent marker for one rebalance kind.
    pub fn marker_path(&self, kind: &str) -> PathBuf {
        let name = match kind {
            KIND_LOCAL => LOCAL_REB_MARKER,
            _ => GLOBAL_REB_MARKER,
        };
        self.config.confdir.join(name)
    }

    /// Whether a marker of the given kind survived the last run; consulted
    /// by the enclosing daemon on startup to decide recovery actions.
    pub async fn marker_present(&self, kind: &str) -> bool {
        tokio::fs::metadata(self.marker_path(kind)).await.is_ok()
    }

    /// Write the zero-byte marker; `None` when creation failed, in which
    /// case completion must not attempt removal.
    async fn write_marker(&self, kind: &str) -> Option<PathBuf> {
        let path = self.marker_path(kind);
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                error!(marker = %path.display(), error = %e, "failed to create marker");
                return None;
            }
        }
        match tokio::fs::File::create(&path).await {
            Ok(_) => Some(path),
            Err(e) => {
                error!(marker = %path.display(), error = %e, "failed to create marker");
                None
            }
        }
    }

    async fn remove_marker(&self, path: &PathBuf) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            error!(marker = %path.display(), error = %e, "failed to remove in-progress marker");
        }
    }

    /// Run a global rebalance toward `smap`; `new_target_id` names the
    /// newly added target when the membership change was a join.
    pub async fn run_global(&self, smap: Arc<Smap>, new_target_id: Option<&str>) -> Result<()> {
        let ver = smap.version();
        info!(
            target = %self.config.target_id,
            version = ver,
            new_target = new_target_id.unwrap_or(""),
            "global rebalance requested"
        );

        // First, check that all the mapped targets are up and running;
        // rebalancing toward a missing target would create permanent
        // misplacement.
        let mut probes = JoinSet::new();
        for peer in smap.peers_of(&self.config.target_id) {
            let peer = peer.clone();
            let config = self.config.clone();
            probes.spawn(async move {
                let ok = ping_target(&config.target_id, &peer, &config).await;
                (peer, ok)
            });
        }
        let mut offline = Vec::new();
        while let Some(res) = probes.join_next().await {
            if let Ok((peer, ok)) = res {
                if !ok {
                    offline.push(peer);
                }
            }
        }
        if let Some(first) = offline.first() {
            for peer in &offline {
                error!(peer = %peer, version = ver, "not starting rebalancing: peer appears to be offline");
            }
            return Err(Error::PeerOffline {
                id: first.id.clone(),
                addr: first.control_addr.to_string(),
            });
        }

        // Admit the activity; an equal-version start collapses into the
        // running one.
        let Some(xact) = self.xactions.renew_global(ver) else {
            return Ok(());
        };

        // Foreground misses are satisfied by the running rebalance from
        // here on.
        self.gfn.global.deactivate();

        // Connections are not created on cluster-map change; match the
        // sender set to the snapshot now.
        self.bundle.resync(&smap);

        let marker = self.write_marker(KIND_GLOBAL).await;

        info!(xaction = %xact, "starting");
        let mut walkers = JoinSet::new();
        for mpath in self.mpaths.paths() {
            for class in ContentClass::ALL {
                let walker = GlobalWalker::new(
                    mpath.clone(),
                    class,
                    self.mpaths.clone(),
                    smap.clone(),
                    self.config.target_id.clone(),
                    xact.clone(),
                    self.bundle.clone(),
                    self.locker.clone(),
                );
                walkers.spawn(walker.run());
            }
        }
        let (mut objects, mut bytes) = (0i64, 0i64);
        while let Some(res) = walkers.join_next().await {
            if let Ok((o, b)) = res {
                objects += o;
                bytes += b;
            }
        }

        if objects > 0 {
            self.stats.add(REB_GLOBAL_COUNT, objects);
            self.stats.add(REB_GLOBAL_SIZE, bytes);
        }
        info!(xaction = %xact, objects, bytes, aborted = xact.aborted(), "walkers joined");

        if new_target_id == Some(self.config.target_id.as_str()) {
            info!(target = %self.config.target_id, "self is the newcomer, waiting for the cluster");
            poll_rebalancing_done(&smap, &self.config).await;
        }

        // The marker outlives the termination barrier: a crash while
        // waiting for peers still reads as "rebalance was in progress".
        if let Some(marker) = marker {
            if !xact.aborted() {
                self.remove_marker(&marker).await;
            }
        }
        xact.set_end_time(Instant::now());
        Ok(())
    }

    /// Run a local rebalance: relocate objects between mountpaths after
    /// the mountpath set changed.
    pub async fn run_local(&self) -> Result<()> {
        let Some(xact) = self.xactions.renew_local() else {
            return Ok(());
        };

        self.gfn.local.deactivate();

        let marker = self.write_marker(KIND_LOCAL).await;

        info!(
            xaction = %xact,
            runners = self.mpaths.len() * ContentClass::ALL.len(),
            "starting local rebalance"
        );
        let mut walkers = JoinSet::new();
        for mpath in self.mpaths.paths() {
            for class in ContentClass::ALL {
                let walker = LocalWalker::new(
                    mpath.clone(),
                    class,
                    self.mpaths.clone(),
                    xact.clone(),
                    self.locker.clone(),
                    self.fshc.clone(),
                    self.pool.clone(),
                );
                walkers.spawn(walker.run());
            }
        }
        let (mut objects, mut bytes) = (0i64, 0i64);
        while let Some(res) = walkers.join_next().await {
            if let Ok((o, b)) = res {
                objects += o;
                bytes += b;
            }
        }

        if let Some(marker) = marker {
            if !xact.aborted() {
                self.remove_marker(&marker).await;
            }
        }
        if objects > 0 {
            self.stats.add(REB_LOCAL_COUNT, objects);
            self.stats.add(REB_LOCAL_SIZE, bytes);
        }
        info!(xaction = %xact, objects, bytes, aborted = xact.aborted(), "walkers joined");

        xact.set_end_time(Instant::now());
        Ok(())
    }

    /// Explicit external abort of the global rebalance: sets the abort
    /// flag and clears the marker.
    pub async fn abort_global(&self) {
        let Some(xact) = self.xactions.running_global() else {
            info!("not running, nothing to abort");
            return;
        };
        xact.abort();

        let path = self.marker_path(KIND_GLOBAL);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                error!(marker = %path.display(), error = %e, "failed to remove in-progress marker");
            }
        }
    }
}

/// Control-plane handler answering health and cluster-map queries for
/// this target.
pub struct RebControlHandler {
    target_id: TargetId,
    xactions: Arc<XactRegistry>,
    smap_owner: Arc<SmapOwner>,
}

impl RebControlHandler {
    /// Create a handler over the target's registry and snapshot owner.
    pub fn new(target_id: TargetId, xactions: Arc<XactRegistry>, smap_owner: Arc<SmapOwner>) -> Self {
        Self {
            target_id,
            xactions,
            smap_owner,
        }
    }
}

impl ControlHandler for RebControlHandler {
    fn handle(&self, msg: Message) -> Option<Message> {
        match msg {
            Message::HealthQuery { .. } => Some(Message::HealthStatus(HealthStatus {
                target_id: self.target_id.clone(),
                is_rebalancing: self.xactions.is_rebalancing(),
            })),
            Message::SmapQuery => Some(Message::SmapResponse((*self.smap_owner.get()).clone())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::bucket::{Bck, Provider};
    use crate::cluster::placement::mountpath_for;
    use crate::config::{FshcConfig, RebalanceConfig, TimeoutConfig};
    use crate::types::TargetInfo;
    use std::path::Path;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct NoopDispatcher;
    impl crate::fs::fshc::MountpathDispatcher for NoopDispatcher {
        fn disable_mountpath(&self, _mpath: &Path, _reason: &str) -> bool {
            true
        }
    }

    fn manager_for(dir: &Path, mountpaths: Vec<PathBuf>) -> RebalanceManager {
        let config = Arc::new(
            Config::new(
                "self",
                "127.0.0.1:0".parse().unwrap(),
                "127.0.0.1:0".parse().unwrap(),
            )
            .with_confdir(dir.join("conf"))
            .with_mountpaths(mountpaths)
            .with_timeouts(TimeoutConfig {
                keepalive: Duration::from_millis(100),
                max_keepalive: Duration::from_millis(200),
                keepalive_retry: Duration::from_millis(20),
                default: Duration::from_millis(500),
            })
            .with_rebalance(RebalanceConfig {
                dest_retry_time: Duration::from_millis(300),
                neighbor_start_delay: Duration::from_millis(20),
                ..Default::default()
            }),
        );
        let mpaths = MountpathSet::new(config.mountpaths.clone());
        let fshc = FsHealthChecker::spawn(
            FshcConfig {
                enabled: false,
                ..Default::default()
            },
            mpaths,
            Arc::new(NoopDispatcher),
            CancellationToken::new(),
        );
        RebalanceManager::new(
            config,
            Arc::new(NameLocker::new()),
            Arc::new(StatsTracker::new()),
            fshc,
        )
    }

    async fn two_mountpaths(dir: &Path) -> Vec<PathBuf> {
        let mp1 = dir.join("mp1");
        let mp2 = dir.join("mp2");
        for mp in [&mp1, &mp2] {
            tokio::fs::create_dir_all(mp).await.unwrap();
        }
        vec![mp1, mp2]
    }

    #[tokio::test]
    async fn test_local_rebalance_moves_and_clears_marker() {
        let dir = tempfile::tempdir().unwrap();
        let mountpaths = two_mountpaths(dir.path()).await;
        let manager = manager_for(dir.path(), mountpaths.clone());

        // Plant one locally misplaced object.
        let mpaths = MountpathSet::new(mountpaths);
        let bck = Bck::new("bench", Provider::Ais);
        let name = "victim";
        let right = mountpath_for(&bck, name, mpaths.paths()).unwrap().clone();
        let wrong = mpaths.paths().iter().find(|p| **p != right).unwrap().clone();
        let fqn = MountpathSet::fqn_on(&wrong, &bck, name);
        tokio::fs::create_dir_all(fqn.parent().unwrap()).await.unwrap();
        tokio::fs::write(&fqn, b"body").await.unwrap();

        manager.run_local().await.unwrap();

        assert!(!manager.marker_present(KIND_LOCAL).await);
        assert_eq!(manager.stats.get(REB_LOCAL_COUNT), 1);
        assert_eq!(manager.stats.get(REB_LOCAL_SIZE), 4);
        let new_fqn = mpaths.build_fqn(&bck, name).unwrap();
        assert!(tokio::fs::metadata(&new_fqn).await.is_ok());
        assert!(!manager.is_rebalancing());

        // Second run is a no-op with unchanged mountpaths.
        manager.run_local().await.unwrap();
        assert_eq!(manager.stats.get(REB_LOCAL_COUNT), 1);
    }

    #[tokio::test]
    async fn test_global_aborts_without_state_change_when_peer_down() {
        let dir = tempfile::tempdir().unwrap();
        let mountpaths = two_mountpaths(dir.path()).await;
        let manager = manager_for(dir.path(), mountpaths);

        let smap = Arc::new(Smap::new(
            5,
            vec![
                TargetInfo::new(
                    "self",
                    "127.0.0.1:9100".parse().unwrap(),
                    "127.0.0.1:9200".parse().unwrap(),
                ),
                TargetInfo::new(
                    "dead",
                    "127.0.0.1:1".parse().unwrap(),
                    "127.0.0.1:1".parse().unwrap(),
                ),
            ],
        ));

        let err = manager.run_global(smap, None).await.unwrap_err();
        assert!(matches!(err, Error::PeerOffline { .. }));
        // No marker written, no activity registered.
        assert!(!manager.marker_present(KIND_GLOBAL).await);
        assert!(!manager.is_rebalancing());
    }

    #[tokio::test]
    async fn test_single_target_global_is_clean_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mountpaths = two_mountpaths(dir.path()).await;
        let manager = manager_for(dir.path(), mountpaths.clone());

        let mpaths = MountpathSet::new(mountpaths);
        let bck = Bck::new("bench", Provider::Ais);
        let fqn = mpaths.build_fqn(&bck, "obj").unwrap();
        tokio::fs::create_dir_all(fqn.parent().unwrap()).await.unwrap();
        tokio::fs::write(&fqn, b"body").await.unwrap();

        let smap = Arc::new(Smap::new(
            3,
            vec![TargetInfo::new(
                "self",
                "127.0.0.1:9100".parse().unwrap(),
                "127.0.0.1:9200".parse().unwrap(),
            )],
        ));
        manager.run_global(smap, None).await.unwrap();

        assert!(!manager.marker_present(KIND_GLOBAL).await);
        assert_eq!(manager.stats.get(REB_GLOBAL_COUNT), 0);
        assert!(!manager.is_rebalancing());
    }

    #[tokio::test]
    async fn test_abort_global_without_activity() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_for(dir.path(), Vec::new());
        manager.abort_global().await;
        assert!(!manager.is_rebalancing());
    }
}
