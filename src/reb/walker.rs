//! Mountpath walkers: one task per (mountpath, namespace class).
//!
//! A global walker streams every misplaced object to its new owner; a
//! local walker copies locally misplaced objects to the mountpath the
//! local placement rule mandates. Walkers are independent; no cross-walker
//! ordering exists, and entries are processed in directory order.

use crate::cluster::placement::target_for;
use crate::cluster::smap::Smap;
use crate::error::{Error, Result};
use crate::fs::fshc::FsHealthChecker;
use crate::fs::locator::{ObjectLocator, ObjectMeta};
use crate::fs::locator::{FILL_ATIME, FILL_CKSUM, FILL_CKSUM_MISSING_RECOMPUTE, FILL_COPY, FILL_STAT};
use crate::fs::mountpath::{ContentClass, MountpathSet};
use crate::fs::throttle::is_throttle;
use crate::mem::BufferPool;
use crate::nlock::NameLocker;
use crate::reb::xaction::RebalanceXact;
use crate::transport::bundle::{PendingCounter, SendCallback, SendJob, SendToken, StreamBundle};
use crate::transport::header::ObjectHeader;
use crate::types::TargetId;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, error, info};

/// Per-walker moved-object accumulators, incremented only on confirmed
/// success. Shared with send-completion callbacks, hence atomic.
#[derive(Debug, Default)]
pub struct MoveCounters {
    objects: AtomicI64,
    bytes: AtomicI64,
}

impl MoveCounters {
    /// Record one successfully moved object of `size` bytes.
    pub fn add(&self, size: i64) {
        self.objects.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(size, Ordering::Relaxed);
    }

    /// Objects moved so far.
    pub fn objects(&self) -> i64 {
        self.objects.load(Ordering::Relaxed)
    }

    /// Bytes moved so far.
    pub fn bytes(&self) -> i64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

/// Whether a traversal I/O error stops the walker; a vanished entry is a
/// benign race and the walk continues.
fn walk_err_reportable(e: &io::Error) -> bool {
    e.kind() != io::ErrorKind::NotFound
}

fn is_not_found(e: &Error) -> bool {
    matches!(e, Error::Io(ioe) if ioe.kind() == io::ErrorKind::NotFound)
}

/// Walker streaming misplaced objects to their new owners.
pub struct GlobalWalker {
    mpath: PathBuf,
    root: PathBuf,
    mpaths: MountpathSet,
    smap: Arc<Smap>,
    self_id: TargetId,
    xact: Arc<RebalanceXact>,
    bundle: Arc<StreamBundle>,
    locker: Arc<NameLocker>,
    pending: Arc<PendingCounter>,
    counters: Arc<MoveCounters>,
}

impl GlobalWalker {
    /// Bind a walker to one (mountpath, class) pair.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mpath: PathBuf,
        class: ContentClass,
        mpaths: MountpathSet,
        smap: Arc<Smap>,
        self_id: TargetId,
        xact: Arc<RebalanceXact>,
        bundle: Arc<StreamBundle>,
        locker: Arc<NameLocker>,
    ) -> Self {
        let root = MountpathSet::class_root(&mpath, class);
        Self {
            mpath,
            root,
            mpaths,
            smap,
            self_id,
            xact,
            bundle,
            locker,
            pending: Arc::new(PendingCounter::new()),
            counters: Arc::new(MoveCounters::default()),
        }
    }

    /// Traverse, stream, and join: returns (objects, bytes) moved after
    /// the traversal finished and every pending send completed.
    pub async fn run(self) -> (i64, i64) {
        match self.walk().await {
            Ok(()) => {}
            Err(e) if e.is_abort() => {
                info!(mpath = %self.mpath.display(), "stopping traversal due to: {e}");
            }
            Err(e) => {
                error!(mpath = %self.mpath.display(), error = %e, "failed to traverse");
            }
        }
        // In-flight sends complete even after an abort; their callbacks
        // release the locks and settle the counters.
        self.pending.wait_zero().await;
        (self.counters.objects(), self.counters.bytes())
    }

    async fn walk(&self) -> Result<()> {
        let mut stack = vec![self.root.clone()];
        let mut seen: u64 = 0;

        while let Some(dir) = stack.pop() {
            let mut rd = match tokio::fs::read_dir(&dir).await {
                Ok(rd) => rd,
                Err(e) if !walk_err_reportable(&e) => continue,
                Err(e) => {
                    error!(dir = %dir.display(), error = %e, "cannot read directory");
                    return Err(e.into());
                }
            };
            loop {
                if self.xact.aborted() {
                    return Err(Error::XactionAborted {
                        kind: self.xact.kind(),
                        mpath: self.mpath.clone(),
                    });
                }
                let entry = match rd.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) if !walk_err_reportable(&e) => continue,
                    Err(e) => {
                        error!(dir = %dir.display(), error = %e, "directory walk failed");
                        return Err(e.into());
                    }
                };
                seen += 1;
                if is_throttle(seen) {
                    tokio::task::yield_now().await;
                }
                let Ok(ft) = entry.file_type().await else { continue };
                if ft.is_dir() {
                    stack.push(entry.path());
                    continue;
                }
                if !ft.is_file() {
                    continue;
                }
                self.visit_file(entry.path()).await?;
            }
        }
        Ok(())
    }

    async fn visit_file(&self, fqn: PathBuf) -> Result<()> {
        let mut lom = match ObjectLocator::from_fqn(&self.mpaths, &fqn) {
            Ok(lom) => lom,
            Err(e) => {
                debug!(fqn = %fqn.display(), error = %e, "skipping entry");
                return Ok(());
            }
        };

        let dest = target_for(&lom.bck, &lom.objname, &self.smap)?;
        if dest.id == self.self_id {
            return Ok(());
        }
        debug!(obj = %lom, from = %self.self_id, to = %dest.id, "rebalancing object");

        if let Err(e) = lom
            .fill(
                &self.mpaths,
                FILL_STAT | FILL_ATIME | FILL_CKSUM | FILL_CKSUM_MISSING_RECOMPUTE,
            )
            .await
        {
            debug!(obj = %lom, error = %e, "fill failed, skipping");
            return Ok(());
        }
        if !lom.exists() || lom.is_copy() {
            return Ok(());
        }

        // Unlock happens when the send token drops, on every completion
        // path of the submission.
        let guard = self.locker.rlock(&lom.uname()).await;

        let file = match tokio::fs::File::open(&lom.fqn).await {
            Ok(file) => file,
            Err(e) => {
                drop(guard);
                error!(fqn = %lom.fqn.display(), error = %e, "failed to open file");
                return Err(e.into());
            }
        };

        let (cksum_ty, cksum_value) = match &lom.cksum {
            Some(c) => (c.ty.clone(), c.value.clone()),
            None => (String::new(), String::new()),
        };
        let hdr = ObjectHeader {
            bck: lom.bck.clone(),
            objname: lom.objname.clone(),
            is_local: !lom.bck.is_cloud(),
            originator: self.self_id.clone(),
            size: lom.size,
            atime_ns: lom.atime_ns,
            cksum_ty,
            cksum_value,
            version: lom.version.clone().unwrap_or_default(),
        };

        let token = SendToken::new(guard, self.pending.clone());
        let counters = self.counters.clone();
        let src_fqn = lom.fqn.clone();
        let src_meta = self.mpaths.meta_path(&lom.fqn)?;
        let cb: SendCallback = Box::new(move |hdr, res| match res {
            Ok(()) => {
                counters.add(hdr.size as i64);
                // The new owner has committed the object; retire the local
                // copy while the name is still read-locked.
                if let Err(e) = std::fs::remove_file(&src_fqn) {
                    debug!(fqn = %src_fqn.display(), error = %e, "source already gone");
                }
                let _ = std::fs::remove_file(&src_meta);
            }
            Err(e) => {
                error!(obj = %hdr.uname(), error = %e, "failed to send object");
            }
        });

        if let Err(e) = self.bundle.send(&dest.id, SendJob { hdr, file, token, cb }).await {
            error!(fqn = %lom.fqn.display(), error = %e, "failed to rebalance");
            return Err(e);
        }
        Ok(())
    }
}

/// Walker copying locally misplaced objects to their mandated mountpath.
pub struct LocalWalker {
    mpath: PathBuf,
    root: PathBuf,
    mpaths: MountpathSet,
    xact: Arc<RebalanceXact>,
    locker: Arc<NameLocker>,
    fshc: FsHealthChecker,
    pool: Arc<BufferPool>,
    objects_moved: i64,
    bytes_moved: i64,
}

impl LocalWalker {
    /// Bind a walker to one (mountpath, class) pair.
    pub fn new(
        mpath: PathBuf,
        class: ContentClass,
        mpaths: MountpathSet,
        xact: Arc<RebalanceXact>,
        locker: Arc<NameLocker>,
        fshc: FsHealthChecker,
        pool: Arc<BufferPool>,
    ) -> Self {
        let root = MountpathSet::class_root(&mpath, class);
        Self {
            mpath,
            root,
            mpaths,
            xact,
            locker,
            fshc,
            pool,
            objects_moved: 0,
            bytes_moved: 0,
        }
    }

    /// Traverse and copy; returns (objects, bytes) moved.
    pub async fn run(mut self) -> (i64, i64) {
        let mut buf = self.pool.alloc();
        match self.walk(&mut buf).await {
            Ok(()) => {}
            Err(e) if e.is_abort() => {
                info!(mpath = %self.mpath.display(), "stopping traversal due to: {e}");
            }
            Err(e) => {
                error!(mpath = %self.mpath.display(), error = %e, "failed to traverse");
            }
        }
        self.pool.free(buf);
        (self.objects_moved, self.bytes_moved)
    }

    async fn walk(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut stack = vec![self.root.clone()];
        let mut seen: u64 = 0;

        while let Some(dir) = stack.pop() {
            let mut rd = match tokio::fs::read_dir(&dir).await {
                Ok(rd) => rd,
                Err(e) if !walk_err_reportable(&e) => continue,
                Err(e) => {
                    error!(dir = %dir.display(), error = %e, "cannot read directory");
                    return Err(e.into());
                }
            };
            loop {
                if self.xact.aborted() {
                    return Err(Error::XactionAborted {
                        kind: self.xact.kind(),
                        mpath: self.mpath.clone(),
                    });
                }
                let entry = match rd.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) if !walk_err_reportable(&e) => continue,
                    Err(e) => {
                        error!(dir = %dir.display(), error = %e, "directory walk failed");
                        return Err(e.into());
                    }
                };
                seen += 1;
                if is_throttle(seen) {
                    tokio::task::yield_now().await;
                }
                let Ok(ft) = entry.file_type().await else { continue };
                if ft.is_dir() {
                    stack.push(entry.path());
                    continue;
                }
                if !ft.is_file() {
                    continue;
                }
                self.visit_file(entry.path(), buf).await?;
            }
        }
        Ok(())
    }

    async fn visit_file(&mut self, fqn: PathBuf, buf: &mut [u8]) -> Result<()> {
        let mut lom = match ObjectLocator::from_fqn(&self.mpaths, &fqn) {
            Ok(lom) => lom,
            Err(e) => {
                debug!(fqn = %fqn.display(), error = %e, "skipping entry");
                return Ok(());
            }
        };
        if let Err(e) = lom.fill(&self.mpaths, FILL_STAT | FILL_COPY).await {
            debug!(obj = %lom, error = %e, "fill failed, skipping");
            return Ok(());
        }
        // Local rebalance: skip replica copies and well-placed objects.
        if !lom.exists() || lom.is_copy() {
            return Ok(());
        }
        if !lom.is_misplaced_locally() {
            return Ok(());
        }
        debug!(src = %lom.fqn.display(), dst = %lom.hrw_fqn.display(), "copying misplaced object");

        if let Some(parent) = lom.hrw_fqn.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                error!(dir = %parent.display(), error = %e, "failed to create destination dir");
                self.xact.abort();
                self.fshc.on_err(&lom.hrw_fqn);
                return Ok(());
            }
        }

        // Copy instead of moving: a concurrent global rebalance may still
        // be reading the old path; the obsolete copy is the LRU's to
        // reclaim.
        let guard = self.locker.rlock(&lom.uname()).await;
        let copied = copy_object(&lom, &self.mpaths, buf).await;
        drop(guard);

        match copied {
            Ok(n) => {
                self.objects_moved += 1;
                self.bytes_moved += n as i64;
                Ok(())
            }
            Err(e) if is_not_found(&e) => {
                // The object moved or was deleted mid-copy.
                debug!(obj = %lom, "source vanished during copy, skipping");
                Ok(())
            }
            Err(e) => {
                error!(obj = %lom, error = %e, "copy failed");
                self.xact.abort();
                self.fshc.on_err(&lom.hrw_fqn);
                Err(e)
            }
        }
    }
}

/// Copy object bytes through `buf`, then carry its sidecar metadata to the
/// destination's metadata slot.
async fn copy_object(lom: &ObjectLocator, mpaths: &MountpathSet, buf: &mut [u8]) -> Result<u64> {
    let mut src = tokio::fs::File::open(&lom.fqn).await?;
    let mut dst = tokio::fs::File::create(&lom.hrw_fqn).await?;
    let mut copied: u64 = 0;
    loop {
        let n = src.read(buf).await?;
        if n == 0 {
            break;
        }
        dst.write_all(&buf[..n]).await?;
        copied += n as u64;
    }
    dst.flush().await?;

    if let Some(meta) = ObjectMeta::load(&mpaths.meta_path(&lom.fqn)?).await? {
        meta.save(&mpaths.meta_path(&lom.hrw_fqn)?).await?;
    }
    Ok(copied)
}
