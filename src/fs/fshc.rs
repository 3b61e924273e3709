//! Mountpath health checker.
//!
//! When rebalance I/O trips an error, the walker signals this checker with
//! the failing path. The checker probes the owning mountpath (re-reads the
//! offending file, reads a few random files, writes a few temporary files)
//! and asks the dispatcher to disable the mountpath once the error limit is
//! exceeded.

use crate::config::FshcConfig;
use crate::fs::mountpath::{MountpathSet, WORK_DIR};
use rand::seq::SliceRandom;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Listener notified when a mountpath is found faulty.
pub trait MountpathDispatcher: Send + Sync + 'static {
    /// Disable the mountpath; returns false when it was already disabled.
    fn disable_mountpath(&self, mpath: &Path, reason: &str) -> bool;
}

/// Handle used to signal I/O errors to the checker task.
#[derive(Debug, Clone)]
pub struct FsHealthChecker {
    tx: mpsc::Sender<PathBuf>,
    enabled: bool,
}

impl FsHealthChecker {
    /// Spawn the checker task. The task runs until `cancel` fires.
    pub fn spawn(
        config: FshcConfig,
        mpaths: MountpathSet,
        dispatcher: Arc<dyn MountpathDispatcher>,
        cancel: CancellationToken,
    ) -> FsHealthChecker {
        let (tx, rx) = mpsc::channel(100);
        let enabled = config.enabled;
        tokio::spawn(run(config, mpaths, dispatcher, rx, cancel));
        FsHealthChecker { tx, enabled }
    }

    /// Signal an I/O error on `fqn`. No-op when the checker is disabled;
    /// drops the signal when the queue is full.
    pub fn on_err(&self, fqn: &Path) {
        if !self.enabled {
            return;
        }
        if self.tx.try_send(fqn.to_path_buf()).is_err() {
            debug!(fqn = %fqn.display(), "health checker queue full, dropping signal");
        }
    }
}

async fn run(
    config: FshcConfig,
    mpaths: MountpathSet,
    dispatcher: Arc<dyn MountpathDispatcher>,
    mut rx: mpsc::Receiver<PathBuf>,
    cancel: CancellationToken,
) {
    info!("mountpath health checker running");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            fqn = rx.recv() => {
                let Some(fqn) = fqn else { return };
                let Some(mpath) = mpaths.owner_of(&fqn).cloned() else {
                    error!(fqn = %fqn.display(), "cannot resolve mountpath for failed path");
                    continue;
                };
                probe_mountpath(&config, &mpath, &fqn, dispatcher.as_ref()).await;
            }
        }
    }
}

async fn probe_mountpath(
    config: &FshcConfig,
    mpath: &Path,
    fqn: &Path,
    dispatcher: &dyn MountpathDispatcher,
) {
    let (read_errs, write_errs, accessible) = test_mountpath(config, mpath, fqn).await;
    info!(
        mpath = %mpath.display(),
        read_errs,
        write_errs,
        limit = config.error_limit,
        "mountpath probe finished"
    );

    let passed = accessible && read_errs < config.error_limit && write_errs < config.error_limit;
    if passed {
        return;
    }

    let reason = if !accessible {
        "mountpath is unavailable".to_string()
    } else {
        format!("too many errors: {read_errs} read, {write_errs} write")
    };
    error!(mpath = %mpath.display(), reason, "disabling mountpath");
    if !dispatcher.disable_mountpath(mpath, &reason) {
        warn!(mpath = %mpath.display(), "mountpath already disabled");
    }
}

/// Probe one mountpath: re-read the offending file, read up to
/// `test_file_count` random files, write `test_file_count` temporary files.
async fn test_mountpath(config: &FshcConfig, mpath: &Path, fqn: &Path) -> (usize, usize, bool) {
    if tokio::fs::metadata(mpath).await.is_err() {
        return (0, 0, false);
    }

    let mut read_errs = 0;
    let mut reads = 0;

    if tokio::fs::metadata(fqn).await.map(|m| m.is_file()).unwrap_or(false) {
        reads += 1;
        if let Err(e) = try_read_file(fqn).await {
            if is_io_error(&e) {
                read_errs += 1;
            }
            warn!(fqn = %fqn.display(), error = %e, "probe re-read failed");
        }
    }

    while reads < config.test_file_count {
        reads += 1;
        match random_file(mpath).await {
            Ok(Some(victim)) => {
                if let Err(e) = try_read_file(&victim).await {
                    if is_io_error(&e) {
                        read_errs += 1;
                    }
                    warn!(fqn = %victim.display(), error = %e, "probe read failed");
                }
            }
            Ok(None) => break,
            Err(e) => {
                if is_io_error(&e) {
                    read_errs += 1;
                }
                warn!(mpath = %mpath.display(), error = %e, "probe file selection failed");
            }
        }
    }

    let mut write_errs = 0;
    for _ in 0..config.test_file_count {
        if let Err(e) = try_write_file(mpath, config.test_file_size).await {
            if is_io_error(&e) {
                write_errs += 1;
            }
            warn!(mpath = %mpath.display(), error = %e, "probe write failed");
        }
    }

    (read_errs, write_errs, true)
}

async fn try_read_file(fqn: &Path) -> io::Result<()> {
    let mut file = tokio::fs::File::open(fqn).await?;
    tokio::io::copy(&mut file, &mut tokio::io::sink()).await?;
    Ok(())
}

async fn try_write_file(mpath: &Path, size: u64) -> io::Result<()> {
    let dir = mpath.join(WORK_DIR);
    tokio::fs::create_dir_all(&dir).await?;
    let tmp = dir.join(format!("fshc-probe-{}", Uuid::new_v4()));

    let mut file = tokio::fs::File::create(&tmp).await?;
    let chunk = [0u8; 8192];
    let mut left = size;
    while left > 0 {
        let n = left.min(chunk.len() as u64) as usize;
        file.write_all(&chunk[..n]).await?;
        left -= n as u64;
    }
    file.sync_all().await?;
    drop(file);

    tokio::fs::remove_file(&tmp).await
}

/// Pick a random regular file anywhere under `root`, skipping the
/// bookkeeping trees.
async fn random_file(root: &Path) -> io::Result<Option<PathBuf>> {
    let mut dirs = vec![root.to_path_buf()];
    while let Some(dir) = dirs.pop() {
        let mut entries = Vec::new();
        let mut rd = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = rd.next_entry().await? {
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            entries.push(entry);
        }
        entries.shuffle(&mut rand::thread_rng());
        for entry in entries {
            let ft = entry.file_type().await?;
            if ft.is_file() {
                return Ok(Some(entry.path()));
            }
            if ft.is_dir() {
                dirs.push(entry.path());
            }
        }
    }
    Ok(None)
}

fn is_io_error(e: &io::Error) -> bool {
    e.kind() != io::ErrorKind::NotFound
}
