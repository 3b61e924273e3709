//! Outbound streaming bundle: one sender task per peer target.
//!
//! A submission carries the open file, the per-object lock guard, and a
//! completion callback. The guard and the walker's pending count travel
//! inside a [`SendToken`] whose drop is the release, so no error path can
//! leak a lock or strand the pending counter. The callback fires exactly
//! once per submission, after the peer's per-object ack (or the failure
//! that replaced it).

use crate::cluster::smap::Smap;
use crate::error::{Error, NetworkError, Result};
use crate::nlock::NameReadGuard;
use crate::transport::header::{encode_header_into, ObjectHeader, ACK_OK};
use crate::types::{TargetId, TargetInfo};
use bytes::BytesMut;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Completion callback, invoked exactly once per submission with the final
/// outcome.
pub type SendCallback = Box<dyn FnOnce(&ObjectHeader, &Result<()>) + Send + 'static>;

/// Count of submitted-but-not-completed sends for one walker.
#[derive(Debug, Default)]
pub struct PendingCounter {
    count: AtomicUsize,
    zero: Notify,
}

impl PendingCounter {
    /// Create a counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    fn inc(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    fn dec(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.zero.notify_waiters();
        }
    }

    /// Current pending count.
    pub fn get(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Wait until the count reaches zero.
    pub async fn wait_zero(&self) {
        loop {
            let notified = self.zero.notified();
            if self.get() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Ownership token moved into a submission: holds the per-object read
/// guard and one unit of the walker's pending count. Dropping it — on any
/// completion path — releases both, exactly once.
#[derive(Debug)]
pub struct SendToken {
    _guard: NameReadGuard,
    pending: Arc<PendingCounter>,
}

impl SendToken {
    /// Bind a held guard to the walker's pending counter, incrementing it.
    pub fn new(guard: NameReadGuard, pending: Arc<PendingCounter>) -> Self {
        pending.inc();
        Self {
            _guard: guard,
            pending,
        }
    }
}

impl Drop for SendToken {
    fn drop(&mut self) {
        self.pending.dec();
    }
}

/// One queued object transfer.
pub struct SendJob {
    /// Transfer header.
    pub hdr: ObjectHeader,
    /// Open source file; exactly `hdr.size` bytes are streamed from it.
    pub file: tokio::fs::File,
    /// Lock + pending token, released when the job completes.
    pub token: SendToken,
    /// Completion callback.
    pub cb: SendCallback,
}

struct PeerSender {
    tx: mpsc::Sender<SendJob>,
    handle: JoinHandle<()>,
}

/// Aggregate of outbound streams, one per peer target, indexed by ID.
///
/// Shared by all walkers of a run; `resync` is only called between runs,
/// while no walkers are submitting.
pub struct StreamBundle {
    self_id: TargetId,
    queue_depth: usize,
    ack_timeout: Duration,
    peers: parking_lot::RwLock<HashMap<TargetId, PeerSender>>,
}

impl StreamBundle {
    /// Create an empty bundle; peers are attached by [`resync`].
    ///
    /// [`resync`]: StreamBundle::resync
    pub fn new(self_id: TargetId, queue_depth: usize, ack_timeout: Duration) -> Self {
        Self {
            self_id,
            queue_depth,
            ack_timeout,
            peers: parking_lot::RwLock::new(HashMap::new()),
        }
    }

    /// Rebuild the sender set to match the snapshot. Senders for departed
    /// targets are shut down; existing queues to retained targets are kept.
    /// Must only be called while no walkers are running.
    pub fn resync(&self, smap: &Smap) {
        let mut peers = self.peers.write();
        peers.retain(|id, _| smap.contains(id));
        for peer in smap.peers_of(&self.self_id) {
            if peers.contains_key(&peer.id) {
                continue;
            }
            let (tx, rx) = mpsc::channel(self.queue_depth);
            let handle = tokio::spawn(peer_sender(peer.clone(), rx, self.ack_timeout));
            peers.insert(peer.id.clone(), PeerSender { tx, handle });
        }
        debug!(peers = peers.len(), "stream bundle resynced");
    }

    /// Queue a transfer to `dest`; blocks when the peer's queue is full
    /// (backpressure). On submission failure the job's callback and token
    /// still run their course before this returns.
    pub async fn send(&self, dest: &TargetId, job: SendJob) -> Result<()> {
        let no_stream = |dest: &TargetId| {
            Error::Network(NetworkError::ConnectionFailed {
                addr: dest.clone(),
                reason: "no stream for target".to_string(),
            })
        };
        let tx = self.peers.read().get(dest).map(|p| p.tx.clone());
        let Some(tx) = tx else {
            let SendJob { hdr, token, cb, .. } = job;
            cb(&hdr, &Err(no_stream(dest)));
            drop(token);
            return Err(no_stream(dest));
        };
        if let Err(send_err) = tx.send(job).await {
            let SendJob { hdr, token, cb, .. } = send_err.0;
            cb(&hdr, &Err(Error::Network(NetworkError::ConnectionClosed)));
            drop(token);
            return Err(NetworkError::ConnectionClosed.into());
        }
        Ok(())
    }

    /// Shut all senders down and wait for queued jobs to drain.
    pub async fn close(&self) {
        let drained: Vec<PeerSender> = {
            let mut peers = self.peers.write();
            peers.drain().map(|(_, p)| p).collect()
        };
        for peer in drained {
            drop(peer.tx);
            let _ = peer.handle.await;
        }
    }
}

async fn peer_sender(peer: TargetInfo, mut rx: mpsc::Receiver<SendJob>, ack_timeout: Duration) {
    let mut conn: Option<TcpStream> = None;
    while let Some(job) = rx.recv().await {
        let SendJob {
            hdr,
            file,
            token,
            cb,
        } = job;

        let result = send_one(&mut conn, &peer, &hdr, file, ack_timeout).await;
        if result.is_err() {
            // A broken exchange leaves the stream unframed.
            conn = None;
        }
        cb(&hdr, &result);
        drop(token);
    }
    debug!(peer = %peer, "peer sender drained");
}

async fn send_one(
    conn: &mut Option<TcpStream>,
    peer: &TargetInfo,
    hdr: &ObjectHeader,
    file: tokio::fs::File,
    ack_timeout: Duration,
) -> Result<()> {
    if conn.is_none() {
        let stream = tokio::time::timeout(ack_timeout, TcpStream::connect(peer.data_addr))
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(|e| NetworkError::ConnectionFailed {
                addr: peer.data_addr.to_string(),
                reason: e.to_string(),
            })?;
        *conn = Some(stream);
    }
    let stream = conn.as_mut().expect("connection just established");

    let mut buf = BytesMut::new();
    encode_header_into(hdr, &mut buf)?;
    stream.write_all(&buf).await.map_err(NetworkError::Io)?;

    let mut body = file.take(hdr.size);
    let copied = tokio::io::copy(&mut body, stream)
        .await
        .map_err(NetworkError::Io)?;
    if copied != hdr.size {
        return Err(Error::ShortBody {
            objname: hdr.objname.clone(),
            expected: hdr.size,
            got: copied,
        });
    }
    stream.flush().await.map_err(NetworkError::Io)?;

    let mut ack = [0u8; 1];
    tokio::time::timeout(ack_timeout, stream.read_exact(&mut ack))
        .await
        .map_err(|_| Error::Timeout)?
        .map_err(NetworkError::Io)?;

    if ack[0] != ACK_OK {
        warn!(peer = %peer, obj = %hdr.uname(), "peer rejected object");
        return Err(NetworkError::Rejected(hdr.uname()).into());
    }
    Ok(())
}
