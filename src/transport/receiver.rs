//! Inbound object receiver.
//!
//! Every target listens on its data address for frames from peer bundles.
//! Each frame is verified against the stated size and checksum, committed
//! under the per-object write lock, and acknowledged with one status byte.
//! A failed object does not close the stream: the remaining body bytes are
//! drained so the connection stays framed, and a failure ack is returned.

use crate::error::{Error, NetworkError, Result};
use crate::fs::locator::{Cksum, ObjectMeta, CKSUM_XXHASH};
use crate::fs::mountpath::MountpathSet;
use crate::nlock::NameLocker;
use crate::stats::{StatsTracker, RX_COUNT, RX_ERR_COUNT, RX_SIZE};
use crate::transport::header::{decode_header, ObjectHeader, ACK_FAIL, ACK_OK, MAX_HEADER_FRAME};
use std::hash::Hasher;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use twox_hash::XxHash64;
use uuid::Uuid;

/// Context for one inbound object.
///
/// Rebalance-migrated objects keep the originator's version verbatim; a
/// non-migrated PUT would be assigned a fresh version by the foreground
/// path, which does not go through this receiver.
struct RecvContext<'a> {
    hdr: &'a ObjectHeader,
    migrated: bool,
}

/// Inbound object receiver bound to the data address.
pub struct Receiver {
    mpaths: MountpathSet,
    locker: Arc<NameLocker>,
    stats: Arc<StatsTracker>,
    cancel: CancellationToken,
}

impl Receiver {
    /// Create a receiver; `cancel` stops the accept loop and connections.
    pub fn new(
        mpaths: MountpathSet,
        locker: Arc<NameLocker>,
        stats: Arc<StatsTracker>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            mpaths,
            locker,
            stats,
            cancel,
        }
    }

    /// Bind and return the listening address (useful with port 0).
    pub async fn bind(self, addr: SocketAddr) -> Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
        let listener = TcpListener::bind(addr).await.map_err(NetworkError::Io)?;
        let addr = listener.local_addr().map_err(NetworkError::Io)?;
        info!(%addr, "object receiver listening");

        let inner = Arc::new(self);
        let cancel = inner.cancel.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, peer)) => {
                                debug!(%peer, "accepted data connection");
                                let inner = inner.clone();
                                tokio::spawn(async move {
                                    if let Err(e) = inner.serve_connection(stream).await {
                                        debug!(%peer, error = %e, "data connection ended");
                                    }
                                });
                            }
                            Err(e) => error!(error = %e, "data accept failed"),
                        }
                    }
                }
            }
        });
        Ok((addr, handle))
    }

    async fn serve_connection(&self, mut stream: TcpStream) -> Result<()> {
        loop {
            let mut len_buf = [0u8; 4];
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                read = stream.read_exact(&mut len_buf) => {
                    match read {
                        Ok(_) => {}
                        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
                        Err(e) => return Err(NetworkError::Io(e).into()),
                    }
                }
            }

            let len = u32::from_be_bytes(len_buf) as usize;
            if len > MAX_HEADER_FRAME {
                return Err(NetworkError::FrameTooLarge(len).into());
            }
            let mut raw = vec![0u8; len];
            stream.read_exact(&mut raw).await.map_err(NetworkError::Io)?;
            let hdr = decode_header(&raw)?;

            let ctx = RecvContext {
                hdr: &hdr,
                migrated: true,
            };
            // Local failures ack FAIL but keep serving; only socket errors
            // tear the connection down.
            match self.recv_obj(&ctx, &mut stream).await {
                Ok(()) => {
                    self.stats.add(RX_COUNT, 1);
                    self.stats.add(RX_SIZE, hdr.size as i64);
                    stream.write_all(&[ACK_OK]).await.map_err(NetworkError::Io)?;
                }
                Err(e) => {
                    error!(obj = %hdr.uname(), from = %hdr.originator, error = %e, "inbound object failed");
                    self.stats.add(RX_ERR_COUNT, 1);
                    if let Error::Network(ne) = e {
                        return Err(ne.into());
                    }
                    stream.write_all(&[ACK_FAIL]).await.map_err(NetworkError::Io)?;
                }
            }
        }
    }

    /// Receive one object body and commit it under the local placement.
    async fn recv_obj(&self, ctx: &RecvContext<'_>, stream: &mut TcpStream) -> Result<()> {
        let hdr = ctx.hdr;
        let fqn = match self.mpaths.build_fqn(&hdr.bck, &hdr.objname) {
            Ok(fqn) => fqn,
            Err(e) => {
                // Keep the stream framed for the next object.
                drain(stream, hdr.size).await?;
                return Err(e);
            }
        };
        let work = self.work_path(&fqn).await;

        let (digest, file_result) = read_body(stream, hdr.size, work.as_deref()).await?;

        let work = match (work, file_result) {
            (Some(work), Ok(())) => work,
            (Some(work), Err(e)) => {
                let _ = tokio::fs::remove_file(&work).await;
                return Err(e);
            }
            (None, _) => {
                return Err(Error::Io(std::io::Error::other("work directory unavailable")));
            }
        };

        let cksum = Cksum::xxhash(digest);
        if hdr.cksum_ty == CKSUM_XXHASH && !hdr.cksum_value.is_empty() && hdr.cksum_value != cksum.value
        {
            let _ = tokio::fs::remove_file(&work).await;
            return Err(Error::BadChecksum {
                objname: hdr.objname.clone(),
                expected: hdr.cksum_value.clone(),
                computed: cksum.value,
            });
        }

        // Commit: metadata from the header applies to the new local object.
        let _wlock = self.locker.wlock(&hdr.uname()).await;

        if let Some(parent) = fqn.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let meta = ObjectMeta {
            cksum: Some(cksum),
            version: if ctx.migrated && !hdr.version.is_empty() {
                Some(hdr.version.clone())
            } else {
                None
            },
            atime_ns: hdr.atime_ns,
            is_copy: false,
        };
        meta.save(&self.mpaths.meta_path(&fqn)?).await?;
        tokio::fs::rename(&work, &fqn).await?;

        debug!(obj = %hdr.uname(), from = %hdr.originator, size = hdr.size, "object received");
        Ok(())
    }

    /// Allocate a unique work-file path on the destination mountpath;
    /// `None` when the work directory cannot be created.
    async fn work_path(&self, fqn: &std::path::Path) -> Option<PathBuf> {
        let dir = self.mpaths.work_dir(fqn).ok()?;
        tokio::fs::create_dir_all(&dir).await.ok()?;
        Some(dir.join(format!("rx-{}", Uuid::new_v4())))
    }
}

/// Stream exactly `size` body bytes from the socket, hashing as they pass.
///
/// Socket errors are fatal (`Err`); local file errors are carried in the
/// second slot while the remaining body is drained, keeping the stream
/// framed for the next object.
async fn read_body(
    stream: &mut TcpStream,
    size: u64,
    work: Option<&std::path::Path>,
) -> Result<(u64, Result<()>)> {
    let mut file = match work {
        Some(path) => match tokio::fs::File::create(path).await {
            Ok(f) => Some(f),
            Err(e) => {
                drain(stream, size).await?;
                return Ok((0, Err(e.into())));
            }
        },
        None => {
            drain(stream, size).await?;
            return Ok((0, Err(Error::Io(std::io::Error::other("no work file")))));
        }
    };

    let mut hasher = XxHash64::with_seed(0);
    let mut buf = vec![0u8; 64 * 1024];
    let mut left = size;
    let mut file_err: Option<Error> = None;

    while left > 0 {
        let want = left.min(buf.len() as u64) as usize;
        let n = stream
            .read(&mut buf[..want])
            .await
            .map_err(NetworkError::Io)?;
        if n == 0 {
            return Err(NetworkError::ConnectionClosed.into());
        }
        left -= n as u64;
        hasher.write(&buf[..n]);

        if file_err.is_none() {
            if let Some(f) = file.as_mut() {
                if let Err(e) = f.write_all(&buf[..n]).await {
                    file_err = Some(e.into());
                    file = None;
                }
            }
        }
    }

    if let Some(f) = file.as_mut() {
        f.flush().await.map_err(Error::Io)?;
    }

    match file_err {
        Some(e) => Ok((hasher.finish(), Err(e))),
        None => Ok((hasher.finish(), Ok(()))),
    }
}

/// Consume and discard `size` bytes from the socket.
async fn drain(stream: &mut TcpStream, size: u64) -> Result<()> {
    let copied = tokio::io::copy(&mut stream.take(size), &mut tokio::io::sink())
        .await
        .map_err(NetworkError::Io)?;
    if copied != size {
        return Err(NetworkError::ConnectionClosed.into());
    }
    Ok(())
}
