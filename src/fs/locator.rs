//! The object locator: an in-memory handle bundling an object's identity,
//! path, and metadata.
//!
//! Locators are constructed on demand from a filesystem path, filled with
//! the attribute subsets the caller asks for, and discarded when the walking
//! step that produced them completes.

use crate::cluster::bucket::Bck;
use crate::error::{LocatorError, Result};
use crate::fs::mountpath::MountpathSet;
use serde::{Deserialize, Serialize};
use std::hash::Hasher;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::AsyncReadExt;
use twox_hash::XxHash64;

/// Checksum algorithm identifier used on the wire and in sidecars.
pub const CKSUM_XXHASH: &str = "xxhash";

/// Fill the basic file stat (size, mtime, existence).
pub const FILL_STAT: u32 = 1 << 0;
/// Fill the access time from sidecar metadata (file time fallback).
pub const FILL_ATIME: u32 = 1 << 1;
/// Fill checksum and version from sidecar metadata.
pub const FILL_CKSUM: u32 = 1 << 2;
/// Re-derive and persist the checksum when the stored one is absent.
pub const FILL_CKSUM_MISSING_RECOMPUTE: u32 = 1 << 3;
/// Fill the replica-copy flag from sidecar metadata.
pub const FILL_COPY: u32 = 1 << 4;

/// Checksum algorithm + value pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cksum {
    /// Algorithm identifier, e.g. `xxhash`.
    pub ty: String,
    /// Hex-encoded digest.
    pub value: String,
}

impl Cksum {
    /// Create an xxhash checksum from a digest.
    pub fn xxhash(digest: u64) -> Cksum {
        Cksum {
            ty: CKSUM_XXHASH.to_string(),
            value: format!("{digest:016x}"),
        }
    }
}

/// Sidecar metadata persisted next to each object (in the parallel
/// `.meta` tree).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Stored checksum, if any.
    pub cksum: Option<Cksum>,
    /// Opaque version string.
    pub version: Option<String>,
    /// Access time, nanoseconds since epoch; 0 when unknown.
    pub atime_ns: i64,
    /// Whether this entry is a replica copy rather than the object proper.
    pub is_copy: bool,
}

impl ObjectMeta {
    /// Load sidecar metadata; `Ok(None)` when no sidecar exists.
    pub async fn load(meta_fqn: &Path) -> Result<Option<ObjectMeta>> {
        match tokio::fs::read(meta_fqn).await {
            Ok(raw) => {
                let meta = bincode::deserialize(&raw).map_err(|e| LocatorError::CorruptMeta {
                    fqn: meta_fqn.to_path_buf(),
                    reason: e.to_string(),
                })?;
                Ok(Some(meta))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist sidecar metadata, creating parent directories as needed.
    pub async fn save(&self, meta_fqn: &Path) -> Result<()> {
        if let Some(parent) = meta_fqn.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let raw = bincode::serialize(self).map_err(|e| LocatorError::CorruptMeta {
            fqn: meta_fqn.to_path_buf(),
            reason: e.to_string(),
        })?;
        tokio::fs::write(meta_fqn, raw).await?;
        Ok(())
    }
}

/// Compute the xxhash checksum of a file's contents.
pub async fn compute_file_cksum(path: &Path) -> io::Result<Cksum> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = XxHash64::with_seed(0);
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.write(&buf[..n]);
    }
    Ok(Cksum::xxhash(hasher.finish()))
}

/// In-memory handle describing one stored object.
#[derive(Debug)]
pub struct ObjectLocator {
    /// Bucket identity.
    pub bck: Bck,
    /// Full object name.
    pub objname: String,
    /// Actual on-disk path this locator was built from.
    pub fqn: PathBuf,
    /// Path the local placement policy mandates for this object.
    pub hrw_fqn: PathBuf,
    /// Object size in bytes (after [`FILL_STAT`]).
    pub size: u64,
    /// Modification time (after [`FILL_STAT`]).
    pub mtime: Option<SystemTime>,
    /// Access time, nanoseconds since epoch (after [`FILL_ATIME`]).
    pub atime_ns: i64,
    /// Checksum (after [`FILL_CKSUM`] / recompute).
    pub cksum: Option<Cksum>,
    /// Version string (after [`FILL_CKSUM`]).
    pub version: Option<String>,

    exists: bool,
    is_copy: bool,
}

impl ObjectLocator {
    /// Construct a locator from an on-disk path.
    pub fn from_fqn(mpaths: &MountpathSet, fqn: &Path) -> Result<ObjectLocator> {
        let parsed = mpaths.parse_fqn(fqn)?;
        let hrw_fqn = mpaths.build_fqn(&parsed.bck, &parsed.objname)?;
        Ok(ObjectLocator {
            bck: parsed.bck,
            objname: parsed.objname,
            fqn: fqn.to_path_buf(),
            hrw_fqn,
            size: 0,
            mtime: None,
            atime_ns: 0,
            cksum: None,
            version: None,
            exists: false,
            is_copy: false,
        })
    }

    /// Fill the requested attribute subsets. Partial fill is permitted;
    /// callers request only the fields they need.
    pub async fn fill(&mut self, mpaths: &MountpathSet, flags: u32) -> Result<()> {
        match tokio::fs::metadata(&self.fqn).await {
            Ok(md) => {
                self.exists = md.is_file();
                self.size = md.len();
                self.mtime = md.modified().ok();
                if flags & FILL_ATIME != 0 {
                    // Sidecar atime below takes precedence when present.
                    if let Ok(atime) = md.accessed() {
                        self.atime_ns = systime_ns(atime);
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.exists = false;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        if flags & (FILL_ATIME | FILL_CKSUM | FILL_COPY) != 0 {
            let meta_fqn = mpaths.meta_path(&self.fqn)?;
            if let Some(meta) = ObjectMeta::load(&meta_fqn).await? {
                if flags & FILL_ATIME != 0 && meta.atime_ns != 0 {
                    self.atime_ns = meta.atime_ns;
                }
                if flags & FILL_CKSUM != 0 {
                    self.cksum = meta.cksum;
                    self.version = meta.version;
                }
                if flags & FILL_COPY != 0 {
                    self.is_copy = meta.is_copy;
                }
            }

            if flags & FILL_CKSUM_MISSING_RECOMPUTE != 0 && self.cksum.is_none() {
                let cksum = compute_file_cksum(&self.fqn).await?;
                let mut meta = ObjectMeta::load(&meta_fqn).await?.unwrap_or_default();
                meta.cksum = Some(cksum.clone());
                meta.save(&meta_fqn).await?;
                self.cksum = Some(cksum);
            }
        }
        Ok(())
    }

    /// Whether the object file exists.
    pub fn exists(&self) -> bool {
        self.exists
    }

    /// Whether this entry is a replica copy.
    pub fn is_copy(&self) -> bool {
        self.is_copy
    }

    /// Whether the object sits on a mountpath other than the one the local
    /// placement rule dictates.
    pub fn is_misplaced_locally(&self) -> bool {
        self.fqn != self.hrw_fqn
    }

    /// Canonical identity string, used as the per-object lock key.
    pub fn uname(&self) -> String {
        self.bck.make_uname(&self.objname)
    }

    /// Current metadata view of this locator, for persisting alongside a
    /// copy of the object.
    pub fn meta(&self) -> ObjectMeta {
        ObjectMeta {
            cksum: self.cksum.clone(),
            version: self.version.clone(),
            atime_ns: self.atime_ns,
            is_copy: self.is_copy,
        }
    }
}

impl std::fmt::Display for ObjectLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.bck, self.objname)
    }
}

fn systime_ns(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_nanos() as i64,
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::bucket::Provider;

    async fn fixture() -> (tempfile::TempDir, MountpathSet, Bck) {
        let dir = tempfile::tempdir().unwrap();
        let mp = dir.path().join("mp1");
        tokio::fs::create_dir_all(&mp).await.unwrap();
        let set = MountpathSet::new(vec![mp]);
        (dir, set, Bck::new("bench", Provider::Ais))
    }

    async fn put_object(set: &MountpathSet, bck: &Bck, name: &str, body: &[u8]) -> PathBuf {
        let fqn = set.build_fqn(bck, name).unwrap();
        tokio::fs::create_dir_all(fqn.parent().unwrap()).await.unwrap();
        tokio::fs::write(&fqn, body).await.unwrap();
        fqn
    }

    #[tokio::test]
    async fn test_fill_stat() {
        let (_dir, set, bck) = fixture().await;
        let fqn = put_object(&set, &bck, "a/obj", b"hello world").await;

        let mut lom = ObjectLocator::from_fqn(&set, &fqn).unwrap();
        lom.fill(&set, FILL_STAT).await.unwrap();

        assert!(lom.exists());
        assert_eq!(lom.size, 11);
        assert_eq!(lom.objname, "a/obj");
        assert!(!lom.is_misplaced_locally());
    }

    #[tokio::test]
    async fn test_fill_nonexistent_is_not_an_error() {
        let (_dir, set, bck) = fixture().await;
        let fqn = set.build_fqn(&bck, "ghost").unwrap();
        let mut lom = ObjectLocator::from_fqn(&set, &fqn).unwrap();
        lom.fill(&set, FILL_STAT).await.unwrap();
        assert!(!lom.exists());
    }

    #[tokio::test]
    async fn test_cksum_missing_recompute_persists() {
        let (_dir, set, bck) = fixture().await;
        let fqn = put_object(&set, &bck, "obj", b"payload").await;

        let mut lom = ObjectLocator::from_fqn(&set, &fqn).unwrap();
        lom.fill(&set, FILL_STAT | FILL_CKSUM | FILL_CKSUM_MISSING_RECOMPUTE)
            .await
            .unwrap();
        let computed = lom.cksum.clone().expect("checksum recomputed");
        assert_eq!(computed.ty, CKSUM_XXHASH);

        // Second locator reads the persisted sidecar without recompute.
        let mut again = ObjectLocator::from_fqn(&set, &fqn).unwrap();
        again.fill(&set, FILL_STAT | FILL_CKSUM).await.unwrap();
        assert_eq!(again.cksum, Some(computed));
    }

    #[tokio::test]
    async fn test_sidecar_meta_roundtrip() {
        let (_dir, set, bck) = fixture().await;
        let fqn = put_object(&set, &bck, "obj2", b"x").await;
        let meta_fqn = set.meta_path(&fqn).unwrap();

        let meta = ObjectMeta {
            cksum: Some(Cksum::xxhash(0xdead_beef)),
            version: Some("3".into()),
            atime_ns: 42,
            is_copy: true,
        };
        meta.save(&meta_fqn).await.unwrap();

        let mut lom = ObjectLocator::from_fqn(&set, &fqn).unwrap();
        lom.fill(&set, FILL_STAT | FILL_ATIME | FILL_CKSUM | FILL_COPY)
            .await
            .unwrap();
        assert!(lom.is_copy());
        assert_eq!(lom.atime_ns, 42);
        assert_eq!(lom.version.as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn test_corrupt_sidecar_reported() {
        let (_dir, set, bck) = fixture().await;
        let fqn = put_object(&set, &bck, "obj3", b"x").await;
        let meta_fqn = set.meta_path(&fqn).unwrap();
        tokio::fs::create_dir_all(meta_fqn.parent().unwrap()).await.unwrap();
        tokio::fs::write(&meta_fqn, b"\xff\xff\xff\xff\xff\xff\xff\xff\xff")
            .await
            .unwrap();

        let mut lom = ObjectLocator::from_fqn(&set, &fqn).unwrap();
        let err = lom.fill(&set, FILL_STAT | FILL_CKSUM).await.unwrap_err();
        assert!(err.to_string().contains("corrupt object metadata"));
    }

    #[tokio::test]
    async fn test_misplaced_detection() {
        let (_dir, set, bck) = fixture().await;
        // Single mountpath: build_fqn always picks it, so planting the
        // object under a fabricated second mountpath is not possible here;
        // instead compare against a foreign-but-parsable location.
        let fqn = put_object(&set, &bck, "obj4", b"x").await;
        let lom = ObjectLocator::from_fqn(&set, &fqn).unwrap();
        assert_eq!(lom.fqn, lom.hrw_fqn);
    }
}
