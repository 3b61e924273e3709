//! Mountpaths and the on-disk object layout.
//!
//! Each mountpath hosts two disjoint content subtrees, one per namespace
//! class:
//!
//! ```text
//! <mpath>/cloud/<provider>/<bucket>/<objname...>          cloud-class
//! <mpath>/local/[@uuid#ns/]<bucket>/<objname...>          local-class (ais)
//! <mpath>/.meta/<class>/...                               sidecar metadata
//! <mpath>/.work/                                          in-flight work files
//! ```
//!
//! Walkers traverse only the two class roots, so the `.meta` and `.work`
//! trees never show up as entries.

use crate::cluster::bucket::{Bck, Ns, Provider, NS_UUID_PREFIX};
use crate::cluster::placement;
use crate::error::{LocatorError, Result};
use std::path::{Component, Path, PathBuf};

/// Directory name of the sidecar metadata tree.
pub const META_DIR: &str = ".meta";
/// Directory name of the work-file tree.
pub const WORK_DIR: &str = ".work";

/// Namespace class: two disjoint on-disk subtrees per mountpath.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentClass {
    /// Objects of cloud-provider buckets.
    Cloud,
    /// Objects of cluster-native buckets.
    Local,
}

impl ContentClass {
    /// Both classes, in walk order.
    pub const ALL: [ContentClass; 2] = [ContentClass::Cloud, ContentClass::Local];

    /// Subtree directory name.
    pub fn dir_name(&self) -> &'static str {
        match self {
            ContentClass::Cloud => "cloud",
            ContentClass::Local => "local",
        }
    }

    /// The class a bucket's objects are stored under.
    pub fn of(bck: &Bck) -> ContentClass {
        if bck.is_cloud() {
            ContentClass::Cloud
        } else {
            ContentClass::Local
        }
    }
}

/// An object path resolved back to its components.
#[derive(Debug, Clone)]
pub struct ParsedFqn {
    /// The owning mountpath.
    pub mpath: PathBuf,
    /// Namespace class of the subtree.
    pub class: ContentClass,
    /// Bucket identity encoded in the path.
    pub bck: Bck,
    /// Object name relative to the bucket, `/`-separated.
    pub objname: String,
}

/// The target's mountpath list with path construction and resolution.
#[derive(Debug, Clone, Default)]
pub struct MountpathSet {
    paths: Vec<PathBuf>,
}

impl MountpathSet {
    /// Build from configured mountpath roots.
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    /// All mountpaths.
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Number of mountpaths.
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Whether no mountpaths are configured.
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Root of one class subtree on one mountpath.
    pub fn class_root(mpath: &Path, class: ContentClass) -> PathBuf {
        mpath.join(class.dir_name())
    }

    /// Object path for `(bck, objname)` on a specific mountpath.
    pub fn fqn_on(mpath: &Path, bck: &Bck, objname: &str) -> PathBuf {
        let mut p = Self::class_root(mpath, ContentClass::of(bck));
        match ContentClass::of(bck) {
            ContentClass::Cloud => p.push(bck.provider.as_str()),
            ContentClass::Local => {
                if !bck.ns.is_global() {
                    p.push(bck.ns.uname());
                }
            }
        }
        p.push(&bck.name);
        for seg in objname.split('/') {
            p.push(seg);
        }
        p
    }

    /// Placement-mandated object path under the local mountpath policy.
    pub fn build_fqn(&self, bck: &Bck, objname: &str) -> Result<PathBuf> {
        let mpath = placement::mountpath_for(bck, objname, &self.paths)?;
        Ok(Self::fqn_on(mpath, bck, objname))
    }

    /// The mountpath owning an absolute path, if any.
    pub fn owner_of(&self, path: &Path) -> Option<&PathBuf> {
        self.paths.iter().find(|mp| path.starts_with(mp))
    }

    /// Resolve an absolute object path back to its components.
    pub fn parse_fqn(&self, fqn: &Path) -> Result<ParsedFqn> {
        let mpath = self
            .owner_of(fqn)
            .ok_or_else(|| LocatorError::ForeignPath(fqn.to_path_buf()))?
            .clone();
        let rel = fqn
            .strip_prefix(&mpath)
            .map_err(|_| LocatorError::ForeignPath(fqn.to_path_buf()))?;

        let mut comps = rel.components().filter_map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        });

        let malformed = || LocatorError::Malformed(fqn.to_path_buf());

        let class = match comps.next().ok_or_else(malformed)? {
            "cloud" => ContentClass::Cloud,
            "local" => ContentClass::Local,
            _ => return Err(malformed().into()),
        };

        let bck = match class {
            ContentClass::Cloud => {
                let provider = Provider::parse(comps.next().ok_or_else(malformed)?)
                    .filter(Provider::is_cloud)
                    .ok_or_else(|| LocatorError::BadBucket(fqn.display().to_string()))?;
                let name = comps.next().ok_or_else(malformed)?;
                Bck::new(name, provider)
            }
            ContentClass::Local => {
                let first = comps.next().ok_or_else(malformed)?;
                if first.starts_with(NS_UUID_PREFIX) {
                    let ns = Ns::parse_uname(first);
                    let name = comps.next().ok_or_else(malformed)?;
                    Bck::with_ns(name, Provider::Ais, ns)
                } else {
                    Bck::new(first, Provider::Ais)
                }
            }
        };
        bck.validate()
            .map_err(LocatorError::BadBucket)?;

        let objname = comps.collect::<Vec<_>>().join("/");
        if objname.is_empty() {
            return Err(malformed().into());
        }

        Ok(ParsedFqn {
            mpath,
            class,
            bck,
            objname,
        })
    }

    /// Sidecar metadata path for an object path.
    pub fn meta_path(&self, fqn: &Path) -> Result<PathBuf> {
        let mpath = self
            .owner_of(fqn)
            .ok_or_else(|| LocatorError::ForeignPath(fqn.to_path_buf()))?;
        let rel = fqn
            .strip_prefix(mpath)
            .map_err(|_| LocatorError::ForeignPath(fqn.to_path_buf()))?;
        Ok(mpath.join(META_DIR).join(rel))
    }

    /// Work directory on the mountpath owning `fqn`.
    pub fn work_dir(&self, fqn: &Path) -> Result<PathBuf> {
        let mpath = self
            .owner_of(fqn)
            .ok_or_else(|| LocatorError::ForeignPath(fqn.to_path_buf()))?;
        Ok(mpath.join(WORK_DIR))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set() -> MountpathSet {
        MountpathSet::new(vec![PathBuf::from("/data/mp1"), PathBuf::from("/data/mp2")])
    }

    #[test]
    fn test_fqn_cloud_layout() {
        let bck = Bck::new("imagenet", Provider::Aws);
        let fqn = MountpathSet::fqn_on(Path::new("/data/mp1"), &bck, "train/001.tar");
        assert_eq!(fqn, PathBuf::from("/data/mp1/cloud/aws/imagenet/train/001.tar"));
    }

    #[test]
    fn test_fqn_local_layout() {
        let bck = Bck::new("scratch", Provider::Ais);
        let fqn = MountpathSet::fqn_on(Path::new("/data/mp2"), &bck, "a/b/c");
        assert_eq!(fqn, PathBuf::from("/data/mp2/local/scratch/a/b/c"));

        let scoped = Bck::with_ns("scratch", Provider::Ais, Ns::new("c1", "team"));
        let fqn = MountpathSet::fqn_on(Path::new("/data/mp2"), &scoped, "a");
        assert_eq!(fqn, PathBuf::from("/data/mp2/local/@c1#team/scratch/a"));
    }

    #[test]
    fn test_parse_roundtrip() {
        let s = set();
        for bck in [
            Bck::new("imagenet", Provider::Gcp),
            Bck::new("scratch", Provider::Ais),
            Bck::with_ns("scratch", Provider::Ais, Ns::new("c1", "team")),
        ] {
            let fqn = MountpathSet::fqn_on(Path::new("/data/mp1"), &bck, "dir/obj.bin");
            let parsed = s.parse_fqn(&fqn).unwrap();
            assert_eq!(parsed.bck, bck);
            assert_eq!(parsed.objname, "dir/obj.bin");
            assert_eq!(parsed.mpath, PathBuf::from("/data/mp1"));
            assert_eq!(parsed.class, ContentClass::of(&bck));
        }
    }

    #[test]
    fn test_parse_rejects_foreign_and_malformed() {
        let s = set();
        assert!(s.parse_fqn(Path::new("/other/cloud/aws/b/o")).is_err());
        assert!(s.parse_fqn(Path::new("/data/mp1/trash/b/o")).is_err());
        assert!(s.parse_fqn(Path::new("/data/mp1/cloud/aws/bucketonly")).is_err());
        // ais is not a cloud provider, must not appear under cloud/
        assert!(s.parse_fqn(Path::new("/data/mp1/cloud/ais/b/o")).is_err());
    }

    #[test]
    fn test_meta_path_parallel_tree() {
        let s = set();
        let fqn = Path::new("/data/mp1/local/scratch/a/b");
        let meta = s.meta_path(fqn).unwrap();
        assert_eq!(meta, PathBuf::from("/data/mp1/.meta/local/scratch/a/b"));
    }

    #[test]
    fn test_build_fqn_follows_local_placement() {
        let s = set();
        let bck = Bck::new("b", Provider::Ais);
        let fqn = s.build_fqn(&bck, "obj").unwrap();
        let picked = placement::mountpath_for(&bck, "obj", s.paths()).unwrap();
        assert!(fqn.starts_with(picked));
    }
}
