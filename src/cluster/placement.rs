//! Deterministic highest-random-weight placement.
//!
//! `target_for` maps `(bucket, object, snapshot)` to the one target that
//! must host the object; every target computes the same answer for the same
//! snapshot. The same rule applied to the local mountpath set
//! (`mountpath_for`) defines local placement.

use crate::cluster::bucket::Bck;
use crate::cluster::smap::Smap;
use crate::error::{Error, Result};
use crate::types::TargetInfo;
use std::hash::Hasher;
use std::path::PathBuf;
use twox_hash::XxHash64;

/// Weight of one candidate for one object.
///
/// Candidate IDs are mixed into the object hash with a separator so that
/// `("ab", "c")` and `("a", "bc")` cannot collide.
fn weight(uname: &str, candidate_id: &[u8]) -> u64 {
    let mut h = XxHash64::with_seed(0);
    h.write(uname.as_bytes());
    h.write(&[0xff]);
    h.write(candidate_id);
    h.finish()
}

/// Pick the target that must host `(bck, objname)` under `smap`.
///
/// Highest-random-weight: the candidate with the maximum hash wins; equal
/// hashes are broken by lexicographic target-ID order so that every target
/// agrees. An empty snapshot is fatal to the caller.
pub fn target_for<'a>(bck: &Bck, objname: &str, smap: &'a Smap) -> Result<&'a TargetInfo> {
    let uname = bck.make_uname(objname);
    smap.targets()
        .max_by(|a, b| {
            let (wa, wb) = (weight(&uname, a.id.as_bytes()), weight(&uname, b.id.as_bytes()));
            wa.cmp(&wb).then_with(|| a.id.cmp(&b.id))
        })
        .ok_or(Error::EmptyCluster)
}

/// Pick the mountpath that must host `(bck, objname)` locally.
///
/// Same selection rule as [`target_for`], keyed by the mountpath's path.
pub fn mountpath_for<'a>(bck: &Bck, objname: &str, mountpaths: &'a [PathBuf]) -> Result<&'a PathBuf> {
    let uname = bck.make_uname(objname);
    mountpaths
        .iter()
        .max_by(|a, b| {
            let (wa, wb) = (
                weight(&uname, a.as_os_str().as_encoded_bytes()),
                weight(&uname, b.as_os_str().as_encoded_bytes()),
            );
            wa.cmp(&wb).then_with(|| a.cmp(b))
        })
        .ok_or(Error::NoMountpaths)
}
