//! Cluster-level types: bucket identity, membership snapshots, and the
//! deterministic placement oracle.

pub mod bucket;
pub mod placement;
pub mod smap;

pub use bucket::{Bck, Ns, Provider};
pub use placement::{mountpath_for, target_for};
pub use smap::{Smap, SmapOwner};
