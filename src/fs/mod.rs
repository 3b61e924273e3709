//! Local filesystem layer: mountpaths, object paths, the object locator,
//! and the mountpath health checker.

pub mod fshc;
pub mod locator;
pub mod mountpath;
pub mod throttle;

pub use fshc::{FsHealthChecker, MountpathDispatcher};
pub use locator::{Cksum, ObjectLocator, ObjectMeta};
pub use mountpath::{ContentClass, MountpathSet, ParsedFqn};
