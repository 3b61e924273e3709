//! Error types for the rebalancing engine.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for rebalancing operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the rebalancing engine.
#[derive(Error, Debug)]
pub enum Error {
    /// The cluster map contains no targets.
    #[error("cluster map is empty: no targets to place objects on")]
    EmptyCluster,

    /// No mountpaths are configured on this target.
    #[error("no mountpaths configured")]
    NoMountpaths,

    /// A peer target failed its liveness probe before kickoff.
    #[error("target {id} at {addr} appears to be offline")]
    PeerOffline { id: String, addr: String },

    /// The running activity was aborted; walkers stop at the next entry.
    ///
    /// The display string intentionally carries the `xaction` token, which
    /// the walker driver uses to demote the log level to info.
    #[error("xaction {kind} aborted, path {mpath}")]
    XactionAborted { kind: &'static str, mpath: PathBuf },

    /// Object locator errors (parse, fill, metadata).
    #[error("object locator error: {0}")]
    Locator(#[from] LocatorError),

    /// Network communication errors.
    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    /// Inbound object failed checksum verification.
    #[error("bad checksum for {objname}: expected {expected}, computed {computed}")]
    BadChecksum {
        objname: String,
        expected: String,
        computed: String,
    },

    /// Inbound body length did not match the header.
    #[error("short object body for {objname}: header says {expected} bytes, got {got}")]
    ShortBody {
        objname: String,
        expected: u64,
        got: u64,
    },

    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),

    /// The operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Whether this error is the distinguished activity-abort error.
    pub fn is_abort(&self) -> bool {
        matches!(self, Error::XactionAborted { .. })
    }
}

/// Object locator errors.
#[derive(Error, Debug)]
pub enum LocatorError {
    /// The path does not belong to any configured mountpath.
    #[error("{0} is outside every configured mountpath")]
    ForeignPath(PathBuf),

    /// The path is missing the content-class or bucket components.
    #[error("cannot parse object path {0}")]
    Malformed(PathBuf),

    /// The bucket encoded in the path failed validation.
    #[error("invalid bucket in path: {0}")]
    BadBucket(String),

    /// Sidecar metadata could not be decoded.
    #[error("corrupt object metadata for {fqn}: {reason}")]
    CorruptMeta { fqn: PathBuf, reason: String },

    /// The object file vanished between listing and fill.
    #[error("object at {0} no longer exists")]
    Vanished(PathBuf),
}

/// Network communication errors.
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Connection failed.
    #[error("connection failed to {addr}: {reason}")]
    ConnectionFailed { addr: String, reason: String },

    /// Connection was closed mid-exchange.
    #[error("connection closed")]
    ConnectionClosed,

    /// The peer responded with an unexpected message kind.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(&'static str),

    /// The peer rejected an inbound object.
    #[error("peer rejected object: {0}")]
    Rejected(String),

    /// An inbound frame exceeded the size limit.
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl From<bincode::Error> for NetworkError {
    fn from(e: bincode::Error) -> Self {
        NetworkError::Serialization(e.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Network(NetworkError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_error_carries_xaction_token() {
        let err = Error::XactionAborted {
            kind: "global-rebalance",
            mpath: PathBuf::from("/data/mp1"),
        };
        assert!(err.to_string().contains("xaction"));
        assert!(err.is_abort());
    }

    #[test]
    fn test_io_conversion() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(!err.is_abort());
    }
}
