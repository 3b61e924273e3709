//! Object transfer header and data-plane framing.

use crate::cluster::bucket::Bck;
use crate::error::NetworkError;
use crate::types::TargetId;
use bytes::BytesMut;
use serde::{Deserialize, Serialize};

/// Upper bound for a header frame; bodies are unbounded (streamed).
pub const MAX_HEADER_FRAME: usize = 1024 * 1024;

/// Per-object acknowledgement: committed.
pub const ACK_OK: u8 = 0;
/// Per-object acknowledgement: rejected (verification or commit failed).
pub const ACK_FAIL: u8 = 1;

/// Header preceding each streamed object body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectHeader {
    /// Bucket identity.
    pub bck: Bck,

    /// Full object name.
    pub objname: String,

    /// Namespace-class flag: true for cluster-native buckets.
    pub is_local: bool,

    /// Originating target's ID.
    pub originator: TargetId,

    /// Body length in bytes; exactly this many bytes follow the header.
    pub size: u64,

    /// Access time, nanoseconds since epoch.
    pub atime_ns: i64,

    /// Checksum algorithm identifier; empty when no checksum travels.
    pub cksum_ty: String,

    /// Checksum value, hex per algorithm.
    pub cksum_value: String,

    /// Opaque version string; empty when unversioned.
    pub version: String,
}

impl ObjectHeader {
    /// Canonical identity string of the object, used as the lock key.
    pub fn uname(&self) -> String {
        self.bck.make_uname(&self.objname)
    }
}

/// Encode a header with its length prefix into `buf`.
pub fn encode_header_into(hdr: &ObjectHeader, buf: &mut BytesMut) -> Result<usize, NetworkError> {
    let size = bincode::serialized_size(hdr)? as usize;
    buf.reserve(4 + size);
    buf.extend_from_slice(&(size as u32).to_be_bytes());

    let start = buf.len();
    buf.resize(start + size, 0);
    let mut cursor = std::io::Cursor::new(&mut buf[start..]);
    bincode::serialize_into(&mut cursor, hdr)?;

    Ok(4 + size)
}

/// Decode a header from a complete payload (length prefix stripped).
pub fn decode_header(data: &[u8]) -> Result<ObjectHeader, NetworkError> {
    Ok(bincode::deserialize(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::bucket::Provider;

    #[test]
    fn test_header_roundtrip() {
        let hdr = ObjectHeader {
            bck: Bck::new("imagenet", Provider::Aws),
            objname: "train/001.tar".to_string(),
            is_local: false,
            originator: "t1".to_string(),
            size: 4096,
            atime_ns: 1_700_000_000_000_000_000,
            cksum_ty: "xxhash".to_string(),
            cksum_value: "00000000deadbeef".to_string(),
            version: "2".to_string(),
        };

        let mut buf = BytesMut::new();
        let n = encode_header_into(&hdr, &mut buf).unwrap();
        assert_eq!(n, buf.len());

        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        let decoded = decode_header(&buf[4..4 + len]).unwrap();
        assert_eq!(decoded.objname, hdr.objname);
        assert_eq!(decoded.size, 4096);
        assert_eq!(decoded.uname(), "aws://imagenet/train/001.tar");
    }
}
