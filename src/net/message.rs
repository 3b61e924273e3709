//! Control-plane message types and framing.
//!
//! Every message travels as a 4-byte big-endian length prefix followed by
//! the bincode-encoded payload.

use crate::cluster::smap::Smap;
use crate::error::NetworkError;
use crate::types::{HealthStatus, TargetId};
use bytes::BytesMut;
use serde::{Deserialize, Serialize};

/// Upper bound for a control frame; anything larger is a protocol error.
pub const MAX_CONTROL_FRAME: usize = 4 * 1024 * 1024;

/// Control-plane message wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// Health probe; `from_id` identifies the probing target.
    HealthQuery { from_id: TargetId },

    /// Answer to a health probe.
    HealthStatus(HealthStatus),

    /// Request for the peer's current membership snapshot.
    SmapQuery,

    /// The peer's current membership snapshot.
    SmapResponse(Smap),
}

/// Encode a message with its length prefix directly into `buf`.
/// Returns the number of bytes written.
pub fn encode_message_into(msg: &Message, buf: &mut BytesMut) -> Result<usize, NetworkError> {
    let size = bincode::serialized_size(msg)? as usize;
    buf.reserve(4 + size);
    buf.extend_from_slice(&(size as u32).to_be_bytes());

    let start = buf.len();
    buf.resize(start + size, 0);
    let mut cursor = std::io::Cursor::new(&mut buf[start..]);
    bincode::serialize_into(&mut cursor, msg)?;

    Ok(4 + size)
}

/// Decode a message from a complete payload (length prefix stripped).
pub fn decode_message(data: &[u8]) -> Result<Message, NetworkError> {
    Ok(bincode::deserialize(data)?)
}
