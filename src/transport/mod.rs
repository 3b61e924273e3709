//! Data-plane transport: the outbound streaming bundle and the inbound
//! object receiver.
//!
//! Each transferred object travels as one frame — a length-prefixed
//! bincode header followed by exactly `header.size` raw body bytes — and
//! is acknowledged per object with a single status byte after the receiver
//! commits it.

pub mod bundle;
pub mod header;
pub mod receiver;

pub use bundle::{PendingCounter, SendCallback, SendJob, SendToken, StreamBundle};
pub use header::ObjectHeader;
pub use receiver::Receiver;
