//! Control-plane networking: framed request/response messages between
//! targets (health probes, cluster-map queries).
//!
//! The data plane — streamed object transfer — lives in [`crate::transport`].

pub mod client;
pub mod message;
pub mod server;

pub use client::call;
pub use message::{decode_message, encode_message_into, Message};
pub use server::{ControlHandler, ControlServer};
