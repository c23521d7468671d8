//! Chunked transfer engine
//!
//! `SendEngine` and `ReceiveEngine` hold position and chunk state for one
//! direction of one transfer. They do no networking of their own beyond the
//! `ChunkLink` they are handed; session drivers own transports, reconnects
//! and checkpoint persistence.

mod link;
mod receiver;
mod sender;
#[cfg(test)]
mod testing;

pub use link::{ChannelLink, ChunkLink, RelayLink};
pub use receiver::{Inbound, ReceiveEngine, Received, decode_inbound};
pub use sender::{SendEngine, SentChunk};
