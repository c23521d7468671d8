//! Data channels between the two endpoints of a peer-to-peer transfer
//!
//! A channel carries opaque messages in order. It does not say whether a
//! message is metadata or chunk bytes; the receiving engine decides.

mod loopback;
mod negotiate;
mod tcp;

use async_trait::async_trait;
use thiserror::Error;

use ferry_common::framing::FrameError;

pub use loopback::{LoopbackChannel, loopback_pair};
pub use negotiate::{ChannelSignal, PendingOffer, dial};
pub use tcp::{CHANNEL_FRAME_TYPE, TcpChannel};

/// Data channel errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("data channel closed")]
    Closed,
    #[error("data channel frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("unexpected frame type on data channel: {0}")]
    UnexpectedFrame(String),
}

/// Which kind of channel carries the data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Tcp,
    Loopback,
}

/// An ordered, reliable message pipe to the other endpoint
#[async_trait]
pub trait DataChannel: Send + Sync {
    /// Send one message
    async fn send(&mut self, message: Vec<u8>) -> Result<(), ChannelError>;

    /// Receive the next message, or None once the peer has closed
    ///
    /// Cancel-safe: a cancelled call loses no message.
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, ChannelError>;

    fn kind(&self) -> ChannelKind;
}
