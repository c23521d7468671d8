//! In-process channel for self-transfers

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{ChannelError, ChannelKind, DataChannel};

/// Messages buffered per direction before `send` waits
const LOOPBACK_CAPACITY: usize = 16;

/// One end of an in-memory channel pair
#[derive(Debug)]
pub struct LoopbackChannel {
    tx: mpsc::Sender<Vec<u8>>,
    rx: mpsc::Receiver<Vec<u8>>,
}

/// Create two connected channel ends
pub fn loopback_pair() -> (LoopbackChannel, LoopbackChannel) {
    let (a_tx, b_rx) = mpsc::channel(LOOPBACK_CAPACITY);
    let (b_tx, a_rx) = mpsc::channel(LOOPBACK_CAPACITY);
    (
        LoopbackChannel { tx: a_tx, rx: a_rx },
        LoopbackChannel { tx: b_tx, rx: b_rx },
    )
}

#[async_trait]
impl DataChannel for LoopbackChannel {
    async fn send(&mut self, message: Vec<u8>) -> Result<(), ChannelError> {
        self.tx.send(message).await.map_err(|_| ChannelError::Closed)
    }

    async fn recv(&mut self) -> Result<Option<Vec<u8>>, ChannelError> {
        Ok(self.rx.recv().await)
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Loopback
    }
}
