//! Direct TCP data channel
//!
//! Messages travel as `ChannelData` frames. A dedicated task owns the read
//! half so `recv` stays cancel-safe.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use ferry_common::framing::{DEFAULT_FRAME_TIMEOUT, FrameReader, FrameWriter, MessageId};

use super::{ChannelError, ChannelKind, DataChannel};

/// Frame type for every data channel message
pub const CHANNEL_FRAME_TYPE: &str = "ChannelData";

/// Frames read ahead of the consumer
const INBOUND_CAPACITY: usize = 16;

/// A data channel over one TCP connection
pub struct TcpChannel {
    writer: FrameWriter<OwnedWriteHalf>,
    inbound: mpsc::Receiver<Result<Vec<u8>, ChannelError>>,
    reader: JoinHandle<()>,
    peer: Option<SocketAddr>,
}

impl TcpChannel {
    pub fn new(stream: TcpStream) -> Self {
        let _ = stream.set_nodelay(true);
        let peer = stream.peer_addr().ok();
        let (read_half, write_half) = stream.into_split();
        let (tx, inbound) = mpsc::channel(INBOUND_CAPACITY);
        let reader = tokio::spawn(read_loop(
            FrameReader::new(BufReader::new(read_half)),
            tx,
        ));

        Self {
            writer: FrameWriter::new(write_half),
            inbound,
            reader,
            peer,
        }
    }

    /// Remote address, when the OS still knows it
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }
}

impl Drop for TcpChannel {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl DataChannel for TcpChannel {
    async fn send(&mut self, message: Vec<u8>) -> Result<(), ChannelError> {
        self.writer
            .write(MessageId::new(), CHANNEL_FRAME_TYPE, &message)
            .await
            .map_err(ChannelError::from)
    }

    async fn recv(&mut self) -> Result<Option<Vec<u8>>, ChannelError> {
        self.inbound.recv().await.transpose()
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Tcp
    }
}

async fn read_loop(
    mut reader: FrameReader<BufReader<OwnedReadHalf>>,
    tx: mpsc::Sender<Result<Vec<u8>, ChannelError>>,
) {
    loop {
        let item = match reader.read_frame_with_timeout(DEFAULT_FRAME_TIMEOUT).await {
            Ok(Some(frame)) if frame.message_type == CHANNEL_FRAME_TYPE => Ok(frame.payload),
            Ok(Some(frame)) => Err(ChannelError::UnexpectedFrame(frame.message_type)),
            Ok(None) => break,
            Err(e) => Err(ChannelError::Frame(e)),
        };
        let failed = item.is_err();
        if tx.send(item).await.is_err() || failed {
            break;
        }
    }
}
