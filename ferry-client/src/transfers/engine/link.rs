//! Outbound chunk paths for the sending engine

use std::time::Duration;

use async_trait::async_trait;

use ferry_common::ErrorKind;
use ferry_common::protocol::{ClientMessage, ServerMessage};

use crate::channel::DataChannel;
use crate::constants::RELAY_BUSY_RETRY;
use crate::network::SignalingClient;
use crate::transfers::errors::{ProtocolError, SessionError, TransferError};
use crate::transfers::types::{TransferMetadata, Transport};

/// Where a sender puts metadata and chunks
#[async_trait]
pub trait ChunkLink: Send {
    async fn send_metadata(&mut self, metadata: &TransferMetadata) -> Result<(), TransferError>;

    async fn send_chunk(
        &mut self,
        index: u64,
        total_chunks: u64,
        bytes: Vec<u8>,
    ) -> Result<(), TransferError>;

    fn transport(&self) -> Transport;

    /// Rate-control pause after each chunk
    fn pause(&self) -> Duration;
}

/// Sends over a data channel: metadata as JSON, chunks as raw bytes
pub struct ChannelLink {
    channel: Box<dyn DataChannel>,
    pause: Duration,
}

impl ChannelLink {
    pub fn new(channel: Box<dyn DataChannel>, pause: Duration) -> Self {
        Self { channel, pause }
    }
}

#[async_trait]
impl ChunkLink for ChannelLink {
    async fn send_metadata(&mut self, metadata: &TransferMetadata) -> Result<(), TransferError> {
        let json = serde_json::to_vec(metadata)
            .map_err(|e| ProtocolError::MalformedMetadata(e.to_string()))?;
        self.channel.send(json).await?;
        Ok(())
    }

    async fn send_chunk(
        &mut self,
        _index: u64,
        _total_chunks: u64,
        bytes: Vec<u8>,
    ) -> Result<(), TransferError> {
        self.channel.send(bytes).await?;
        Ok(())
    }

    fn transport(&self) -> Transport {
        Transport::Channel
    }

    fn pause(&self) -> Duration {
        self.pause
    }
}

/// Uploads chunks to the server's relay buffer
///
/// Metadata is implicit in relay mode: the receiver learns the file from the
/// room and the chunk count and size from availability notices. A full
/// buffer is waited out until the receiver pulls.
pub struct RelayLink {
    client: SignalingClient,
    room_id: String,
    transfer_id: String,
    chunk_size: u64,
    pause: Duration,
}

impl RelayLink {
    pub fn new(
        client: SignalingClient,
        room_id: &str,
        transfer_id: &str,
        chunk_size: u64,
        pause: Duration,
    ) -> Self {
        Self {
            client,
            room_id: room_id.to_string(),
            transfer_id: transfer_id.to_string(),
            chunk_size,
            pause,
        }
    }
}

#[async_trait]
impl ChunkLink for RelayLink {
    async fn send_metadata(&mut self, _metadata: &TransferMetadata) -> Result<(), TransferError> {
        Ok(())
    }

    async fn send_chunk(
        &mut self,
        index: u64,
        total_chunks: u64,
        bytes: Vec<u8>,
    ) -> Result<(), TransferError> {
        loop {
            let request = ClientMessage::RelayChunk {
                room_id: self.room_id.clone(),
                transfer_id: self.transfer_id.clone(),
                chunk_index: index,
                total_chunks,
                chunk_size: self.chunk_size,
                payload: bytes.clone(),
            };
            match self.client.request(request).await? {
                ServerMessage::RelayChunkResponse { success: true, .. } => return Ok(()),
                ServerMessage::RelayChunkResponse {
                    error_kind: Some(kind),
                    ..
                } if ErrorKind::parse(&kind) == Some(ErrorKind::Busy) => {
                    tracing::trace!(index, "relay buffer full, waiting");
                    tokio::time::sleep(RELAY_BUSY_RETRY).await;
                }
                ServerMessage::RelayChunkResponse {
                    error, error_kind, ..
                } => return Err(SessionError::from_response(error_kind.as_deref(), error).into()),
                ServerMessage::Error { message, .. } => {
                    return Err(ProtocolError::Unexpected(message).into());
                }
                other => return Err(ProtocolError::Unexpected(format!("{other:?}")).into()),
            }
        }
    }

    fn transport(&self) -> Transport {
        Transport::Relay
    }

    fn pause(&self) -> Duration {
        self.pause
    }
}
