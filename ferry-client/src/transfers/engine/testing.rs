//! Test doubles for engine tests

use std::io;
use std::ops::Range;
use std::time::Duration;

use async_trait::async_trait;

use ferry_common::protocol::FileInfo;

use super::link::ChunkLink;
use crate::transfers::errors::TransferError;
use crate::transfers::storage::FileSource;
use crate::transfers::types::{TransferMetadata, Transport};

/// In-memory file
pub struct MemorySource {
    info: FileInfo,
    bytes: Vec<u8>,
}

impl MemorySource {
    /// `len` bytes of a repeating non-trivial pattern
    pub fn patterned(name: &str, len: u64) -> Self {
        let bytes: Vec<u8> = (0..len).map(|i| (i * 31 % 251) as u8).collect();
        Self {
            info: FileInfo {
                name: name.to_string(),
                size: len,
                mime_type: "application/octet-stream".to_string(),
            },
            bytes,
        }
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

#[async_trait]
impl FileSource for MemorySource {
    fn info(&self) -> &FileInfo {
        &self.info
    }

    async fn read_range(&self, range: Range<u64>) -> io::Result<Vec<u8>> {
        self.bytes
            .get(range.start as usize..range.end as usize)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))
    }
}

/// Link that records everything sent
pub struct RecordingLink {
    transport: Transport,
    pub metadata: Vec<TransferMetadata>,
    pub chunks: Vec<(u64, Vec<u8>)>,
    pub fail_next: bool,
}

impl RecordingLink {
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            metadata: Vec::new(),
            chunks: Vec::new(),
            fail_next: false,
        }
    }

    pub fn concatenated(&self) -> Vec<u8> {
        self.chunks.iter().flat_map(|(_, b)| b.clone()).collect()
    }
}

#[async_trait]
impl ChunkLink for RecordingLink {
    async fn send_metadata(&mut self, metadata: &TransferMetadata) -> Result<(), TransferError> {
        self.metadata.push(metadata.clone());
        Ok(())
    }

    async fn send_chunk(
        &mut self,
        index: u64,
        _total_chunks: u64,
        bytes: Vec<u8>,
    ) -> Result<(), TransferError> {
        if std::mem::take(&mut self.fail_next) {
            return Err(TransferError::Transport("link dropped".to_string()));
        }
        self.chunks.push((index, bytes));
        Ok(())
    }

    fn transport(&self) -> Transport {
        self.transport
    }

    fn pause(&self) -> Duration {
        Duration::ZERO
    }
}
