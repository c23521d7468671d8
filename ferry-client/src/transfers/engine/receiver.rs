//! Receiving half of the chunked transfer engine
//!
//! Chunk slots are positional. Metadata with `resume_from = k` makes the next
//! channel message fill slot `k`; slots below `k` that are not held count as
//! delivered by an earlier pass (placeholders) for completion purposes, but
//! assembly fails if any of them is still empty. Relay chunks carry their
//! own index.

use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;

use ferry_common::FALLBACK_FILE_NAME;
use ferry_common::protocol::{FileInfo, TransferMode};

use crate::transfers::checkpoint::{CheckpointPolicy, ResumeCheckpoint};
use crate::transfers::errors::{ProtocolError, TransferError};
use crate::transfers::types::{TransferMetadata, TransferSession, TransferState};

/// One data channel message, classified
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Metadata(TransferMetadata),
    Chunk(Vec<u8>),
}

/// Classify a data channel message
///
/// The channel does not mark message kinds. A message is metadata if and
/// only if it decodes as `TransferMetadata`; anything else is chunk bytes.
pub fn decode_inbound(message: Vec<u8>) -> Inbound {
    match serde_json::from_slice::<TransferMetadata>(&message) {
        Ok(metadata) => Inbound::Metadata(metadata),
        Err(_) => Inbound::Chunk(message),
    }
}

/// What an accepted message did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Metadata {
        resume_from: u64,
    },
    Chunk {
        index: u64,
        /// False when the slot was already held
        fresh: bool,
        checkpoint: Option<ResumeCheckpoint>,
    },
}

/// Collects chunks until the file is complete
#[derive(Debug)]
pub struct ReceiveEngine {
    session: TransferSession,
    policy: CheckpointPolicy,
    slots: Vec<Option<Vec<u8>>>,
    held: u64,
    received_bytes: u64,
    /// Slot the next channel chunk fills
    next_slot: u64,
    /// Resume point of the latest metadata; empty slots below it are placeholders
    floor: u64,
    /// First empty slot at or above `floor`
    frontier: u64,
    /// First empty slot from 0
    contiguous: u64,
    metadata: Option<TransferMetadata>,
    total_known: bool,
    size_known: bool,
    last_chunk_at: Option<Instant>,
}

impl ReceiveEngine {
    pub fn new(session: TransferSession, policy: CheckpointPolicy) -> Self {
        Self {
            session,
            policy,
            slots: Vec::new(),
            held: 0,
            received_bytes: 0,
            next_slot: 0,
            floor: 0,
            frontier: 0,
            contiguous: 0,
            metadata: None,
            total_known: false,
            size_known: false,
            last_chunk_at: None,
        }
    }

    pub fn session(&self) -> &TransferSession {
        &self.session
    }

    pub fn total_known(&self) -> bool {
        self.total_known
    }

    /// Chunks held from index 0 without a gap
    pub fn contiguous(&self) -> u64 {
        self.contiguous
    }

    pub fn holds(&self, index: u64) -> bool {
        self.slot(index).is_some()
    }

    /// Record the transport mode once the room has chosen one
    pub fn set_mode(&mut self, mode: TransferMode) {
        self.session.mode = mode;
    }

    /// Take name and size from the room's file description
    ///
    /// An empty file has no chunks, so it is complete as soon as it is known.
    pub fn expect_file(&mut self, info: &FileInfo) {
        if self.metadata.is_some() {
            return;
        }
        self.session.file_name = info.name.clone();
        self.session.file_size = info.size;
        self.size_known = true;
        if info.size == 0 {
            self.set_total(0);
        }
    }

    /// Adopt the chunk count announced by the relay
    ///
    /// The first announcement wins; the sender never changes its chunking
    /// once chunks are out.
    pub fn expect_total(&mut self, total_chunks: u64, chunk_size: u64) {
        if self.total_known {
            return;
        }
        self.session.chunk_size = chunk_size;
        self.set_total(total_chunks);
    }

    pub fn set_transfer_id(&mut self, transfer_id: &str) {
        if self.session.transfer_id != transfer_id {
            self.session.transfer_id = transfer_id.to_string();
        }
    }

    /// Accept one data channel message
    pub fn accept(&mut self, message: Vec<u8>, now: Instant) -> Result<Received, TransferError> {
        match decode_inbound(message) {
            Inbound::Metadata(metadata) => {
                let resume_from = metadata.resume_from;
                self.on_metadata(metadata)?;
                Ok(Received::Metadata { resume_from })
            }
            Inbound::Chunk(bytes) => {
                let index = self.next_slot;
                self.store_chunk(index, bytes, now)
            }
        }
    }

    fn on_metadata(&mut self, metadata: TransferMetadata) -> Result<(), TransferError> {
        if metadata.resume_from > metadata.total_chunks {
            return Err(ProtocolError::MalformedMetadata(format!(
                "resume point {} exceeds {} chunks",
                metadata.resume_from, metadata.total_chunks
            ))
            .into());
        }
        if self.size_known && metadata.file_size != self.session.file_size {
            return Err(ProtocolError::MalformedMetadata(format!(
                "file size {} does not match the announced {}",
                metadata.file_size, self.session.file_size
            ))
            .into());
        }
        if let Some(previous) = &self.metadata
            && previous.total_chunks != metadata.total_chunks
        {
            return Err(ProtocolError::MalformedMetadata(format!(
                "chunk count changed from {} to {}",
                previous.total_chunks, metadata.total_chunks
            ))
            .into());
        }

        tracing::debug!(
            transfer_id = %metadata.transfer_id,
            resume_from = metadata.resume_from,
            total_chunks = metadata.total_chunks,
            "metadata received"
        );

        self.session.file_name = metadata.file_name.clone();
        self.session.file_size = metadata.file_size;
        self.session.transfer_id = metadata.transfer_id.clone();
        self.size_known = true;
        self.set_total(metadata.total_chunks);

        self.next_slot = metadata.resume_from;
        self.floor = metadata.resume_from;
        self.frontier = self.floor;
        self.advance_cursors();

        if self.session.state == TransferState::Idle {
            self.session.state = TransferState::MetadataReceived;
        }
        self.metadata = Some(metadata);
        Ok(())
    }

    /// Store chunk bytes at `index`; duplicates overwrite the slot
    pub fn store_chunk(
        &mut self,
        index: u64,
        bytes: Vec<u8>,
        now: Instant,
    ) -> Result<Received, TransferError> {
        if self.total_known && index >= self.session.total_chunks {
            return Err(ProtocolError::ChunkOutOfRange {
                index,
                total_chunks: self.session.total_chunks,
            }
            .into());
        }

        let slot_index = usize::try_from(index).map_err(|_| ProtocolError::ChunkOutOfRange {
            index,
            total_chunks: self.session.total_chunks,
        })?;
        if self.slots.len() <= slot_index {
            self.slots.resize(slot_index + 1, None);
        }

        let len = bytes.len() as u64;
        let fresh = match self.slots[slot_index].replace(bytes) {
            Some(previous) => {
                self.received_bytes = self.received_bytes - previous.len() as u64 + len;
                false
            }
            None => {
                self.held += 1;
                self.received_bytes += len;
                true
            }
        };

        self.next_slot = index + 1;
        self.last_chunk_at = Some(now);
        self.advance_cursors();

        self.session.chunk_index = self.contiguous;
        self.session.bytes_transferred = self.received_bytes;
        self.session.state = TransferState::Transferring;

        let checkpoint = (fresh && self.policy.should_write(self.held)).then(|| self.checkpoint());

        Ok(Received::Chunk {
            index,
            fresh,
            checkpoint,
        })
    }

    /// Every slot is held or below the resume point
    pub fn is_complete(&self) -> bool {
        self.total_known && self.frontier >= self.session.total_chunks
    }

    /// When to give up waiting for metadata that never came
    ///
    /// Only applies while the chunk count is unknown and something arrived.
    pub fn grace_deadline(&self, grace: Duration) -> Option<Instant> {
        if self.metadata.is_some() || self.total_known || self.held == 0 {
            return None;
        }
        self.last_chunk_at.map(|at| at + grace)
    }

    /// Treat what has arrived as the whole file
    pub fn finish_without_metadata(&mut self) {
        tracing::warn!(
            chunks = self.held,
            "no metadata received, assembling what arrived"
        );
        if !self.size_known {
            self.session.file_name = FALLBACK_FILE_NAME.to_string();
            self.session.file_size = self.received_bytes;
        }
        self.set_total(self.slots.len() as u64);
    }

    /// Concatenate the slots into the file
    ///
    /// Fails on any unresolved placeholder or a size that disagrees with the
    /// announced one. The slots are consumed.
    pub fn assemble(&mut self) -> Result<Vec<u8>, TransferError> {
        let total = self.session.total_chunks;
        if let Some(missing) = (0..total).find(|&i| self.slot(i).is_none()) {
            return Err(ProtocolError::MissingChunk(missing).into());
        }

        let slots = std::mem::take(&mut self.slots);
        let bytes: Vec<u8> = slots.into_iter().flatten().flatten().collect();
        let actual = bytes.len() as u64;
        if self.size_known && actual != self.session.file_size {
            return Err(ProtocolError::SizeMismatch {
                expected: self.session.file_size,
                actual,
            }
            .into());
        }
        Ok(bytes)
    }

    /// Checkpoint at the contiguous position
    pub fn checkpoint(&self) -> ResumeCheckpoint {
        ResumeCheckpoint {
            transfer_id: self.session.transfer_id.clone(),
            room_id: self.session.room_id.clone(),
            direction: self.session.direction,
            file_name: self.session.file_name.clone(),
            file_size: self.session.file_size,
            chunk_index: self.contiguous,
            total_chunks: self.session.total_chunks,
            chunk_size: self.session.chunk_size,
            source_path: None,
            last_updated: Utc::now(),
        }
    }

    pub fn suspend(&mut self) {
        if !self.session.state.is_terminal() {
            self.session.state = TransferState::Suspended;
        }
    }

    pub fn complete(&mut self) {
        self.session.state = TransferState::Completed;
    }

    pub fn abort(&mut self) {
        if self.session.state != TransferState::Completed {
            self.session.state = TransferState::Aborted;
        }
    }

    fn set_total(&mut self, total_chunks: u64) {
        self.session.total_chunks = total_chunks;
        self.total_known = true;
    }

    fn slot(&self, index: u64) -> Option<&Vec<u8>> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.slots.get(i))
            .and_then(Option::as_ref)
    }

    fn advance_cursors(&mut self) {
        while self.holds(self.contiguous) {
            self.contiguous += 1;
        }
        while self.holds(self.frontier) {
            self.frontier += 1;
        }
    }
}
