//! Sending half of the chunked transfer engine

use std::path::PathBuf;

use chrono::Utc;

use ferry_common::protocol::TransferMode;

use super::link::ChunkLink;
use crate::transfers::checkpoint::{CheckpointPolicy, ResumeCheckpoint};
use crate::transfers::errors::{ProtocolError, TransferError};
use crate::transfers::storage::FileSource;
use crate::transfers::types::{
    TransferMetadata, TransferSession, TransferState, chunk_range, total_chunks,
};

/// Result of one successful chunk send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentChunk {
    pub index: u64,
    pub len: u64,
    /// Present when the sampling policy calls for a checkpoint here
    pub checkpoint: Option<ResumeCheckpoint>,
}

/// Walks a file chunk by chunk from a resume point
///
/// The engine owns the position; the caller owns the link and decides what
/// happens when a send fails. A failed chunk leaves the position unchanged,
/// so the same chunk goes out again after the link is restored.
#[derive(Debug)]
pub struct SendEngine {
    session: TransferSession,
    policy: CheckpointPolicy,
    source_path: Option<PathBuf>,
}

impl SendEngine {
    pub fn new(session: TransferSession, policy: CheckpointPolicy) -> Self {
        Self {
            session,
            policy,
            source_path: None,
        }
    }

    /// Record where the file lives so a restarted sender can reopen it
    pub fn with_source_path(mut self, path: PathBuf) -> Self {
        self.source_path = Some(path);
        self
    }

    pub fn session(&self) -> &TransferSession {
        &self.session
    }

    /// Next chunk index to send
    pub fn position(&self) -> u64 {
        self.session.chunk_index
    }

    pub fn is_done(&self) -> bool {
        self.session.chunk_index >= self.session.total_chunks
    }

    /// Record the transport mode once the room has chosen one
    pub fn set_mode(&mut self, mode: TransferMode) {
        self.session.mode = mode;
    }

    /// Change the chunk size before anything has been sent
    ///
    /// Used when a transfer moves to the relay's chunk size. Returns false
    /// once chunks are out, since indices then refer to the old size.
    pub fn set_chunk_size(&mut self, chunk_size: u64) -> bool {
        if self.session.chunk_index > 0 {
            return false;
        }
        self.session.chunk_size = chunk_size;
        self.session.total_chunks = total_chunks(self.session.file_size, chunk_size);
        true
    }

    /// Position the engine at `resume_from` and build the metadata message
    pub fn begin(&mut self, resume_from: u64) -> Result<TransferMetadata, TransferError> {
        if resume_from > self.session.total_chunks {
            return Err(ProtocolError::InvalidResumePoint {
                resume_from,
                total_chunks: self.session.total_chunks,
            }
            .into());
        }

        self.session.chunk_index = resume_from;
        self.session.bytes_transferred =
            chunk_range(resume_from, self.session.chunk_size, self.session.file_size).start;
        self.session.state = TransferState::MetadataSent;

        Ok(TransferMetadata {
            file_name: self.session.file_name.clone(),
            file_size: self.session.file_size,
            total_chunks: self.session.total_chunks,
            resume_from,
            transfer_id: self.session.transfer_id.clone(),
        })
    }

    /// Begin a pass over `link` from `resume_from`
    pub async fn start(
        &mut self,
        link: &mut dyn ChunkLink,
        resume_from: u64,
    ) -> Result<(), TransferError> {
        let metadata = self.begin(resume_from)?;
        link.send_metadata(&metadata).await?;
        tracing::debug!(
            transfer_id = %self.session.transfer_id,
            resume_from,
            total_chunks = self.session.total_chunks,
            "send pass started"
        );
        Ok(())
    }

    /// Send the chunk at the current position
    ///
    /// Returns `None` once every chunk has been sent.
    pub async fn send_next(
        &mut self,
        link: &mut dyn ChunkLink,
        source: &dyn FileSource,
    ) -> Result<Option<SentChunk>, TransferError> {
        if self.is_done() || self.session.state.is_terminal() {
            return Ok(None);
        }

        let index = self.session.chunk_index;
        let range = chunk_range(index, self.session.chunk_size, self.session.file_size);
        let bytes = source.read_range(range.clone()).await?;
        link.send_chunk(index, self.session.total_chunks, bytes).await?;

        self.session.chunk_index = index + 1;
        self.session.bytes_transferred = range.end;
        self.session.state = TransferState::Transferring;

        let checkpoint = self
            .policy
            .should_write(self.session.chunk_index)
            .then(|| self.checkpoint());

        let pause = link.pause();
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }

        Ok(Some(SentChunk {
            index,
            len: range.end - range.start,
            checkpoint,
        }))
    }

    /// Checkpoint at the current position
    pub fn checkpoint(&self) -> ResumeCheckpoint {
        ResumeCheckpoint {
            transfer_id: self.session.transfer_id.clone(),
            room_id: self.session.room_id.clone(),
            direction: self.session.direction,
            file_name: self.session.file_name.clone(),
            file_size: self.session.file_size,
            chunk_index: self.session.chunk_index,
            total_chunks: self.session.total_chunks,
            chunk_size: self.session.chunk_size,
            source_path: self.source_path.clone(),
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
}
