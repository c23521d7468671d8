//! Transfer session types

use std::ops::Range;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use ferry_common::protocol::{Direction, TransferMode};

/// Hex characters of the digest kept in a transfer id
const TRANSFER_ID_HEX_LEN: usize = 16;

// =============================================================================
// Transfer State
// =============================================================================

/// Engine lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Idle,
    MetadataSent,
    MetadataReceived,
    Transferring,
    /// Transport lost; waiting for the reconnect path
    Suspended,
    Completed,
    Aborted,
}

impl TransferState {
    /// Completed and aborted sessions never change state again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }
}

/// Path the chunk bytes take
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// A data channel between the endpoints (TCP or in-process)
    Channel,
    /// The server's relay buffer
    Relay,
}

// =============================================================================
// Transfer Session
// =============================================================================

/// One direction of moving one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSession {
    pub transfer_id: String,
    pub room_id: String,
    pub direction: Direction,
    pub file_name: String,
    pub file_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u64,
    /// Next chunk to send or expect
    pub chunk_index: u64,
    pub bytes_transferred: u64,
    pub mode: TransferMode,
    /// The same endpoint holds both roles in this room
    pub self_transfer: bool,
    pub state: TransferState,
}

impl TransferSession {
    pub fn new(
        transfer_id: String,
        room_id: String,
        direction: Direction,
        file_name: String,
        file_size: u64,
        chunk_size: u64,
        mode: TransferMode,
    ) -> Self {
        Self {
            transfer_id,
            room_id,
            direction,
            file_name,
            file_size,
            chunk_size,
            total_chunks: total_chunks(file_size, chunk_size),
            chunk_index: 0,
            bytes_transferred: 0,
            mode,
            self_transfer: false,
            state: TransferState::Idle,
        }
    }

    /// Mark the session as one half of a self-transfer
    pub fn with_self_transfer(mut self, self_transfer: bool) -> Self {
        self.self_transfer = self_transfer;
        self
    }
}

// =============================================================================
// Metadata
// =============================================================================

/// First message a sender puts on a data channel
///
/// Unknown fields are rejected so that arbitrary JSON-looking chunk bytes
/// are less likely to pass for metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransferMetadata {
    pub file_name: String,
    pub file_size: u64,
    pub total_chunks: u64,
    /// First chunk index this pass will send
    pub resume_from: u64,
    pub transfer_id: String,
}

// =============================================================================
// Chunk Arithmetic
// =============================================================================

/// Number of chunks covering `file_size` bytes
///
/// An empty file has zero chunks.
pub fn total_chunks(file_size: u64, chunk_size: u64) -> u64 {
    file_size.div_ceil(chunk_size.max(1))
}

/// Byte range of chunk `index`
pub fn chunk_range(index: u64, chunk_size: u64, file_size: u64) -> Range<u64> {
    let start = index.saturating_mul(chunk_size).min(file_size);
    let end = start.saturating_add(chunk_size).min(file_size);
    start..end
}

/// Derive the transfer id for one attempt
///
/// Stable for a given room, file and first-attempt time, so reconnects of the
/// same attempt keep it.
pub fn transfer_id(room_id: &str, file_name: &str, file_size: u64, first_attempt_ms: i64) -> String {
    let digest = Sha256::digest(format!("{room_id}-{file_name}-{file_size}-{first_attempt_ms}"));
    let hex = hex::encode(digest);
    format!("transfer-{}", &hex[..TRANSFER_ID_HEX_LEN])
}
