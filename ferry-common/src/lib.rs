//! Ferry Common Library
//!
//! Shared types, protocol, framing and topology logic for the Ferry
//! room server and client.

mod error_kind;
pub mod framing;
pub mod io;
pub mod protocol;
pub mod topology;
pub mod validators;

use std::time::Duration;

pub use error_kind::{
    ERROR_KIND_BUSY, ERROR_KIND_CHUNK_MISSING, ERROR_KIND_FULL, ERROR_KIND_GONE,
    ERROR_KIND_INVALID, ERROR_KIND_NOT_FOUND, ERROR_KIND_NOT_MEMBER, ERROR_KIND_PROTOCOL_ERROR,
    ErrorKind,
};

/// Version information for the Ferry protocol
pub const PROTOCOL_VERSION: &str = "0.3.0";

/// Default port for the Ferry signaling server
pub const DEFAULT_PORT: u16 = 7600;

// =============================================================================
// Rooms
// =============================================================================

/// Number of characters in a room code
pub const ROOM_CODE_LENGTH: usize = 6;

/// Alphabet room codes are drawn from (codes are case-insensitive)
pub const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Maximum number of distinct members in a room
pub const MAX_ROOM_MEMBERS: usize = 2;

/// Rooms older than this are deleted by the sweeper regardless of activity
pub const DEFAULT_ROOM_TTL: Duration = Duration::from_secs(60 * 60);

/// Interval between expiry sweeps
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Delay between the closing and closed notices once both roles complete
pub const DEFAULT_CLOSE_GRACE: Duration = Duration::from_secs(3);

// =============================================================================
// Topology
// =============================================================================

/// Files below this size may attempt a negotiated peer-to-peer channel (10 GiB)
pub const DEFAULT_DIRECT_TRANSFER_CEILING: u64 = 10 * 1024 * 1024 * 1024;

/// Relay transfers above this size are flagged compression-eligible (100 MiB)
pub const DEFAULT_COMPRESSION_THRESHOLD: u64 = 100 * 1024 * 1024;

// =============================================================================
// Chunking
// =============================================================================

/// Chunk size for peer-to-peer data channels (64 KiB)
pub const DEFAULT_CHUNK_SIZE: u64 = 64 * 1024;

/// Chunk size for relayed transfers (1 MiB)
pub const DEFAULT_RELAY_CHUNK_SIZE: u64 = 1024 * 1024;

/// Largest chunk accepted on any transport (1 MiB)
pub const MAX_CHUNK_SIZE: u64 = 1024 * 1024;

/// Relay bytes one room may hold before uploads are refused as busy (64 MiB)
pub const DEFAULT_RELAY_BUFFER_LIMIT: u64 = 64 * 1024 * 1024;

/// Pseudo file name used when chunks arrive without metadata
pub const FALLBACK_FILE_NAME: &str = "received_file";
