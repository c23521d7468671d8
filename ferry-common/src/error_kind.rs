//! Machine-readable error kinds for protocol responses
//!
//! These error kinds are serialized to strings in protocol messages,
//! allowing clients to decide between retrying and starting over
//! without parsing human-readable text.

use std::fmt;

/// Room does not exist
pub const ERROR_KIND_NOT_FOUND: &str = "not_found";

/// Room already has its maximum number of members
pub const ERROR_KIND_FULL: &str = "full";

/// Room existed but is gone (expired or closed) at rejoin time
pub const ERROR_KIND_GONE: &str = "gone";

/// Request failed validation
pub const ERROR_KIND_INVALID: &str = "invalid";

/// Caller is not a member of the room it addressed
pub const ERROR_KIND_NOT_MEMBER: &str = "not_member";

/// Requested relay chunk is not buffered
pub const ERROR_KIND_CHUNK_MISSING: &str = "chunk_missing";

/// Unexpected or malformed protocol data
pub const ERROR_KIND_PROTOCOL_ERROR: &str = "protocol_error";

/// Relay buffer is at its limit; send the chunk again later
pub const ERROR_KIND_BUSY: &str = "busy";

/// Error kinds carried in room and relay responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Full,
    Gone,
    Invalid,
    NotMember,
    ChunkMissing,
    ProtocolError,
    Busy,
}

impl ErrorKind {
    /// Convert to the string representation used in protocol messages
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => ERROR_KIND_NOT_FOUND,
            Self::Full => ERROR_KIND_FULL,
            Self::Gone => ERROR_KIND_GONE,
            Self::Invalid => ERROR_KIND_INVALID,
            Self::NotMember => ERROR_KIND_NOT_MEMBER,
            Self::ChunkMissing => ERROR_KIND_CHUNK_MISSING,
            Self::ProtocolError => ERROR_KIND_PROTOCOL_ERROR,
            Self::Busy => ERROR_KIND_BUSY,
        }
    }

    /// Parse from string (for client-side handling)
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            ERROR_KIND_NOT_FOUND => Some(Self::NotFound),
            ERROR_KIND_FULL => Some(Self::Full),
            ERROR_KIND_GONE => Some(Self::Gone),
            ERROR_KIND_INVALID => Some(Self::Invalid),
            ERROR_KIND_NOT_MEMBER => Some(Self::NotMember),
            ERROR_KIND_CHUNK_MISSING => Some(Self::ChunkMissing),
            ERROR_KIND_PROTOCOL_ERROR => Some(Self::ProtocolError),
            ERROR_KIND_BUSY => Some(Self::Busy),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ErrorKind> for String {
    fn from(kind: ErrorKind) -> Self {
        kind.as_str().to_string()
    }
}
