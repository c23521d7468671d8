//! Transfer error taxonomy
//!
//! Every failure a session can surface is one `TransferError`. `action()`
//! tells the user-facing layer whether trying again may help or whether the
//! transfer has to start over.

use std::io;

use thiserror::Error;

use ferry_common::ErrorKind;

use crate::channel::ChannelError;
use crate::network::SignalingError;

/// What the user can do about a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureAction {
    /// Transport-level failure; resuming the same transfer may succeed
    Retry,
    /// The session or resume point is unusable; begin a new transfer
    StartOver,
}

/// Room-level refusals from the server
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("room not found")]
    RoomNotFound,
    #[error("room is full")]
    RoomFull,
    #[error("room no longer exists")]
    RoomGone,
    #[error("not a member of the room")]
    NotMember,
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("no resumable transfer found")]
    NothingToResume,
}

impl SessionError {
    /// Map a response's `error_kind` and text to a session error
    pub fn from_response(error_kind: Option<&str>, error: Option<String>) -> Self {
        match error_kind.and_then(ErrorKind::parse) {
            Some(ErrorKind::NotFound) => Self::RoomNotFound,
            Some(ErrorKind::Full) => Self::RoomFull,
            Some(ErrorKind::Gone) => Self::RoomGone,
            Some(ErrorKind::NotMember) => Self::NotMember,
            _ => Self::Rejected(error.unwrap_or_else(|| "unknown error".to_string())),
        }
    }
}

/// Unrecoverable data errors for one transfer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("malformed metadata: {0}")]
    MalformedMetadata(String),
    #[error("chunk {0} is missing at assembly")]
    MissingChunk(u64),
    #[error("chunk {index} is outside the transfer of {total_chunks} chunks")]
    ChunkOutOfRange { index: u64, total_chunks: u64 },
    #[error("relay chunk {index} unavailable: {reason}")]
    RelayChunk { index: u64, reason: String },
    #[error("resume point {resume_from} is past the end of {total_chunks} chunks")]
    InvalidResumePoint { resume_from: u64, total_chunks: u64 },
    #[error("assembled {actual} bytes, expected {expected}")]
    SizeMismatch { expected: u64, actual: u64 },
    #[error("unexpected message: {0}")]
    Unexpected(String),
}

/// Any failure of a transfer session
#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("connection problem: {0}")]
    Transport(String),
    #[error("file error: {0}")]
    Io(#[from] io::Error),
    #[error("transfer cancelled")]
    Cancelled,
}

impl TransferError {
    /// Classify for the user-facing layer
    pub fn action(&self) -> FailureAction {
        match self {
            Self::Transport(_) | Self::Io(_) | Self::Cancelled => FailureAction::Retry,
            Self::Session(_) | Self::Protocol(_) => FailureAction::StartOver,
        }
    }

    /// Transport failures are the only ones the reconnect path handles
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<SignalingError> for TransferError {
    fn from(err: SignalingError) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<ChannelError> for TransferError {
    fn from(err: ChannelError) -> Self {
        Self::Transport(err.to_string())
    }
}
