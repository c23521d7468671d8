//! Room types for the session registry

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

use thiserror::Error;
use tokio::time::Instant;

use ferry_common::ErrorKind;
use ferry_common::protocol::{FileInfo, Role, TransferMode};
use ferry_common::topology::ModeDecision;

use super::relay::{BufferFull, RelayBuffer};

/// State for a single room
#[derive(Debug)]
pub struct Room {
    /// Canonical uppercase room code
    pub id: String,
    /// Distinguishes this room from a later room that reuses the code
    pub serial: u64,
    /// Member holding the host seat; `None` while the host is disconnected
    pub host: Option<u32>,
    /// Members in join order, at most `MAX_ROOM_MEMBERS`
    pub members: Vec<u32>,
    /// Address each member is classified by
    pub addresses: HashMap<u32, IpAddr>,
    pub file_info: FileInfo,
    /// Decided once the second distinct member joins
    pub mode: Option<ModeDecision>,
    pub created_at: Instant,
    pub completion_roles: HashMap<u32, HashSet<Role>>,
    /// The host joined its own room and plays both roles
    pub self_transfer: bool,
    /// Both roles reported; the close sequence owns the room now
    pub closing: bool,
    /// Removed from the registry; holders of a stale handle must treat it as absent
    pub deleted: bool,
    pub relay: RelayBuffer,
}

impl Room {
    pub fn new(
        id: String,
        serial: u64,
        host: u32,
        address: IpAddr,
        file_info: FileInfo,
        created_at: Instant,
        relay_limit: usize,
    ) -> Self {
        Self {
            id,
            serial,
            host: Some(host),
            members: vec![host],
            addresses: HashMap::from([(host, address)]),
            file_info,
            mode: None,
            created_at,
            completion_roles: HashMap::new(),
            self_transfer: false,
            closing: false,
            deleted: false,
            relay: RelayBuffer::new(relay_limit),
        }
    }

    pub fn has_member(&self, member_id: u32) -> bool {
        self.members.contains(&member_id)
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_host(&self, member_id: u32) -> bool {
        self.host == Some(member_id)
    }

    /// The host seat is empty or held by someone no longer present
    pub fn host_vacant(&self) -> bool {
        self.host.is_none_or(|host| !self.has_member(host))
    }

    /// Members other than `member_id`
    pub fn others(&self, member_id: u32) -> Vec<u32> {
        self.members
            .iter()
            .copied()
            .filter(|&m| m != member_id)
            .collect()
    }

    /// Both roles appear across all members' completion sets
    pub fn all_roles_complete(&self) -> bool {
        let mut sender = false;
        let mut receiver = false;
        for roles in self.completion_roles.values() {
            sender |= roles.contains(&Role::Sender);
            receiver |= roles.contains(&Role::Receiver);
        }
        sender && receiver
    }

    pub fn transfer_mode(&self) -> Option<TransferMode> {
        self.mode.as_ref().map(|d| d.mode)
    }
}

/// Result of a successful join
#[derive(Debug, Clone)]
pub struct JoinResult {
    pub room_id: String,
    pub file_info: FileInfo,
    pub mode: Option<TransferMode>,
    /// The joiner is the host
    pub self_transfer: bool,
    /// The joiner was already a member; nothing changed
    pub already_member: bool,
    /// Set when this join paired the room and classified it
    pub decision: Option<ModeDecision>,
    /// All members after the join
    pub members: Vec<u32>,
}

/// Result of a successful rejoin
#[derive(Debug, Clone)]
pub struct RejoinResult {
    pub file_info: FileInfo,
    pub mode: Option<TransferMode>,
    pub buffered_chunks: Vec<u64>,
    /// Members to send the reconnection notice to (empty on a repeated rejoin)
    pub notify: Vec<u32>,
    /// Member whose seat this rejoin took over
    pub evicted: Option<u32>,
    /// Set when this rejoin paired a room that had never been classified
    pub decision: Option<ModeDecision>,
    pub members: Vec<u32>,
}

/// Result of a leave
#[derive(Debug, Clone)]
pub struct LeaveResult {
    pub remaining: Vec<u32>,
    /// The room became empty and was deleted
    pub deleted: bool,
}

/// Result of recording a completed role
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// Role stored; the room stays open
    Recorded,
    /// This report completed the room; run the close sequence
    Closing { serial: u64, members: Vec<u32> },
}

/// Error when joining a room fails
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinError {
    #[error("room not found")]
    NotFound,
    #[error("room is full")]
    Full,
}

impl JoinError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound => ErrorKind::NotFound,
            Self::Full => ErrorKind::Full,
        }
    }
}

/// Error for rejoin, leave and completion reports
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    #[error("room not found")]
    NotFound,
    #[error("room is gone")]
    Gone,
    #[error("room is full")]
    Full,
    #[error("not a member of this room")]
    NotMember,
    #[error("room code space exhausted")]
    IdSpaceExhausted,
}

impl RoomError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound => ErrorKind::NotFound,
            Self::Gone => ErrorKind::Gone,
            Self::Full => ErrorKind::Full,
            Self::NotMember => ErrorKind::NotMember,
            Self::IdSpaceExhausted => ErrorKind::ProtocolError,
        }
    }
}

/// Error for relay buffer operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error("room not found")]
    RoomNotFound,
    #[error("not a member of this room")]
    NotMember,
    #[error("chunk {0} is not buffered")]
    ChunkMissing(u64),
    #[error("chunk index {index} is outside 0..{total}")]
    IndexOutOfRange { index: u64, total: u64 },
    #[error("chunk of {0} bytes exceeds the maximum chunk size")]
    ChunkTooLarge(usize),
    #[error(transparent)]
    Busy(#[from] BufferFull),
}

impl RelayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RoomNotFound => ErrorKind::NotFound,
            Self::NotMember => ErrorKind::NotMember,
            Self::ChunkMissing(_) => ErrorKind::ChunkMissing,
            Self::IndexOutOfRange { .. } | Self::ChunkTooLarge(_) => ErrorKind::Invalid,
            Self::Busy(_) => ErrorKind::Busy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room() -> Room {
        Room::new(
            "ABC123".to_string(),
            1,
            1,
            "127.0.0.1".parse().unwrap(),
            FileInfo {
                name: "a.bin".to_string(),
                size: 10,
                mime_type: String::new(),
            },
            Instant::now(),
            1024,
        )
    }

    #[test]
    fn test_all_roles_complete_across_members() {
        let mut room = room();
        room.members.push(2);
        room.completion_roles
            .entry(1)
            .or_default()
            .insert(Role::Sender);
        assert!(!room.all_roles_complete());
        room.completion_roles
            .entry(2)
            .or_default()
            .insert(Role::Receiver);
        assert!(room.all_roles_complete());
    }

    #[test]
    fn test_all_roles_complete_single_member() {
        let mut room = room();
        let roles = room.completion_roles.entry(1).or_default();
        roles.insert(Role::Sender);
        roles.insert(Role::Receiver);
        assert!(room.all_roles_complete());
    }

    #[test]
    fn test_host_vacant() {
        let mut room = room();
        assert!(!room.host_vacant());
        room.members.clear();
        assert!(room.host_vacant());
        room.host = None;
        assert!(room.host_vacant());
    }

    #[test]
    fn test_others() {
        let mut room = room();
        room.members.push(7);
        assert_eq!(room.others(1), vec![7]);
        assert_eq!(room.others(7), vec![1]);
    }
}
