//! Progress events a session reports to its caller

use std::time::Duration;

use tokio::sync::mpsc;

use ferry_common::protocol::{Direction, FileInfo, TransferMode};

use super::errors::FailureAction;
use super::history::HistoryEntry;
use crate::channel::ChannelKind;

/// Everything the user-facing layer may want to show
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    RoomCreated {
        room_id: String,
    },
    Joined {
        room_id: String,
        file_info: FileInfo,
    },
    PeerJoined {
        member_id: u32,
    },
    ModeSelected {
        mode: TransferMode,
        reason: String,
        fallback_to_relay: bool,
        compression: bool,
        /// Informational time estimate for the file at this mode's speed
        estimate: Duration,
    },
    ChannelOpened {
        kind: ChannelKind,
    },
    FellBackToRelay,
    Progress {
        direction: Direction,
        chunk_index: u64,
        total_chunks: u64,
        bytes_transferred: u64,
        file_size: u64,
    },
    Suspended {
        reason: String,
    },
    Reconnecting {
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
    },
    Resumed {
        from_chunk: u64,
    },
    Completed(HistoryEntry),
    Failed {
        error: String,
        action: FailureAction,
        /// History record of the failed or cancelled attempt
        record: HistoryEntry,
    },
}

pub type EventSender = mpsc::UnboundedSender<TransferEvent>;
pub type EventStream = mpsc::UnboundedReceiver<TransferEvent>;

/// Event channel for one session
pub fn event_channel() -> (EventSender, EventStream) {
    mpsc::unbounded_channel()
}
