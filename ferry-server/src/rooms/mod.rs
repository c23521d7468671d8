//! Session registry: rooms, membership and relay buffers

mod manager;
mod relay;
mod sweeper;
mod types;

pub use manager::RoomManager;
pub use relay::{BufferFull, RelayBuffer, RelayChunkEntry};
pub use sweeper::spawn_sweeper;
pub use types::{
    CompletionOutcome, JoinError, JoinResult, LeaveResult, RejoinResult, RelayError, Room,
    RoomError,
};
