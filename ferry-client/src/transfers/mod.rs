//! File transfers
//!
//! Engines move chunks, session drivers run whole transfers over the
//! signaling connection, and the stores keep checkpoints and history.

pub mod checkpoint;
pub mod engine;
pub mod errors;
pub mod events;
pub mod history;
pub mod rooms;
pub mod session;
pub mod storage;
pub mod supervisor;
pub mod types;

pub use checkpoint::{CheckpointPolicy, CheckpointStore, CheckpointWriter, ResumeCheckpoint};
pub use errors::{FailureAction, ProtocolError, SessionError, TransferError};
pub use events::{EventSender, EventStream, TransferEvent, event_channel};
pub use history::{HistoryEntry, HistoryStore, Outcome};
pub use session::{SessionContext, copy_file, receive_file, send_file};
pub use storage::{FileSink, FileSource, FsSink, FsSource};
pub use types::{TransferSession, TransferState, Transport};
